//! s3sync - incremental directory synchronization against S3
//!
//! This library keeps a local directory and an S3 prefix in step. It decides
//! which files need to move, moves them (large objects through multipart
//! uploads and ranged reads), and remembers what was transferred in a state
//! file so repeated runs only move what changed.
//!
//! # Features
//!
//! - **Incremental runs**: content fingerprints recorded in `.state.json`
//! - **Chunked transfers**: 5 MiB parts for objects of 100,000,000 bytes and up
//! - **MD5 verification**: downloads are checked against single-part ETags
//! - **Conflict handling**: prompt, or a fixed local/remote/skip policy
//! - **Bounded concurrency and retries**: both opt-in
//!
//! # Example
//!
//! ```no_run
//! use s3sync::{run_upload, S3Store, StdinPrompter, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = SyncConfig::new("my-bucket", "backups/laptop", "./documents");
//! config.assume_yes = true;
//!
//! let store = S3Store::new(&config.bucket, None, None, config.chunk_size as usize)?;
//! let report = run_upload(&config, Arc::new(store), Arc::new(StdinPrompter)).await?;
//! println!("{} files uploaded", report.transferred());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod scan;
pub mod state;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::{Overrides, SyncConfig, CONFIG_FILE_NAME};
pub use conflict::{ConflictPolicy, ConflictResolver, Prompter, Resolution, StdinPrompter};
pub use error::{ConfigError, StoreError, SyncError};
pub use filter::ExcludeSet;
pub use orchestrator::{list_contents, run_download, run_upload, PreflightSummary, RunReport};
pub use state::{StateEntry, SyncState, STATE_FILE_NAME};
pub use store::{ObjectStore, S3Store};
pub use types::{
    Decision, Direction, FileRecord, ObjectRecord, Outcome, TransferStrategy, WorkItem,
    CHUNK_SIZE, MULTIPART_THRESHOLD,
};
