//! Data structures shared by the scanner, planner and executor.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// Objects at or above this size use the chunked transfer protocol.
pub const MULTIPART_THRESHOLD: u64 = 100_000_000;

/// Part size for chunked uploads and ranged downloads (5 MiB).
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// A file found under the local sync root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the sync root, `/`-separated.
    pub path: String,
    /// Absolute (root-joined) location on disk.
    pub location: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// MD5 of the contents, filled in by the planner.
    pub fingerprint: Option<String>,
}

/// An object found under the remote prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Entity tag with surrounding quotes stripped.
    pub entity_tag: String,
    /// Last modification time, when the store reports one.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Direction of a planned transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// Past-tense verb used in progress lines.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Direction::Upload => "Uploaded",
            Direction::Download => "Downloaded",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Decision made by the planner for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already synchronized; nothing to move.
    Skip,
    /// Data must be moved.
    Transfer,
}

/// How the bytes of one item are moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// One put or one get.
    SingleShot,
    /// Multipart session (upload) or ranged reads (download).
    Chunked,
}

impl TransferStrategy {
    /// Picks the strategy for a payload of `size` bytes.
    pub fn for_size(size: u64, threshold: u64) -> Self {
        if size >= threshold {
            TransferStrategy::Chunked
        } else {
            TransferStrategy::SingleShot
        }
    }
}

/// One planned transfer decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub direction: Direction,
    /// Relative path under the sync root.
    pub relative_path: String,
    /// Absolute destination/source on disk.
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size: u64,
    pub decision: Decision,
    /// Content fingerprint of the local file, when it was computed.
    pub fingerprint: Option<String>,
    /// Entity tag of the remote object, when it is known.
    pub entity_tag: Option<String>,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
}

/// Final state of a work item after the executor ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Transferred(TransferStrategy),
    Skipped,
    Simulated,
    Conflicted,
    Failed(String),
}
