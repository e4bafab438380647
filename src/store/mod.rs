//! Object-store capability consumed by the sync engine.
//!
//! The engine only needs listing, metadata probes, (ranged) reads, single-shot
//! writes and the three multipart primitives. Anything bucket-specific is
//! bound when the store handle is constructed.

pub mod s3;

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use std::path::Path;

pub use s3::S3Store;

/// Stream of body bytes returned by [`ObjectStore::get_object`].
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// One object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub entity_tag: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// One page of a listing. `next` carries the continuation token when more
/// pages remain.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub next: Option<String>,
}

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub entity_tag: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// HTTP `Range` header form.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A part accepted by the store inside a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub part_id: String,
}

/// Narrow interface the engine uses to talk to the remote store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this handle is bound to.
    fn bucket(&self) -> &str;

    /// Lists one page of objects under `prefix`, continuing from `continuation`.
    async fn list_objects(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StoreError>;

    /// Fetches object metadata without the body.
    async fn head_object(&self, key: &str) -> Result<ObjectHead, StoreError>;

    /// Streams the object body, optionally restricted to a byte range.
    async fn get_object(&self, key: &str, range: Option<ByteRange>)
        -> Result<ByteStream, StoreError>;

    /// Uploads a local file in one request.
    async fn put_object(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;

    /// Opens a multipart session and returns its identifier.
    async fn create_multipart_session(&self, key: &str) -> Result<String, StoreError>;

    /// Submits part `part_number` (1-based) and returns the store's part id.
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, StoreError>;

    /// Closes a session with its ordered part list.
    async fn complete_multipart_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError>;

    /// Abandons a session after a failed part. Stores without explicit
    /// cleanup can rely on the default.
    async fn abort_multipart_session(&self, _key: &str, _session_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
