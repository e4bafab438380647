//! S3 and S3-compatible storage using OpenDAL.
//!
//! Credentials come from the standard AWS chain (environment variables,
//! shared credentials file, instance profile); nothing here manages them.

use super::{ByteRange, ByteStream, CompletedPart, ObjectHead, ObjectPage, ObjectStore, ObjectSummary};
use crate::error::StoreError;
use crate::fingerprint::{fingerprint_bytes, normalize_etag};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, services::S3, Metakey, Operator, Writer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Timeout for metadata-only operations (stat, list pages).
const OP_TIMEOUT_SECS: u64 = 60;
/// Timeout for body transfers.
const IO_TIMEOUT_SECS: u64 = 300;

/// The writer half of a multipart session.
#[async_trait]
trait PartWriter: Send {
    async fn write_part(&mut self, bytes: Bytes) -> Result<(), StoreError>;
    async fn finish(&mut self) -> Result<(), StoreError>;
    async fn abort(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
impl PartWriter for Writer {
    async fn write_part(&mut self, bytes: Bytes) -> Result<(), StoreError> {
        Writer::write(self, bytes).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), StoreError> {
        Writer::close(self).await?;
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        Writer::abort(self).await?;
        Ok(())
    }
}

/// An open multipart session backed by an OpenDAL chunked writer.
struct Session {
    key: String,
    writer: Box<dyn PartWriter>,
    next_part: u32,
    part_ids: Vec<String>,
}

impl Session {
    /// Aborts the upload behind this session. The session is consumed, so a
    /// later abort from the caller finds nothing left to clean up.
    async fn discard(mut self, session_id: &str) {
        if let Err(e) = self.writer.abort().await {
            warn!(
                "Failed to abort multipart session {} for {}: {}",
                session_id, self.key, e
            );
        }
    }
}

/// S3 object store bound to one bucket.
pub struct S3Store {
    operator: Operator,
    bucket: String,
    chunk_size: usize,
    sessions: Mutex<HashMap<String, Session>>,
}

impl S3Store {
    /// Creates a store for `bucket`.
    ///
    /// `region` and `endpoint` are optional; when absent OpenDAL falls back
    /// to the environment (e.g. `AWS_REGION`) and the AWS endpoint.
    pub fn new(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        chunk_size: usize,
    ) -> Result<Self, StoreError> {
        let mut builder = S3::default().bucket(bucket);

        if let Some(region) = region {
            builder = builder.region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            bucket: bucket.to_string(),
            chunk_size,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn multipart_error(key: &str, session_id: &str, reason: impl Into<String>) -> StoreError {
        StoreError::Multipart {
            key: key.to_string(),
            session_id: session_id.to_string(),
            reason: reason.into(),
        }
    }

    async fn take_session(&self, key: &str, session_id: &str) -> Result<Session, StoreError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| Self::multipart_error(key, session_id, "unknown session"))?;

        if session.key != key {
            let reason = format!("session belongs to {}", session.key);
            self.sessions.lock().await.insert(session_id.to_string(), session);
            return Err(Self::multipart_error(key, session_id, reason));
        }
        Ok(session)
    }
}

/// Directory semantics for prefixes: `photos` lists `photos/...`.
fn list_root(prefix: &str) -> String {
    let prefix = prefix.trim_start_matches('/');
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    /// OpenDAL follows S3 continuation tokens inside its lister, so the whole
    /// prefix comes back as a single page.
    async fn list_objects(
        &self,
        prefix: &str,
        _continuation: Option<String>,
    ) -> Result<ObjectPage, StoreError> {
        let mut lister = self
            .operator
            .lister_with(&list_root(prefix))
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Etag | Metakey::Mode)
            .await?;

        let mut objects = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }

            objects.push(ObjectSummary {
                key: entry.path().trim_start_matches('/').to_string(),
                size: meta.content_length(),
                entity_tag: meta.etag().map(normalize_etag).unwrap_or_default(),
                modified_at: meta.last_modified(),
            });
        }

        debug!("Listed {} objects under {}", objects.len(), prefix);
        Ok(ObjectPage { objects, next: None })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead, StoreError> {
        let meta = self.operator.stat(key).await?;
        Ok(ObjectHead {
            size: meta.content_length(),
            entity_tag: meta.etag().map(normalize_etag),
            modified_at: meta.last_modified(),
        })
    }

    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StoreError> {
        let buffer = match range {
            Some(range) => {
                self.operator
                    .read_with(key)
                    .range(range.start..range.end + 1)
                    .await?
            }
            None => self.operator.read(key).await?,
        };

        let body: Bytes = buffer.to_bytes();
        Ok(stream::iter(vec![Ok(body)]).boxed())
    }

    async fn put_object(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let content = tokio::fs::read(local_path).await?;
        self.operator.write(key, content).await?;
        Ok(())
    }

    async fn create_multipart_session(&self, key: &str) -> Result<String, StoreError> {
        let writer = self
            .operator
            .writer_with(key)
            .chunk(self.chunk_size)
            .await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions.lock().await.insert(
            session_id.clone(),
            Session {
                key: key.to_string(),
                writer: Box::new(writer),
                next_part: 1,
                part_ids: Vec::new(),
            },
        );
        debug!("Opened multipart session {} for {}", session_id, key);
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, StoreError> {
        let mut session = self.take_session(key, session_id).await?;

        if part_number != session.next_part {
            let reason = format!(
                "expected part {}, got part {}",
                session.next_part, part_number
            );
            self.sessions.lock().await.insert(session_id.to_string(), session);
            return Err(Self::multipart_error(key, session_id, reason));
        }

        let part_id = fingerprint_bytes(&bytes);
        if let Err(e) = session.writer.write_part(bytes).await {
            session.discard(session_id).await;
            return Err(e);
        }
        session.next_part += 1;
        session.part_ids.push(part_id.clone());
        self.sessions.lock().await.insert(session_id.to_string(), session);

        Ok(part_id)
    }

    async fn complete_multipart_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        let mut session = self.take_session(key, session_id).await?;

        let in_order = parts.len() == session.part_ids.len()
            && parts.iter().enumerate().all(|(index, part)| {
                part.part_number as usize == index + 1 && part.part_id == session.part_ids[index]
            });
        if !in_order {
            session.discard(session_id).await;
            return Err(Self::multipart_error(
                key,
                session_id,
                "part list does not match submitted parts",
            ));
        }

        if let Err(e) = session.writer.finish().await {
            session.discard(session_id).await;
            return Err(e);
        }
        debug!("Completed multipart session {} with {} parts", session_id, parts.len());
        Ok(())
    }

    async fn abort_multipart_session(&self, key: &str, session_id: &str) -> Result<(), StoreError> {
        match self.take_session(key, session_id).await {
            Ok(mut session) => session.writer.abort().await,
            // Already aborted by the failing write or close.
            Err(_) => Ok(()),
        }
    }
}
