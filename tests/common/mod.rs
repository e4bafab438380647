//! Shared fixtures: an in-memory object store and a scripted prompter.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use s3sync::fingerprint::fingerprint_bytes;
use s3sync::store::{
    ByteRange, ByteStream, CompletedPart, ObjectHead, ObjectPage, ObjectStore, ObjectSummary,
};
use s3sync::{Prompter, StoreError, SyncConfig, SyncError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

pub const BUCKET: &str = "test-bucket";
pub const PREFIX: &str = "backups";

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List { prefix: String, continuation: Option<String> },
    Head(String),
    Get { key: String, range: Option<ByteRange> },
    Put(String),
    CreateSession(String),
    UploadPart { key: String, part_number: u32, len: usize },
    Complete { key: String, parts: usize },
    Abort(String),
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    entity_tag: String,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
struct Failure {
    key: String,
    part: Option<u32>,
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    sessions: HashMap<String, PendingUpload>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    stalled: Vec<String>,
    next_session: u64,
}

/// Object store kept entirely in memory.
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            bucket: BUCKET.to_string(),
            page_size: 1000,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stores `body` under `key` with a single-part (plain MD5) tag.
    pub fn insert(&self, key: &str, body: &[u8]) {
        self.insert_with_etag(key, body, &fingerprint_bytes(body));
    }

    pub fn insert_with_etag(&self, key: &str, body: &[u8], entity_tag: &str) {
        self.inner.lock().unwrap().objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                entity_tag: entity_tag.to_string(),
                modified_at: Utc::now(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().objects.get(key).map(|o| o.body.clone())
    }

    pub fn entity_tag(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|o| o.entity_tag.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    /// Calls that move object bodies in either direction.
    pub fn data_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Put(_) | Call::UploadPart { .. } | Call::Get { .. } | Call::Complete { .. }
                )
            })
            .collect()
    }

    /// Every put, part upload and get for `key` fails.
    pub fn fail_key(&self, key: &str) {
        self.push_failure(key, None, None);
    }

    /// Uploading part `part` of `key` fails `times` times.
    pub fn fail_part(&self, key: &str, part: u32, times: usize) {
        self.push_failure(key, Some(part), Some(times));
    }

    /// Any put, part upload or get for `key` never completes.
    pub fn stall_key(&self, key: &str) {
        self.inner.lock().unwrap().stalled.push(key.to_string());
    }

    fn push_failure(&self, key: &str, part: Option<u32>, remaining: Option<usize>) {
        self.inner.lock().unwrap().failures.push(Failure {
            key: key.to_string(),
            part,
            remaining,
        });
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }

    /// Injected failure or stall for this operation, if any.
    async fn gate(&self, key: &str, part: Option<u32>) -> Result<(), StoreError> {
        let stalled = self.inner.lock().unwrap().stalled.iter().any(|k| k == key);
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock().unwrap();
        for failure in inner.failures.iter_mut() {
            if failure.key != key || (failure.part.is_some() && failure.part != part) {
                continue;
            }
            match failure.remaining.as_mut() {
                Some(0) => continue,
                Some(remaining) => *remaining -= 1,
                None => {}
            }
            return Err(StoreError::Transport(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

fn list_root(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StoreError> {
        self.record(Call::List {
            prefix: prefix.to_string(),
            continuation: continuation.clone(),
        });

        let root = list_root(prefix);
        let inner = self.inner.lock().unwrap();
        let mut matching = inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(&root))
            .filter(|(key, _)| continuation.as_ref().map_or(true, |after| *key > after));

        let objects: Vec<ObjectSummary> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
                entity_tag: object.entity_tag.clone(),
                modified_at: Some(object.modified_at),
            })
            .collect();
        let next = match matching.next() {
            Some(_) => objects.last().map(|o| o.key.clone()),
            None => None,
        };

        Ok(ObjectPage { objects, next })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead, StoreError> {
        self.record(Call::Head(key.to_string()));
        let inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(ObjectHead {
            size: object.body.len() as u64,
            entity_tag: Some(object.entity_tag.clone()),
            modified_at: Some(object.modified_at),
        })
    }

    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StoreError> {
        self.record(Call::Get {
            key: key.to_string(),
            range,
        });
        self.gate(key, None).await?;

        let body = {
            let inner = self.inner.lock().unwrap();
            let object = inner
                .objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            match range {
                Some(range) => {
                    let end = (range.end as usize).min(object.body.len().saturating_sub(1));
                    object.body[range.start as usize..=end].to_vec()
                }
                None => object.body.clone(),
            }
        };

        // Split the body so callers see more than one piece.
        let middle = body.len() / 2;
        let pieces = vec![
            Ok(Bytes::copy_from_slice(&body[..middle])),
            Ok(Bytes::copy_from_slice(&body[middle..])),
        ];
        Ok(stream::iter(pieces).boxed())
    }

    async fn put_object(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        self.record(Call::Put(key.to_string()));
        self.gate(key, None).await?;

        let body = tokio::fs::read(local_path).await?;
        self.insert(key, &body);
        Ok(())
    }

    async fn create_multipart_session(&self, key: &str) -> Result<String, StoreError> {
        self.record(Call::CreateSession(key.to_string()));

        let mut inner = self.inner.lock().unwrap();
        inner.next_session += 1;
        let session_id = format!("session-{}", inner.next_session);
        inner.sessions.insert(
            session_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, StoreError> {
        self.record(Call::UploadPart {
            key: key.to_string(),
            part_number,
            len: bytes.len(),
        });
        self.gate(key, Some(part_number)).await?;

        let part_id = fingerprint_bytes(&bytes);
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| StoreError::Multipart {
                key: key.to_string(),
                session_id: session_id.to_string(),
                reason: "unknown session".to_string(),
            })?;
        session
            .parts
            .insert(part_number, (part_id.clone(), bytes.to_vec()));
        Ok(part_id)
    }

    async fn complete_multipart_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        self.record(Call::Complete {
            key: key.to_string(),
            parts: parts.len(),
        });

        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .remove(session_id)
            .ok_or_else(|| StoreError::Multipart {
                key: key.to_string(),
                session_id: session_id.to_string(),
                reason: "unknown session".to_string(),
            })?;

        let mut body = Vec::new();
        let mut digests = String::new();
        for (index, part) in parts.iter().enumerate() {
            let stored = session.parts.get(&part.part_number);
            let valid = part.part_number as usize == index + 1
                && stored.is_some_and(|(id, _)| *id == part.part_id);
            if !valid {
                return Err(StoreError::Multipart {
                    key: key.to_string(),
                    session_id: session_id.to_string(),
                    reason: format!("bad part {}", part.part_number),
                });
            }
            if let Some((id, bytes)) = stored {
                body.extend_from_slice(bytes);
                digests.push_str(id);
            }
        }

        let entity_tag = format!("{}-{}", fingerprint_bytes(digests.as_bytes()), parts.len());
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                entity_tag,
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart_session(&self, key: &str, session_id: &str) -> Result<(), StoreError> {
        self.record(Call::Abort(key.to_string()));
        self.inner.lock().unwrap().sessions.remove(session_id);
        Ok(())
    }
}

/// Answers prompts from a fixed script and remembers every question.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn ask(&self, question: &str) -> Result<String, SyncError> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Configuration for a run against [`MemoryStore`] rooted at `dir`.
pub fn config(dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::new(BUCKET, PREFIX, dir);
    config.retry_delay = std::time::Duration::from_millis(1);
    config
}

pub fn key(relative: &str) -> String {
    format!("{}/{}", PREFIX, relative)
}

/// Writes `body` to `dir/relative`, creating parents.
pub fn write_file(dir: &Path, relative: &str, body: &[u8]) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

/// Deterministic non-repeating test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
