//! Transfer executor.
//!
//! Consumes planned work items, moves bytes through the object store, detects
//! two-sided conflicts, and records successful transfers in the state. A
//! failure from the store only fails its own item; local I/O failures abort
//! the whole run.

use crate::conflict::{Conflict, ConflictResolver, Resolution};
use crate::error::{StoreError, SyncError};
use crate::fingerprint::{compute_file_md5, is_plain_md5_etag, StreamingFingerprint};
use crate::progress::ProgressReporter;
use crate::state::{extension_of, format_timestamp, StateEntry, SyncState};
use crate::store::{ByteRange, CompletedPart, ObjectHead, ObjectStore};
use crate::types::{Decision, Direction, Outcome, TransferStrategy, WorkItem};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio_retry2::strategy::FixedInterval;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Knobs the executor needs from the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub multipart_threshold: u64,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub retries: usize,
    pub retry_delay: Duration,
    pub dry_run: bool,
}

/// Number of chunks needed for `size` bytes, `ceil(size / chunk_size)`.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}

/// Inclusive byte range of chunk `n` (1-based) of an object of `size` bytes.
pub fn chunk_range(n: u64, size: u64, chunk_size: u64) -> ByteRange {
    let start = (n - 1) * chunk_size;
    let end = (n * chunk_size).min(size) - 1;
    ByteRange { start, end }
}

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: WorkItem,
    pub outcome: Outcome,
}

/// A detected two-sided change, plus what detection learned about the
/// local copy.
struct Divergence {
    conflict: Conflict,
    local_fingerprint: Option<String>,
    local_size: Option<u64>,
}

pub struct Executor {
    store: Arc<dyn ObjectStore>,
    state: Mutex<SyncState>,
    resolver: ConflictResolver,
    reporter: Arc<ProgressReporter>,
    settings: TransferSettings,
    span: Span,
}

impl Executor {
    /// Builds an executor. `span` is the run's span; every item runs inside
    /// a child of it.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        state: SyncState,
        resolver: ConflictResolver,
        reporter: Arc<ProgressReporter>,
        settings: TransferSettings,
        span: Span,
    ) -> Self {
        Self {
            store,
            state: Mutex::new(state),
            resolver,
            reporter,
            settings,
            span,
        }
    }

    /// Hands the (possibly updated) state back for persisting.
    pub fn into_state(self) -> SyncState {
        self.state.into_inner()
    }

    /// Runs every item, at most `concurrency` at a time.
    ///
    /// With a concurrency of one, items run strictly in the given order. The
    /// first run-aborting error stops the batch and is returned.
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<Vec<ItemReport>, SyncError> {
        let concurrency = self.settings.concurrency.max(1);

        let reports: Vec<ItemReport> = stream::iter(items)
            .map(|item| {
                let span = info_span!(
                    parent: &self.span,
                    "item",
                    direction = %item.direction,
                    key = %item.remote_key
                );
                self.execute(item).instrument(span)
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        self.reporter.finish();
        Ok(reports)
    }

    async fn execute(&self, item: WorkItem) -> Result<ItemReport, SyncError> {
        if item.decision == Decision::Skip {
            debug!("Skipping {}, already synchronized", item.relative_path);
            self.reporter.record_skipped();
            return Ok(ItemReport {
                item,
                outcome: Outcome::Skipped,
            });
        }

        if self.settings.dry_run {
            self.reporter.println(self.simulation_line(&item));
            self.reporter.record_completed();
            return Ok(ItemReport {
                item,
                outcome: Outcome::Simulated,
            });
        }

        let outcome = match self.attempt(&item).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_item_local() => {
                error!("Failed to {} {}: {}", item.direction, item.relative_path, e);
                self.reporter
                    .println(format!("Error: failed to {} {}: {}", item.direction, item.relative_path, e));
                Outcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };

        match &outcome {
            Outcome::Transferred(_) => self.reporter.record_completed(),
            Outcome::Failed(_) => self.reporter.record_failed(),
            _ => self.reporter.record_skipped(),
        }
        Ok(ItemReport { item, outcome })
    }

    fn simulation_line(&self, item: &WorkItem) -> String {
        match item.direction {
            Direction::Upload => format!(
                "Simulating: Would upload {} to S3 bucket {} as {}",
                item.local_path.display(),
                self.store.bucket(),
                item.remote_key
            ),
            Direction::Download => format!(
                "Simulating: Would download {} from S3 bucket {} to {}",
                item.remote_key,
                self.store.bucket(),
                item.local_path.display()
            ),
        }
    }

    /// Conflict check, then the transfer itself in whichever direction wins.
    async fn attempt(&self, item: &WorkItem) -> Result<Outcome, SyncError> {
        let divergence = match self.detect_conflict(item).await? {
            Some(divergence) => divergence,
            None => {
                let strategy = self.transfer_with_retry(item).await?;
                return Ok(Outcome::Transferred(strategy));
            }
        };

        let resolution = self
            .resolver
            .resolve(&divergence.conflict, &self.reporter)
            .await?;

        let winner = match resolution {
            Resolution::Skip => return Ok(Outcome::Conflicted),
            Resolution::KeepLocal => as_upload(item, &divergence),
            Resolution::KeepRemote => as_download(item),
        };

        let strategy = self.transfer_with_retry(&winner).await?;
        match winner.direction {
            Direction::Upload => self
                .reporter
                .println(format!("Uploaded local version of {}", item.relative_path)),
            Direction::Download => self
                .reporter
                .println(format!("Downloaded remote version of {}", item.relative_path)),
        }
        Ok(Outcome::Transferred(strategy))
    }

    /// Compares both sides against the last recorded sync of this path.
    /// Without such a record there is nothing to conflict with.
    async fn detect_conflict(&self, item: &WorkItem) -> Result<Option<Divergence>, SyncError> {
        let baseline = {
            let state = self.state.lock().await;
            state
                .baseline_for(&item.relative_path)
                .map(|(fingerprint, entry)| (fingerprint.to_string(), entry.clone()))
        };
        let (baseline_fingerprint, baseline) = match baseline {
            Some(found) => found,
            None => return Ok(None),
        };
        let baseline_tag = baseline
            .remote_etag
            .clone()
            .unwrap_or_else(|| baseline_fingerprint.clone());

        let (local_fingerprint, local_size, local_modified) = match item.direction {
            Direction::Upload => (item.fingerprint.clone(), Some(item.size), item.local_modified),
            Direction::Download => match item.local_modified {
                Some(modified) => {
                    let fingerprint = compute_file_md5(&item.local_path).await?;
                    let size = tokio::fs::metadata(&item.local_path).await?.len();
                    (Some(fingerprint), Some(size), Some(modified))
                }
                None => (None, None, None),
            },
        };
        let local_changed = local_fingerprint
            .as_deref()
            .is_some_and(|fingerprint| fingerprint != baseline_fingerprint);

        let (remote_tag, remote_modified) = match item.direction {
            Direction::Download => (item.entity_tag.clone(), item.remote_modified),
            Direction::Upload => match self.store.head_object(&item.remote_key).await {
                Ok(head) => (head.entity_tag, head.modified_at),
                Err(StoreError::NotFound(_)) => (None, None),
                Err(e) => return Err(e.into()),
            },
        };
        let remote_changed = remote_tag.as_deref().is_some_and(|tag| tag != baseline_tag);

        if !(local_changed && remote_changed) {
            return Ok(None);
        }

        info!("Conflict on {}", item.relative_path);
        Ok(Some(Divergence {
            conflict: Conflict {
                relative_path: item.relative_path.clone(),
                local_modified,
                remote_modified,
            },
            local_fingerprint,
            local_size,
        }))
    }

    /// Runs one transfer, retrying store failures from the beginning when
    /// retries are configured.
    async fn transfer_with_retry(&self, item: &WorkItem) -> Result<TransferStrategy, SyncError> {
        let retry_strategy =
            FixedInterval::from_millis(self.settings.retry_delay.as_millis() as u64)
                .take(self.settings.retries);

        Retry::spawn(retry_strategy, || async move {
            match self.transfer(item).await {
                Ok(strategy) => Ok(strategy),
                Err(e) if e.is_item_local() => {
                    warn!("Failed to {} {} due to error: {}", item.direction, item.relative_path, e);
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        })
        .await
    }

    async fn transfer(&self, item: &WorkItem) -> Result<TransferStrategy, SyncError> {
        match item.direction {
            Direction::Upload => self.upload(item).await,
            Direction::Download => self.download(item).await,
        }
    }

    async fn upload(&self, item: &WorkItem) -> Result<TransferStrategy, SyncError> {
        let fingerprint = match &item.fingerprint {
            Some(fingerprint) => fingerprint.clone(),
            None => compute_file_md5(&item.local_path).await?,
        };

        let strategy = TransferStrategy::for_size(item.size, self.settings.multipart_threshold);
        match strategy {
            TransferStrategy::SingleShot => {
                self.store.put_object(&item.remote_key, &item.local_path).await?;
            }
            TransferStrategy::Chunked => self.upload_chunked(item).await?,
        }
        info!("Uploaded {} as {} ({:?})", item.relative_path, item.remote_key, strategy);

        let remote_etag = match self.store.head_object(&item.remote_key).await {
            Ok(head) => head.entity_tag,
            Err(e) => {
                warn!("Could not read entity tag of {}: {}", item.remote_key, e);
                None
            }
        };

        let entry = StateEntry {
            location: item.relative_path.clone(),
            size: Some(item.size),
            last_modified: format_timestamp(item.local_modified.unwrap_or_else(Utc::now)),
            extension: extension_of(&item.relative_path),
            remote_etag,
        };
        self.state.lock().await.record(fingerprint, entry);
        Ok(strategy)
    }

    /// Multipart upload. Any failure aborts the session before returning.
    async fn upload_chunked(&self, item: &WorkItem) -> Result<(), SyncError> {
        let session_id = self.store.create_multipart_session(&item.remote_key).await?;

        let result = match self.upload_parts(item, &session_id).await {
            Ok(parts) => self
                .store
                .complete_multipart_session(&item.remote_key, &session_id, &parts)
                .await
                .map_err(SyncError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(abort_err) = self
                .store
                .abort_multipart_session(&item.remote_key, &session_id)
                .await
            {
                warn!("Failed to abort multipart session {}: {}", session_id, abort_err);
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        item: &WorkItem,
        session_id: &str,
    ) -> Result<Vec<CompletedPart>, SyncError> {
        let mut file = tokio::fs::File::open(&item.local_path).await?;
        let mut parts = Vec::new();
        let mut part_number: u32 = 1;

        loop {
            let mut block = Vec::with_capacity(self.settings.chunk_size as usize);
            (&mut file)
                .take(self.settings.chunk_size)
                .read_to_end(&mut block)
                .await?;
            if block.is_empty() {
                break;
            }

            let part_id = self
                .store
                .upload_part(&item.remote_key, session_id, part_number, Bytes::from(block))
                .await?;
            debug!("Uploaded part {} of {}", part_number, item.remote_key);
            parts.push(CompletedPart {
                part_number,
                part_id,
            });
            part_number += 1;
        }

        Ok(parts)
    }

    async fn download(&self, item: &WorkItem) -> Result<TransferStrategy, SyncError> {
        let head = self.store.head_object(&item.remote_key).await?;
        let strategy = TransferStrategy::for_size(head.size, self.settings.multipart_threshold);

        if let Some(parent) = item.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part_path = partial_path(&item.local_path);
        let fingerprint = match self.fetch_into(item, &head, strategy, &part_path).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&part_path, &item.local_path).await?;
        info!("Downloaded {} to {} ({:?})", item.remote_key, item.relative_path, strategy);

        let remote_tag = head.entity_tag.clone().or_else(|| item.entity_tag.clone());
        let remote_modified: Option<DateTime<Utc>> = head.modified_at.or(item.remote_modified);
        let entry = StateEntry {
            location: item.relative_path.clone(),
            size: Some(head.size),
            last_modified: format_timestamp(remote_modified.unwrap_or_else(Utc::now)),
            extension: extension_of(&item.relative_path),
            remote_etag: remote_tag,
        };
        self.state.lock().await.record(fingerprint, entry);
        Ok(strategy)
    }

    /// Streams the object into `dest`, hashing as it goes, and checks the
    /// result against the advertised size and entity tag.
    async fn fetch_into(
        &self,
        item: &WorkItem,
        head: &ObjectHead,
        strategy: TransferStrategy,
        dest: &Path,
    ) -> Result<String, SyncError> {
        let mut file = BufWriter::new(tokio::fs::File::create(dest).await?);
        let mut hasher = StreamingFingerprint::new();
        let mut written: u64 = 0;

        let ranges: Vec<Option<ByteRange>> = match strategy {
            TransferStrategy::SingleShot => vec![None],
            TransferStrategy::Chunked => (1..=chunk_count(head.size, self.settings.chunk_size))
                .map(|n| Some(chunk_range(n, head.size, self.settings.chunk_size)))
                .collect(),
        };

        for range in ranges {
            if let Some(range) = range {
                debug!("Fetching {} of {}", range.header_value(), item.remote_key);
            }
            let mut body = self.store.get_object(&item.remote_key, range).await?;
            while let Some(piece) = body.next().await {
                let chunk = piece?;
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
        }
        file.flush().await?;

        if written != head.size {
            return Err(StoreError::Transport(format!(
                "size mismatch for {}: expected {} bytes, got {} bytes",
                item.remote_key, head.size, written
            ))
            .into());
        }

        let fingerprint = hasher.finish();
        let expected = head.entity_tag.as_deref().or(item.entity_tag.as_deref());
        if let Some(expected) = expected {
            if is_plain_md5_etag(expected) && expected != fingerprint {
                return Err(SyncError::IntegrityMismatch {
                    key: item.remote_key.clone(),
                    expected: expected.to_string(),
                    actual: fingerprint,
                });
            }
        }
        Ok(fingerprint)
    }
}

/// Temporary sibling a download is written to before it replaces the target.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.s3sync-part", name))
}

fn as_upload(item: &WorkItem, divergence: &Divergence) -> WorkItem {
    WorkItem {
        direction: Direction::Upload,
        size: divergence.local_size.unwrap_or(item.size),
        fingerprint: divergence.local_fingerprint.clone(),
        ..item.clone()
    }
}

fn as_download(item: &WorkItem) -> WorkItem {
    WorkItem {
        direction: Direction::Download,
        fingerprint: None,
        ..item.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CHUNK_SIZE;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(150_000_000, CHUNK_SIZE), 29);
        assert_eq!(chunk_count(100_000_000, CHUNK_SIZE), 20);
        assert_eq!(chunk_count(2 * CHUNK_SIZE, CHUNK_SIZE), 2);
        assert_eq!(chunk_count(2 * CHUNK_SIZE + 1, CHUNK_SIZE), 3);
    }

    #[test]
    fn test_chunk_ranges_cover_object() {
        let size = 12;
        let ranges: Vec<_> = (1..=chunk_count(size, 5))
            .map(|n| chunk_range(n, size, 5))
            .collect();

        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 0, end: 4 },
                ByteRange { start: 5, end: 9 },
                ByteRange { start: 10, end: 11 },
            ]
        );
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<u64>(), size);
    }

    #[test]
    fn test_last_range_of_exact_multiple() {
        let last = chunk_range(2, 10, 5);
        assert_eq!(last, ByteRange { start: 5, end: 9 });
        assert_eq!(last.len(), 5);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/a/b.bin")),
            PathBuf::from("/data/a/b.bin.s3sync-part")
        );
    }
}
