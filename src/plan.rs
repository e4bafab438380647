//! Diff & plan: turns inventories plus state into ordered work items.
//!
//! The planner only answers "already synchronized or not". Conflicts between
//! two sides that both changed are detected later by the executor, which is
//! the only stage that looks at both directions at once.

use crate::error::SyncError;
use crate::filter::ExcludeSet;
use crate::fingerprint::compute_file_md5;
use crate::scan::{is_contained, key_for, relative_to_prefix};
use crate::state::SyncState;
use crate::types::{Decision, Direction, FileRecord, ObjectRecord, WorkItem};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

/// Plans uploads for a local inventory.
///
/// Every file is fingerprinted; content whose fingerprint is already in the
/// state is skipped. Excluded paths are dropped even if the scan let them
/// through. Order follows the scan.
pub async fn plan_uploads(
    files: Vec<FileRecord>,
    prefix: &str,
    state: &SyncState,
    filter: &ExcludeSet,
) -> Result<Vec<WorkItem>, SyncError> {
    let mut items = Vec::with_capacity(files.len());

    for mut file in files {
        if filter.matches_local(&file.path) {
            continue;
        }

        let fingerprint = match file.fingerprint.take() {
            Some(fingerprint) => fingerprint,
            None => compute_file_md5(&file.location).await?,
        };

        let decision = if state.contains_fingerprint(&fingerprint) {
            Decision::Skip
        } else {
            Decision::Transfer
        };
        debug!("Planned {:?} for upload of {}", decision, file.path);

        items.push(WorkItem {
            direction: Direction::Upload,
            remote_key: key_for(prefix, &file.path),
            relative_path: file.path,
            local_path: file.location,
            size: file.size,
            decision,
            fingerprint: Some(fingerprint),
            entity_tag: None,
            local_modified: Some(file.modified_at),
            remote_modified: None,
        });
    }

    Ok(items)
}

/// Plans downloads for a remote inventory into `root`.
///
/// An object is skipped when a file already exists at its mapped path and
/// its entity tag is known to the state. Keys that do not map below
/// `prefix`, or whose remainder would leave `root`, are ignored.
pub async fn plan_downloads(
    objects: Vec<ObjectRecord>,
    prefix: &str,
    root: &Path,
    state: &SyncState,
    filter: &ExcludeSet,
) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(objects.len());

    for object in objects {
        if filter.matches_remote(&object.key) {
            continue;
        }
        let relative_path = match relative_to_prefix(&object.key, prefix) {
            Some(relative) => relative,
            None => continue,
        };
        if !is_contained(&relative_path) {
            warn!("Skipping {}: key resolves outside the sync directory", object.key);
            continue;
        }

        let local_path = root.join(&relative_path);
        let local_modified: Option<DateTime<Utc>> = match tokio::fs::metadata(&local_path).await {
            Ok(meta) if meta.is_file() => meta.modified().ok().map(Into::into),
            _ => None,
        };

        let decision = if local_modified.is_some() && state.contains_entity_tag(&object.entity_tag) {
            Decision::Skip
        } else {
            Decision::Transfer
        };
        debug!("Planned {:?} for download of {}", decision, object.key);

        items.push(WorkItem {
            direction: Direction::Download,
            relative_path,
            local_path,
            remote_key: object.key,
            size: object.size,
            decision,
            fingerprint: None,
            entity_tag: Some(object.entity_tag),
            local_modified,
            remote_modified: object.modified_at,
        });
    }

    items
}

/// Counts items the executor will not move.
pub fn skipped_count(items: &[WorkItem]) -> usize {
    items.iter().filter(|item| item.decision == Decision::Skip).count()
}
