//! Local and remote inventories used for diffing and pre-flight totals.

use crate::error::{StoreError, SyncError};
use crate::filter::ExcludeSet;
use crate::store::ObjectStore;
use crate::types::{FileRecord, ObjectRecord};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Aggregates shown in the pre-flight summary.
pub trait InventoryTotals {
    fn total_count(&self) -> usize;
    fn total_size_bytes(&self) -> u64;
}

impl InventoryTotals for [FileRecord] {
    fn total_count(&self) -> usize {
        self.len()
    }

    fn total_size_bytes(&self) -> u64 {
        self.iter().map(|f| f.size).sum()
    }
}

impl InventoryTotals for [ObjectRecord] {
    fn total_count(&self) -> usize {
        self.len()
    }

    fn total_size_bytes(&self) -> u64 {
        self.iter().map(|o| o.size).sum()
    }
}

/// Walks `root` recursively and returns every regular file not excluded.
///
/// Excluded directories are pruned before descent and never opened. Entries
/// come back in directory-traversal order.
pub fn scan_local(root: &Path, filter: &ExcludeSet) -> Result<Vec<FileRecord>, SyncError> {
    let mut records = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !filter.matches_name(&entry.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative_to_slash(relative),
            Err(_) => continue,
        };
        if filter.matches_local(&relative) {
            continue;
        }

        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let modified_at: DateTime<Utc> = metadata.modified()?.into();

        records.push(FileRecord {
            path: relative,
            location: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_at,
            fingerprint: None,
        });
    }

    debug!("Scanned {} local files under {}", records.len(), root.display());
    Ok(records)
}

/// Runs [`scan_local`] on the blocking pool.
pub async fn scan_local_async(root: PathBuf, filter: ExcludeSet) -> Result<Vec<FileRecord>, SyncError> {
    tokio::task::spawn_blocking(move || scan_local(&root, &filter))
        .await
        .map_err(|e| SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Lists every object under `prefix`, following continuation tokens until
/// the store reports no further pages. Directory markers and excluded keys
/// are dropped after listing.
pub async fn scan_remote(
    store: &dyn ObjectStore,
    prefix: &str,
    filter: &ExcludeSet,
) -> Result<Vec<ObjectRecord>, StoreError> {
    let mut records = Vec::new();
    let mut continuation = None;
    let mut pages = 0usize;

    loop {
        let page = store.list_objects(prefix, continuation.take()).await?;
        pages += 1;

        records.extend(
            page.objects
                .into_iter()
                .filter(|obj| !obj.key.ends_with('/'))
                .filter(|obj| !filter.matches_remote(&obj.key))
                .map(|obj| ObjectRecord {
                    key: obj.key,
                    size: obj.size,
                    entity_tag: obj.entity_tag,
                    modified_at: obj.modified_at,
                }),
        );

        match page.next {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    debug!(
        "Listed {} remote objects under {} in {} page(s)",
        records.len(),
        prefix,
        pages
    );
    Ok(records)
}

/// Object key for a local file: prefix and relative path joined by one `/`.
pub fn key_for(prefix: &str, relative_path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative_path.to_string()
    } else {
        format!("{}/{}", prefix, relative_path)
    }
}

/// Path of `key` relative to `prefix`, or `None` when the key is not below it.
pub fn relative_to_prefix(key: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// True when `relative` stays below whatever root it is joined onto.
///
/// Rejects `.` and `..` segments and anything `Path` would treat as rooted
/// (a leading separator, a drive or UNC prefix).
pub fn is_contained(relative: &str) -> bool {
    let segments_ok = relative
        .split(['/', '\\'])
        .all(|segment| segment != "." && segment != "..");

    segments_ok
        && !relative.is_empty()
        && Path::new(relative)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

fn relative_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
