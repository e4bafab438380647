//! Persisted record of what has already been transferred.
//!
//! The state file is loaded once per run, mutated in memory, and rewritten in
//! full at the end of a successful pass. Entries are keyed by content
//! fingerprint; the remote entity tag is kept as an attribute so that either
//! direction can recognize a file synchronized by the other.

use crate::error::SyncError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default state file name, relative to the sync root.
pub const STATE_FILE_NAME: &str = ".state.json";

/// Metadata remembered for one synchronized fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    /// Path relative to the sync root.
    pub location: String,
    /// Size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// UTC modification time at the moment of the transfer.
    pub last_modified: String,
    /// File extension including the leading dot, or empty.
    pub extension: String,
    /// Entity tag of the remote copy, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_etag: Option<String>,
}

/// In-memory view of the state file.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    path: PathBuf,
    entries: BTreeMap<String, StateEntry>,
}

impl SyncState {
    /// Creates an empty state bound to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the state file. A missing file is an empty state; an unreadable
    /// or corrupt one is reported and also treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                return Self::empty(path);
            }
            Err(e) => {
                warn!("Error occurred while loading state {}: {}", path.display(), e);
                return Self::empty(path);
            }
        };

        match serde_json::from_str::<BTreeMap<String, StateEntry>>(&content) {
            Ok(entries) => {
                debug!("Loaded {} state entries from {}", entries.len(), path.display());
                Self { path, entries }
            }
            Err(e) => {
                warn!("Error occurred while loading state {}: {}", path.display(), e);
                Self::empty(path)
            }
        }
    }

    /// Rewrites the whole state file through a temporary sibling so a crash
    /// never leaves a half-written document behind.
    pub fn persist(&self) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        debug!("Persisted {} state entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, StateEntry> {
        &self.entries
    }

    pub fn get(&self, fingerprint: &str) -> Option<&StateEntry> {
        self.entries.get(fingerprint)
    }

    /// Whether content with this fingerprint has already been synchronized.
    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Whether a remote object with this entity tag has already been
    /// synchronized, either as a recorded tag or as a plain-MD5 tag equal to
    /// a recorded fingerprint.
    pub fn contains_entity_tag(&self, entity_tag: &str) -> bool {
        self.entries.contains_key(entity_tag)
            || self
                .entries
                .values()
                .any(|entry| entry.remote_etag.as_deref() == Some(entity_tag))
    }

    /// The last recorded sync for a relative path, if any.
    pub fn baseline_for(&self, location: &str) -> Option<(&str, &StateEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.location == location)
            .map(|(fingerprint, entry)| (fingerprint.as_str(), entry))
    }

    /// Records a completed transfer. Older entries for the same location are
    /// dropped so the newest sync is the baseline for conflict detection.
    pub fn record(&mut self, fingerprint: String, entry: StateEntry) {
        self.entries
            .retain(|key, existing| key == &fingerprint || existing.location != entry.location);
        self.entries.insert(fingerprint, entry);
    }
}

/// Formats a timestamp the way the state file stores it.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Extension of a path including the leading dot, or an empty string.
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
