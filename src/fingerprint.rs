//! Content fingerprints (MD5 hex digests).
//!
//! MD5 is used because a single-part S3 entity tag is the MD5 of the object
//! body, which lets the state file recognize a file from either direction.
//! Collisions are not handled; the digest is assumed collision-resistant for
//! synchronization purposes.

use crate::error::SyncError;
use md5::{Digest, Md5};
use std::path::Path;

/// Computes the MD5 hash of a local file.
///
/// This function reads the file in chunks to avoid loading large files
/// entirely into memory. It runs in a blocking task to avoid blocking
/// the async runtime.
pub async fn compute_file_md5(path: &Path) -> Result<String, SyncError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        use std::io::Read;

        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = StreamingFingerprint::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finish())
    })
    .await
    .map_err(|e| SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Incremental fingerprint for bytes that are being streamed somewhere else.
#[derive(Default)]
pub struct StreamingFingerprint {
    hasher: Md5,
}

impl StreamingFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Whether an entity tag can be compared against a content MD5.
///
/// Multipart uploads get tags of the form `<md5-of-part-md5s>-<parts>`,
/// which say nothing about the body's own digest.
pub fn is_plain_md5_etag(etag: &str) -> bool {
    etag.len() == 32 && !etag.contains('-') && etag.chars().all(|c| c.is_ascii_hexdigit())
}

/// Strips the quotes S3 puts around entity tags.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}
