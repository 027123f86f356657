//! Descriptions of stored blobs and of file-like entries.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::digest::DigestSummary;

/// Everything known about a stored blob.
///
/// Returned by `create` and `stat`. The same content always yields the same
/// record, whichever call produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Content digest, also the blob's name.
    pub name: String,

    /// Where the blob lives: a filesystem path or an object key.
    pub path: PathBuf,

    /// Sniffed MIME type.
    pub mimetype: String,

    /// Size in bytes.
    pub size: u64,

    pub crc32: u32,

    /// Hex-encoded MD5.
    pub md5: String,
}

impl BlobRecord {
    pub fn from_summary(summary: DigestSummary, path: impl Into<PathBuf>, mimetype: &str) -> Self {
        Self {
            name: summary.digest.into_inner(),
            path: path.into(),
            mimetype: mimetype.to_string(),
            size: summary.size,
            crc32: summary.crc32,
            md5: summary.md5_hex,
        }
    }
}

/// Metadata of a file-like entry: a local blob, a remote object or a
/// synthesized remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Base name of the entry.
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl FileStat {
    pub fn file(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_dir: false,
            content_type: None,
            etag: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            is_dir: true,
            content_type: None,
            etag: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir
    }
}
