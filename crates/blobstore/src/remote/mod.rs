//! Remote storage over an object store.
//!
//! Object stores offer whole-object PUT and byte-ranged GET but nothing like a
//! file. [`RemoteFile`] emulates an offset-addressable file on top of those
//! two primitives and [`RemoteStore`] exposes it through the [`Backend`]
//! contract.
//!
//! The SDK binding lives behind [`ObjectClient`]. [`MemoryObjectClient`] is
//! the in-process implementation registered under the `mem` scheme.
//!
//! [`Backend`]: crate::registry::Backend

pub mod conn;
pub mod file;
pub mod memory;
pub mod store;

use std::collections::BTreeMap;
use std::io::Read;
use std::time::SystemTime;

use crate::error::Result;

pub use conn::RemoteConfig;
pub use file::RemoteFile;
pub use memory::MemoryObjectClient;
pub use store::RemoteStore;

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: SystemTime,
    pub etag: String,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Options of a whole-object PUT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,

    /// User metadata stored with the object.
    pub metadata: BTreeMap<String, String>,

    /// Multipart hint: the body continues the existing object at this
    /// offset, whose first `resume_from` bytes are kept.
    pub resume_from: Option<u64>,
}

impl PutOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The primitives an object store offers.
///
/// Implementations are blocking. A missing object is `BlobError::NotFound`;
/// anything the transport reports goes out as `BlobError::Transport`.
pub trait ObjectClient: Send + Sync {
    /// Replace `key` with `body`, or continue it when `resume_from` is set.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo>;

    /// Ranged GET from `offset` to the end of the object.
    ///
    /// An offset at or past the end yields an empty stream.
    fn get_object(&self, bucket: &str, key: &str, offset: u64) -> Result<Box<dyn Read + Send>>;

    fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Every object whose key starts with `prefix`, sorted by key.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;

    fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Server-side copy.
    fn copy_object(&self, bucket: &str, from: &str, to: &str) -> Result<()>;
}
