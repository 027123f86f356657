//! File interfaces shared by the local and remote stores.
//!
//! [`BlobFile`] is the method set every open handle honors, whether it wraps
//! a local file or emulates one over object storage. [`FileSystem`] is the
//! narrow "open a named resource for reading" shape that a file-serving
//! layer consumes.

use std::io::{Read, Seek, Write};

use crate::error::Result;
use crate::record::FileStat;

/// An open blob handle.
pub trait BlobFile: Read + Write + Seek + Send {
    /// Metadata of the underlying entry.
    ///
    /// Pending writes are committed first, so the size is current.
    fn stat(&mut self) -> Result<FileStat>;

    /// List entries below this handle's name, sorted by name.
    ///
    /// A `count` of zero returns every entry.
    fn read_dir(&mut self, count: usize) -> Result<Vec<FileStat>>;

    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Commit pending writes and release the handle.
    ///
    /// Closing twice fails with `AlreadyClosed`.
    fn close(&mut self) -> Result<()>;
}

/// Something that opens named resources for reading.
pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn BlobFile>>;
}

/// How a handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Read-write, creating or truncating the target.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            append: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.write || self.append
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_constructors() {
        assert!(!OpenFlags::read_only().is_writable());
        assert!(OpenFlags::create_truncate().is_writable());
        assert!(OpenFlags::read_only().append(true).is_writable());

        let flags = OpenFlags::read_write().create(true);
        assert!(flags.create && flags.write && !flags.truncate);
    }
}
