//! Content-addressed blob storage with pluggable remote backends.
//!
//! Blobs are named by a digest of their bytes (CRC-32 followed by MD5,
//! base32 encoded) and kept in a sharded directory tree. The same name can be
//! served from an object store through a file-like adapter.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use blobstore::{BlobFs, FileSystem, LocalStore};
//! use std::io::Read;
//!
//! let store = LocalStore::at_path("/var/lib/blobstore").unwrap();
//!
//! // Store content; identical bytes always get the same name
//! let record = store.create(&b"Hello, World!"[..]).unwrap();
//! println!("Stored as {} ({})", record.name, record.mimetype);
//!
//! // Read it back through the serving facade
//! let fs = BlobFs::new(store);
//! let mut text = String::new();
//! fs.open(&record.name).unwrap().read_to_string(&mut text).unwrap();
//! ```
//!
//! # Remote backends
//!
//! Backends are resolved from connection strings by scheme:
//!
//! ```rust,no_run
//! use blobstore::{BackendRegistry, PutOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = BackendRegistry::with_defaults();
//! let backend = registry
//!     .resolve(&CancellationToken::new(), "mem://local/bucket/prefix")
//!     .unwrap();
//! backend
//!     .upload("hello.txt", &mut &b"hi"[..], PutOptions::default())
//!     .unwrap();
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `BLOBSTORE_ROOT`: Root of the local store (default: `~/.blobstore`)
//! - `BLOBSTORE_REMOTE`: Connection string of a remote backend
//! - `BLOBSTORE_LIFETIME_SECS`: Retention used by `clean`
//! - `BLOBSTORE_DIR_MODE`: Octal permissions for created directories

pub mod config;
pub mod digest;
pub mod error;
pub mod file;
pub mod fs;
pub mod keyed_mutex;
pub mod local;
pub mod record;
pub mod registry;
pub mod remote;
pub mod shard;
pub mod sniff;

// Re-exports for convenience
pub use config::StoreConfig;
pub use digest::{Digest, DigestSummary, DigestWriter};
pub use error::{BlobError, Result};
pub use file::{BlobFile, FileSystem, OpenFlags};
pub use fs::BlobFs;
pub use local::{LocalFile, LocalStore};
pub use record::{BlobRecord, FileStat};
pub use registry::{Backend, BackendFactory, BackendRegistry, RegistryBuilder};
pub use remote::{MemoryObjectClient, ObjectClient, ObjectInfo, PutOptions, RemoteConfig, RemoteStore};
pub use sniff::detect_content_type;
