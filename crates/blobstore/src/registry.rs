//! Backend registry keyed by URL scheme.
//!
//! Factories are registered on a [`RegistryBuilder`] during startup. Building
//! freezes the table into a [`BackendRegistry`], which is cheap to clone and
//! shared by whoever needs to open backends from connection strings.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BlobError, Result};
use crate::file::{BlobFile, FileSystem, OpenFlags};
use crate::record::FileStat;
use crate::remote::{MemoryObjectClient, PutOptions, RemoteStore};

/// A storage backend addressed by names.
pub trait Backend: FileSystem {
    /// Open `name` for writing, creating or truncating it.
    fn create(&self, name: &str) -> Result<Box<dyn BlobFile>> {
        self.open_file(name, OpenFlags::create_truncate())
    }

    fn open_file(&self, name: &str, flags: OpenFlags) -> Result<Box<dyn BlobFile>>;

    fn remove(&self, name: &str) -> Result<()>;

    /// Remove `name` and everything below it.
    fn remove_all(&self, name: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn stat(&self, name: &str) -> Result<FileStat>;

    fn exists(&self, name: &str) -> Result<bool> {
        match self.stat(name) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn is_dir(&self, name: &str) -> Result<bool> {
        Ok(self.stat(name)?.is_dir)
    }

    fn is_file(&self, name: &str) -> Result<bool> {
        Ok(self.stat(name)?.is_file())
    }

    /// Entries below `name`, sorted by name. A `count` of zero returns all.
    fn read_dir(&self, name: &str, count: usize) -> Result<Vec<FileStat>> {
        self.open(name)?.read_dir(count)
    }

    /// Stream `reader` into `name`, attaching `options` to the object.
    fn upload(&self, name: &str, reader: &mut dyn Read, options: PutOptions) -> Result<()>;
}

/// Builds a backend from a cancellation token and a connection string.
pub type BackendFactory =
    Arc<dyn Fn(&CancellationToken, &str) -> Result<Arc<dyn Backend>> + Send + Sync>;

/// The part of `conn` before the first `:`.
pub fn scheme_from_url(conn: &str) -> Result<&str> {
    if conn.is_empty() {
        return Err(BlobError::EmptyUrl);
    }
    match conn.find(':') {
        Some(i) if i >= 1 => Ok(&conn[..i]),
        _ => Err(BlobError::NoScheme),
    }
}

/// Collects factories before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    factories: HashMap<String, BackendFactory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `scheme`.
    ///
    /// # Panics
    ///
    /// Registering the same scheme twice is a startup bug and panics.
    pub fn register<F>(mut self, scheme: &str, factory: F) -> Self
    where
        F: Fn(&CancellationToken, &str) -> Result<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(scheme) {
            panic!("backend scheme {scheme:?} registered twice");
        }
        self.factories.insert(scheme.to_string(), Arc::new(factory));
        self
    }

    /// Register the in-process `mem` backend.
    ///
    /// All `mem://` connections resolved through the built registry share
    /// one object store, partitioned by bucket.
    pub fn with_memory(self) -> Self {
        self.register("mem", RemoteStore::factory(Arc::new(MemoryObjectClient::new())))
    }

    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            factories: Arc::new(self.factories),
        }
    }
}

/// Immutable scheme to factory table.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: Arc<HashMap<String, BackendFactory>>,
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry with the built-in backends.
    pub fn with_defaults() -> Self {
        RegistryBuilder::new().with_memory().build()
    }

    /// Resolve `conn` to a backend through the factory of its scheme.
    pub fn resolve(&self, cancel: &CancellationToken, conn: &str) -> Result<Arc<dyn Backend>> {
        let scheme = scheme_from_url(conn)?;
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| BlobError::UnknownBackend(scheme.to_string()))?;
        debug!(scheme, "resolving backend");
        factory(cancel, conn)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
