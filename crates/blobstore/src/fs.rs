//! File-serving facade: a local store, optionally fronted by a remote backend.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::file::{BlobFile, FileSystem};
use crate::local::LocalStore;
use crate::registry::{Backend, BackendRegistry};

/// Routes `open` and `remove` to the remote backend when one is attached,
/// otherwise to the local store.
pub struct BlobFs {
    local: LocalStore,
    remote: Option<Arc<dyn Backend>>,
}

impl BlobFs {
    pub fn new(local: LocalStore) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Build from configuration, resolving `config.remote` through `registry`.
    pub fn from_config(
        config: &StoreConfig,
        registry: &BackendRegistry,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let fs = Self::new(LocalStore::new(config)?);
        match &config.remote {
            Some(conn) => {
                let remote = registry.resolve(cancel, conn)?;
                info!(root = %config.root.display(), "serving from remote backend");
                Ok(fs.with_remote(remote))
            }
            None => Ok(fs),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn Backend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn Backend>> {
        self.remote.as_ref()
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let name = name.strip_prefix('/').unwrap_or(name);
        match &self.remote {
            Some(remote) => remote.remove(name),
            None => self.local.remove(name),
        }
    }
}

impl FileSystem for BlobFs {
    fn open(&self, name: &str) -> Result<Box<dyn BlobFile>> {
        let name = name.strip_prefix('/').unwrap_or(name);
        match &self.remote {
            Some(remote) => remote.open(name),
            None => FileSystem::open(&self.local, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::PutOptions;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_local_routing() {
        let temp_dir = TempDir::new().unwrap();
        let fs = BlobFs::new(LocalStore::at_path(temp_dir.path()).unwrap());
        let record = fs.local().create(&b"served locally"[..]).unwrap();

        let mut text = String::new();
        fs.open(&format!("/{}", record.name))
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "served locally");

        fs.remove(&format!("/{}", record.name)).unwrap();
        assert!(!fs.local().exists(&record.name));
        assert!(fs.remote().is_none());
    }

    #[test]
    fn test_remote_routing_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            remote: Some("mem://local/site".to_string()),
            ..StoreConfig::with_root(temp_dir.path())
        };
        let fs = BlobFs::from_config(
            &config,
            &BackendRegistry::with_defaults(),
            &CancellationToken::new(),
        )
        .unwrap();

        let remote = fs.remote().unwrap();
        remote
            .upload("/index.html", &mut &b"<p>hi</p>"[..], PutOptions::default())
            .unwrap();

        let mut text = String::new();
        fs.open("/index.html").unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "<p>hi</p>");

        fs.remove("/index.html").unwrap();
        assert!(!remote.exists("index.html").unwrap());
    }

    #[test]
    fn test_unknown_remote_scheme_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            remote: Some("gcs://bucket".to_string()),
            ..StoreConfig::with_root(temp_dir.path())
        };
        let result = BlobFs::from_config(
            &config,
            &BackendRegistry::with_defaults(),
            &CancellationToken::new(),
        );
        assert!(result.is_err());
    }
}
