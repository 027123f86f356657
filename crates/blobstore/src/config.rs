//! Store configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `BLOBSTORE_ROOT`: Root directory of the local store
//! - `BLOBSTORE_REMOTE`: Connection string of a remote backend
//! - `BLOBSTORE_LIFETIME_SECS`: Retention used by `clean`
//! - `BLOBSTORE_DIR_MODE`: Octal permissions for created directories
//!
//! Default root: `~/.blobstore`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default permissions of directories created by the store.
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Configuration of a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory. Blobs live under sharded subdirectories of it.
    pub root: PathBuf,

    /// Permissions of directories the store creates (unix only).
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// Blobs untouched for longer than this are removed by a sweep.
    /// Zero means "remove everything".
    #[serde(default)]
    pub lifetime_secs: u64,

    /// Optional remote backend, e.g. `mem://bucket/prefix`.
    #[serde(default)]
    pub remote: Option<String>,
}

fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            dir_mode: DEFAULT_DIR_MODE,
            lifetime_secs: 0,
            remote: None,
        }
    }
}

/// Get the default root (~/.blobstore).
fn default_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".blobstore"))
        .unwrap_or_else(|| PathBuf::from(".blobstore"))
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let root = env::var("BLOBSTORE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let remote = env::var("BLOBSTORE_REMOTE").ok().filter(|s| !s.is_empty());

        let lifetime_secs = match env::var("BLOBSTORE_LIFETIME_SECS") {
            Ok(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid BLOBSTORE_LIFETIME_SECS: {v:?}"))?,
            Err(_) => 0,
        };

        let dir_mode = match env::var("BLOBSTORE_DIR_MODE") {
            Ok(v) => u32::from_str_radix(v.trim().trim_start_matches("0o"), 8)
                .with_context(|| format!("invalid BLOBSTORE_DIR_MODE: {v:?}"))?,
            Err(_) => DEFAULT_DIR_MODE,
        };

        Ok(Self {
            root,
            dir_mode,
            lifetime_secs,
            remote,
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[blobstore]` section:
    /// ```toml
    /// [blobstore]
    /// root = "/var/lib/blobstore"
    /// dir_mode = 0o750
    /// lifetime_secs = 86400
    /// remote = "mem://uploads"
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("failed to load config file: {}", path.display()))
    }

    fn from_toml(contents: &str) -> Result<Self> {
        let table: toml::Table = contents.parse().context("failed to parse TOML")?;

        match table.get("blobstore") {
            Some(section) => section
                .clone()
                .try_into()
                .context("failed to parse [blobstore] section"),
            None => Self::from_env(),
        }
    }

    /// Create a config rooted at a specific directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert!(config.root.to_string_lossy().contains(".blobstore"));
        assert_eq!(config.dir_mode, 0o700);
        assert_eq!(config.lifetime(), Duration::ZERO);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_with_root() {
        let config = StoreConfig::with_root("/srv/blobs");
        assert_eq!(config.root, PathBuf::from("/srv/blobs"));
        assert_eq!(config.dir_mode, DEFAULT_DIR_MODE);
    }

    #[test]
    fn test_from_toml_section() {
        let config = StoreConfig::from_toml(
            r#"
            [blobstore]
            root = "/srv/blobs"
            dir_mode = 0o750
            lifetime_secs = 3600
            remote = "mem://bucket/prefix"
            "#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/blobs"));
        assert_eq!(config.dir_mode, 0o750);
        assert_eq!(config.lifetime(), Duration::from_secs(3600));
        assert_eq!(config.remote.as_deref(), Some("mem://bucket/prefix"));
    }

    #[test]
    fn test_from_toml_defaults_optional_fields() {
        let config = StoreConfig::from_toml("[blobstore]\nroot = \"/a\"\n").unwrap();
        assert_eq!(config.dir_mode, DEFAULT_DIR_MODE);
        assert_eq!(config.lifetime_secs, 0);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_from_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blobstore.toml");
        std::fs::write(&path, "[blobstore]\nroot = 5\n").unwrap();

        let err = StoreConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("blobstore.toml"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = StoreConfig {
            root: PathBuf::from("/custom"),
            dir_mode: 0o755,
            lifetime_secs: 60,
            remote: Some("mem://b".to_string()),
        };
        let text = toml::to_string(&config).unwrap();
        let restored: StoreConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, restored);
    }
}
