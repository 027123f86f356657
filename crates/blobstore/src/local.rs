//! LocalStore: filesystem-based content addressable blob storage.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── ~tmpXXXXXX          # In-flight create, renamed into place when done
//! ├── P/
//! │   └── KQ/
//! │       └── 5VXHTMEDTK7F6OBIPNUWXXMXGD4UB
//! └── A/
//!     └── B2/
//!         └── ...
//! ```
//!
//! Content is written once: a second create of the same bytes only touches
//! the modification time of the existing file. That time is also what the
//! `clean` sweep uses to decide what has gone stale.

use std::fs::{self, File, FileTimes};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, trace};
use walkdir::WalkDir;

use crate::config::{StoreConfig, DEFAULT_DIR_MODE};
use crate::digest::{digest_of, Digest, DigestWriter};
use crate::error::{BlobError, Result, TEMPORARY_FILE};
use crate::file::{BlobFile, FileSystem};
use crate::keyed_mutex::KeyedMutex;
use crate::record::{BlobRecord, FileStat};
use crate::shard;
use crate::sniff::{detect_content_type, SNIFF_LEN};

const READ_BUFFER: usize = 4 << 10;
const TEMP_PREFIX: &str = "~tmp";

/// Filesystem-based blob store.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    dir_mode: u32,
    lifetime: Duration,
    locks: KeyedMutex,
}

impl LocalStore {
    /// Open a store described by `config`, creating its root if needed.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let store = Self {
            root: config.root.clone(),
            dir_mode: config.dir_mode,
            lifetime: config.lifetime(),
            locks: KeyedMutex::new(),
        };
        store
            .create_dirs(&store.root)
            .map_err(|e| BlobError::io(store.root.display().to_string(), e))?;
        Ok(store)
    }

    /// Open a store rooted at `root`.
    pub fn at_path(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_permissions(root, DEFAULT_DIR_MODE)
    }

    /// Open a store whose directories are created with `dir_mode`.
    pub fn with_permissions(root: impl Into<PathBuf>, dir_mode: u32) -> Result<Self> {
        let mut config = StoreConfig::with_root(root);
        config.dir_mode = dir_mode;
        Self::new(&config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `name`, whether or not it exists.
    ///
    /// `None` when the name is too short to be a digest.
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        shard::resolve(&self.root, name)
    }

    /// Store the contents of `reader`.
    ///
    /// The stream goes to a temporary file in the root while it is hashed and
    /// its first bytes are sniffed for a content type. The temporary file is
    /// then renamed to its sharded location, unless the same content is
    /// already there, in which case that file's times are refreshed instead.
    pub fn create(&self, reader: impl Read) -> Result<BlobRecord> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| BlobError::io(TEMPORARY_FILE, e))?;

        let mut reader = BufReader::with_capacity(READ_BUFFER, reader);
        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut reader)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| BlobError::io(TEMPORARY_FILE, e))?;
        let mimetype = detect_content_type(&head);

        let mut writer = DigestWriter::new(tmp.as_file_mut());
        writer
            .write_all(&head)
            .and_then(|_| io::copy(&mut reader, &mut writer))
            .and_then(|_| writer.flush())
            .map_err(|e| BlobError::io(TEMPORARY_FILE, e))?;
        let (_, summary) = writer.finish();

        let name = summary.digest.to_string();
        let path = self
            .path_for(&name)
            .ok_or_else(|| BlobError::not_found(&name))?;
        let record = BlobRecord::from_summary(summary, &path, mimetype);

        // Same content already stored: refresh it and let `tmp` be dropped.
        if touch(&path).is_ok() {
            debug!(name = %name, size = record.size, "blob already stored");
            return Ok(record);
        }

        if let Some(parent) = path.parent() {
            self.create_dirs(parent)
                .map_err(|e| BlobError::io(&name, e))?;
        }
        tmp.persist(&path)
            .map_err(|e| BlobError::io(&name, e.error))?;

        debug!(name = %name, size = record.size, mimetype, "blob stored");
        Ok(record)
    }

    /// Open a stored blob for reading.
    ///
    /// Opening counts as use: the blob's times are refreshed so a sweep
    /// keeps it.
    pub fn open(&self, name: &str) -> Result<LocalFile> {
        let name = logical_name(name);
        let path = self
            .path_for(name)
            .ok_or_else(|| BlobError::not_found(name))?;

        let file = File::open(&path).map_err(|e| BlobError::io(name, e))?;
        let meta = file.metadata().map_err(|e| BlobError::io(name, e))?;
        if meta.is_dir() {
            return Err(BlobError::permission_denied(name));
        }

        // Setting times on our own handle needs ownership, not write access.
        if let Err(err) = touch_file(&file) {
            debug!(name, error = %err, "failed to refresh blob times");
        }
        trace!(name, size = meta.len(), "blob opened");

        Ok(LocalFile::new(name, file))
    }

    /// Delete a blob, then any shard directories it leaves empty.
    pub fn remove(&self, name: &str) -> Result<()> {
        let name = logical_name(name);
        let _guard = self.locks.lock(name);

        let path = self
            .path_for(name)
            .ok_or_else(|| BlobError::not_found(name))?;
        fs::remove_file(&path).map_err(|e| BlobError::io(name, e))?;
        self.compact(&path);

        debug!(name, "blob removed");
        Ok(())
    }

    /// Describe a stored blob without refreshing its times.
    pub fn stat(&self, name: &str) -> Result<BlobRecord> {
        let name = logical_name(name);
        let path = self
            .path_for(name)
            .ok_or_else(|| BlobError::not_found(name))?;

        let mut file = File::open(&path).map_err(|e| BlobError::io(name, e))?;
        let meta = file.metadata().map_err(|e| BlobError::io(name, e))?;
        if meta.is_dir() {
            return Err(BlobError::permission_denied(name));
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut file)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| BlobError::io(name, e))?;

        let (crc32, md5) = match name.parse::<Digest>() {
            Ok(digest) => (digest.crc32(), digest.md5_hex()),
            // Not a digest this store produced; hash the content instead.
            Err(_) => {
                file.seek(SeekFrom::Start(0))
                    .and_then(|_| digest_of(&mut file))
                    .map(|summary| (summary.crc32, summary.md5_hex))
                    .map_err(|e| BlobError::io(name, e))?
            }
        };

        Ok(BlobRecord {
            name: name.to_string(),
            path,
            mimetype: detect_content_type(&head).to_string(),
            size: meta.len(),
            crc32,
            md5,
        })
    }

    /// Check whether `name` is stored as a regular file.
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name)
            .and_then(|path| fs::metadata(path).ok())
            .is_some_and(|meta| meta.is_file())
    }

    /// Remove blobs whose modification time is older than `lifetime`.
    ///
    /// A zero lifetime empties the store. Failures to delete individual
    /// entries are logged and skipped; a missing root is nothing to clean.
    pub fn clean(&self, lifetime: Duration) -> Result<()> {
        if lifetime.is_zero() {
            return self.clean_all();
        }

        let cutoff = SystemTime::now()
            .checked_sub(lifetime)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0usize;

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => {
                    if err.path() == Some(self.root.as_path()) {
                        return Ok(());
                    }
                    // Removed underneath us.
                    continue;
                }
                Err(err) => {
                    let root = self.root.display().to_string();
                    return Err(BlobError::io(root, io::Error::other(err)));
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            let modified = match entry.metadata().map(|meta| meta.modified()) {
                Ok(Ok(modified)) => modified,
                _ => continue,
            };
            if modified > cutoff {
                continue;
            }

            let name = self.name_of(entry.path());
            let _guard = match name.as_deref() {
                Some(name) => match self.locks.try_lock(name) {
                    Some(guard) => Some(guard),
                    // Being removed right now.
                    None => continue,
                },
                None => None,
            };

            if let Err(err) = fs::remove_file(entry.path()) {
                debug!(path = %entry.path().display(), error = %err, "failed to remove stale entry");
                continue;
            }
            self.compact(entry.path());
            removed += 1;
        }

        info!(removed, lifetime_secs = lifetime.as_secs(), "clean sweep finished");
        Ok(())
    }

    /// Run [`clean`](Self::clean) with the configured lifetime.
    pub fn sweep(&self) -> Result<()> {
        self.clean(self.lifetime)
    }

    /// Remove every entry under the root.
    pub fn clean_all(&self) -> Result<()> {
        let root_name = || self.root.display().to_string();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(BlobError::io(root_name(), err)),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = entry.map_err(|e| BlobError::io(root_name(), e))?;
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(BlobError::io(root_name(), err)),
            }
        }

        info!(removed, "store emptied");
        Ok(())
    }

    /// Try to remove the two shard directories above `path`.
    ///
    /// Stops at the first directory that is not empty, and never touches the
    /// root itself.
    fn compact(&self, path: &Path) {
        let mut dir = path.parent();
        for _ in 0..2 {
            let Some(current) = dir else { return };
            if current == self.root || !current.starts_with(&self.root) {
                return;
            }
            if fs::remove_dir(current).is_err() {
                return;
            }
            trace!(dir = %current.display(), "removed empty shard directory");
            dir = current.parent();
        }
    }

    /// Blob name of a sharded path, if it is one.
    fn name_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel.iter().map(|c| c.to_str()).collect::<Option<_>>()?;
        match parts.as_slice() {
            [top, mid, rest] => Some(format!("{top}{mid}{rest}")),
            _ => None,
        }
    }

    fn create_dirs(&self, dir: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_mode);
        }
        builder.create(dir)
    }
}

impl FileSystem for LocalStore {
    fn open(&self, name: &str) -> Result<Box<dyn BlobFile>> {
        LocalStore::open(self, name).map(|file| Box::new(file) as Box<dyn BlobFile>)
    }
}

fn logical_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// Set access and modification times of an existing file to now.
fn touch(path: &Path) -> io::Result<()> {
    touch_file(&File::options().read(true).open(path)?)
}

fn touch_file(file: &File) -> io::Result<()> {
    let now = SystemTime::now();
    file.set_times(FileTimes::new().set_accessed(now).set_modified(now))
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// A read-only handle on a local blob.
#[derive(Debug)]
pub struct LocalFile {
    name: String,
    file: Option<File>,
}

impl LocalFile {
    fn new(name: &str, file: File) -> Self {
        Self {
            name: name.to_string(),
            file: Some(file),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(BlobError::AlreadyClosed)
    }
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.file()?.read(buf)?)
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.file()?.seek(pos)?)
    }
}

impl Write for LocalFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.file()?;
        Err(BlobError::permission_denied(&self.name).into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobFile for LocalFile {
    fn stat(&mut self) -> Result<FileStat> {
        let meta = self
            .file()?
            .metadata()
            .map_err(|e| BlobError::io(&self.name, e))?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(FileStat::file(&self.name, meta.len(), modified))
    }

    fn read_dir(&mut self, _count: usize) -> Result<Vec<FileStat>> {
        self.file()?;
        Err(BlobError::NotADirectory {
            name: self.name.clone(),
        })
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        self.file()?;
        Err(BlobError::permission_denied(&self.name))
    }

    fn close(&mut self) -> Result<()> {
        self.file.take().map(drop).ok_or(BlobError::AlreadyClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::at_path(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_create_and_read_back() -> anyhow::Result<()> {
        let (store, _temp) = store();

        let record = store.create(&b"Hello, World!"[..])?;
        assert_eq!(record.size, 13);
        assert_eq!(record.mimetype, "text/plain; charset=utf-8");
        assert_eq!(record.name, Digest::from_data(b"Hello, World!").as_str());
        assert_eq!(record.path, store.path_for(&record.name).unwrap());

        let mut data = String::new();
        store.open(&record.name)?.read_to_string(&mut data)?;
        assert_eq!(data, "Hello, World!");
        Ok(())
    }

    #[test]
    fn test_create_leaves_no_temp_files() -> anyhow::Result<()> {
        let (store, temp) = store();
        store.create(&b"one"[..])?;
        store.create(&b"one"[..])?;

        let leftovers: Vec<_> = fs::read_dir(temp.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_read_error_cleans_up() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("boom"))
            }
        }

        let (store, temp) = store();
        let err = store.create(Broken).unwrap_err();
        assert!(err.to_string().starts_with(TEMPORARY_FILE));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_open_directory_is_permission_denied() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let name = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
        fs::create_dir_all(store.path_for(name).unwrap())?;

        let err = store.open(name).unwrap_err();
        assert!(matches!(err, BlobError::PermissionDenied { .. }));
        Ok(())
    }

    #[test]
    fn test_stat_matches_create() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let record = store.create(&b"<html><body>x</body></html>"[..])?;
        assert_eq!(record.mimetype, "text/html; charset=utf-8");

        let stat = store.stat(&record.name)?;
        assert_eq!(stat, record);
        Ok(())
    }

    #[test]
    fn test_stat_of_foreign_name_hashes_content() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let name = "this-is-not-a-digest-but-long";
        let path = store.path_for(name).unwrap();
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, b"abc")?;

        let stat = store.stat(name)?;
        assert_eq!(stat.crc32, 0x3524_41C2);
        assert_eq!(stat.md5, "900150983cd24fb0d6963f7d28e17f72");
        Ok(())
    }

    #[test]
    fn test_exists() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let record = store.create(&b"existence test"[..])?;
        assert!(store.exists(&record.name));
        assert!(store.exists(&format!("/{}", record.name)));
        assert!(!store.exists("short"));
        assert!(!store.exists(Digest::from_data(b"missing").as_str()));
        Ok(())
    }

    #[test]
    fn test_local_file_is_read_only() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let record = store.create(&b"read only"[..])?;
        let mut file = store.open(&record.name)?;

        assert!(file.write(b"x").is_err());
        assert!(matches!(
            file.truncate(0),
            Err(BlobError::PermissionDenied { .. })
        ));
        assert!(matches!(
            file.read_dir(0),
            Err(BlobError::NotADirectory { .. })
        ));
        assert_eq!(file.stat()?.size, 9);
        Ok(())
    }

    #[test]
    fn test_local_file_close_twice() -> anyhow::Result<()> {
        let (store, _temp) = store();
        let record = store.create(&b"close me"[..])?;
        let mut file = store.open(&record.name)?;

        file.close()?;
        assert!(matches!(file.close(), Err(BlobError::AlreadyClosed)));

        let mut buf = [0u8; 4];
        let err = file.read(&mut buf).unwrap_err();
        assert!(matches!(
            crate::error::from_io(file.name(), err),
            BlobError::AlreadyClosed
        ));
        Ok(())
    }

    #[test]
    fn test_compaction_never_removes_root() -> anyhow::Result<()> {
        let (store, temp) = store();
        let stray = temp.path().join("stray");
        fs::write(&stray, b"x")?;
        fs::remove_file(&stray)?;
        store.compact(&stray);
        assert!(temp.path().exists());
        Ok(())
    }

    #[test]
    fn test_sweep_uses_configured_lifetime() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let config = StoreConfig {
            lifetime_secs: 3600,
            ..StoreConfig::with_root(temp_dir.path())
        };
        let store = LocalStore::new(&config)?;
        let stale = store.create(&b"stale"[..])?;
        let fresh = store.create(&b"fresh"[..])?;
        let then = SystemTime::now() - Duration::from_secs(2 * 3600);
        File::options()
            .write(true)
            .open(&stale.path)?
            .set_times(FileTimes::new().set_modified(then))?;

        store.sweep()?;

        assert!(!store.exists(&stale.name));
        assert!(store.exists(&fresh.name));
        Ok(())
    }

    #[test]
    fn test_errors_carry_logical_name() {
        let (store, _temp) = store();
        let name = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

        for err in [
            store.open(&format!("/{name}")).unwrap_err(),
            store.stat(&format!("/{name}")).unwrap_err(),
        ] {
            assert!(matches!(err, BlobError::NotFound { name: ref n } if n == name));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_permissions() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let store = LocalStore::with_permissions(temp_dir.path().join("root"), 0o750)?;
        let record = store.create(&b"perm"[..])?;

        let shard_dir = record.path.parent().unwrap();
        let mode = fs::metadata(shard_dir)?.permissions().mode() & 0o777;
        // The process umask may clear bits but never adds any.
        assert_eq!(mode & !0o750, 0);
        Ok(())
    }
}
