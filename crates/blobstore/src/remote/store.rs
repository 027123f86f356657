//! Backend over a bucket of an object store.

use std::io::{self, Read};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ObjectClient, ObjectInfo, PutOptions, RemoteConfig, RemoteFile};
use crate::digest::DigestWriter;
use crate::error::{from_io, BlobError, Result, TEMPORARY_FILE};
use crate::file::{BlobFile, FileSystem, OpenFlags};
use crate::record::{BlobRecord, FileStat};
use crate::registry::Backend;
use crate::shard::shard_key;
use crate::sniff::{detect_content_type, SNIFF_LEN};

/// Names mapped onto keys of one bucket, below an optional prefix.
pub struct RemoteStore {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    prefix: String,
    cancel: CancellationToken,
}

impl RemoteStore {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        bucket: impl Into<String>,
        prefix: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
            cancel,
        }
    }

    pub fn from_config(
        client: Arc<dyn ObjectClient>,
        config: &RemoteConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(client, config.bucket.clone(), &config.prefix, cancel)
    }

    /// Registry factory binding connection strings to `client`.
    ///
    /// Bucket and prefix come from the connection string, so one client
    /// serves any number of stores.
    pub fn factory(
        client: Arc<dyn ObjectClient>,
    ) -> impl Fn(&CancellationToken, &str) -> Result<Arc<dyn Backend>> + Send + Sync + 'static
    {
        move |cancel: &CancellationToken, conn: &str| -> Result<Arc<dyn Backend>> {
            let config = RemoteConfig::parse(conn)?;
            info!(
                scheme = %config.scheme,
                endpoint = %config.endpoint,
                bucket = %config.bucket,
                prefix = %config.prefix,
                "remote store opened"
            );
            let store: Arc<dyn Backend> = Arc::new(Self::from_config(
                Arc::clone(&client),
                &config,
                cancel.clone(),
            ));
            Ok(store)
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key of `name`: backslashes become slashes, leading slashes
    /// are dropped and the store prefix is prepended.
    pub fn key(&self, name: &str) -> String {
        let name = name.replace('\\', "/");
        let name = name.trim_start_matches('/');
        if self.prefix.is_empty() {
            name.to_string()
        } else if name.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    /// Open `name` as a concrete [`RemoteFile`].
    ///
    /// Append mode is rejected before any network traffic. With `create`,
    /// a missing object (or any object, with `truncate`) is replaced by an
    /// empty one right away.
    pub fn open_remote(&self, name: &str, flags: OpenFlags) -> Result<RemoteFile> {
        self.open_with(name, flags, PutOptions::default())
    }

    fn open_with(&self, name: &str, flags: OpenFlags, options: PutOptions) -> Result<RemoteFile> {
        if flags.append {
            return Err(BlobError::NotSupported("append on remote objects"));
        }

        let key = self.key(name);
        let mut file = RemoteFile::new(
            Arc::clone(&self.client),
            self.bucket.clone(),
            key.clone(),
            flags,
            self.cancel.clone(),
        )
        .with_options(options);

        let existing = if flags.is_writable() && !flags.truncate {
            self.head(&key)?
        } else {
            None
        };
        match existing {
            Some(info) => file = file.with_known_size(info.size),
            None if flags.create => {
                file.write_at(&[], 0)?;
                file.sync()?;
            }
            None => {}
        }
        Ok(file)
    }

    /// Store `reader` under its content digest, skipping the upload when an
    /// object with that digest already exists.
    pub fn store_blob(&self, mut reader: impl Read) -> Result<BlobRecord> {
        let mut writer = DigestWriter::new(Vec::new());
        io::copy(&mut reader, &mut writer).map_err(|e| BlobError::io(TEMPORARY_FILE, e))?;
        let (body, summary) = writer.finish();

        let mimetype = detect_content_type(&body[..body.len().min(SNIFF_LEN)]);
        let shard = shard_key(summary.digest.as_str())
            .ok_or_else(|| BlobError::InvalidInput(format!("digest {}", summary.digest)))?;
        let key = self.key(&shard);

        if self.head(&key)?.is_some() {
            debug!(key = %key, "blob already stored");
        } else {
            self.check_cancelled()?;
            self.client.put_object(
                &self.bucket,
                &key,
                body,
                &PutOptions::default().with_content_type(mimetype),
            )?;
            debug!(key = %key, size = summary.size, mimetype, "blob stored");
        }

        Ok(BlobRecord::from_summary(summary, key, mimetype))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BlobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Object metadata, `None` when absent.
    fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.check_cancelled()?;
        match self.client.stat_object(&self.bucket, key) {
            Ok(info) => Ok(Some(info)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl FileSystem for RemoteStore {
    fn open(&self, name: &str) -> Result<Box<dyn BlobFile>> {
        self.open_file(name, OpenFlags::read_only())
    }
}

impl Backend for RemoteStore {
    fn open_file(&self, name: &str, flags: OpenFlags) -> Result<Box<dyn BlobFile>> {
        Ok(Box::new(self.open_with(name, flags, PutOptions::default())?))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.check_cancelled()?;
        self.client.remove_object(&self.bucket, &self.key(name))
    }

    fn remove_all(&self, name: &str) -> Result<()> {
        self.check_cancelled()?;
        let key = self.key(name);
        let dir = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key.trim_end_matches('/'))
        };

        let doomed: Vec<ObjectInfo> = self
            .client
            .list_objects(&self.bucket, &key)?
            .into_iter()
            .filter(|info| info.key == key || info.key.starts_with(&dir))
            .collect();
        for info in &doomed {
            self.check_cancelled()?;
            self.client.remove_object(&self.bucket, &info.key)?;
        }
        debug!(key = %key, removed = doomed.len(), "removed tree");
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (self.key(from), self.key(to));
        if from == to {
            return Ok(());
        }
        self.check_cancelled()?;
        self.client.copy_object(&self.bucket, &from, &to)?;
        self.check_cancelled()?;
        self.client.remove_object(&self.bucket, &from)
    }

    fn stat(&self, name: &str) -> Result<FileStat> {
        self.open_remote(name, OpenFlags::read_only())?.stat()
    }

    fn upload(&self, name: &str, reader: &mut dyn Read, options: PutOptions) -> Result<()> {
        let mut file = self.open_with(name, OpenFlags::read_write(), options)?;
        // An empty upload still produces an object.
        file.write_at(&[], 0)?;
        io::copy(reader, &mut file).map_err(|e| from_io(name, e))?;
        file.close()
    }
}
