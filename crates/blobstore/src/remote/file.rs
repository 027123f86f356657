//! An offset-addressable file emulated over an object store.
//!
//! A handle is always in exactly one of three I/O states:
//!
//! | state     | read at offset              | write at offset                 | seek / stat / close |
//! |-----------|-----------------------------|---------------------------------|---------------------|
//! | `Idle`    | ranged GET, go `Reading`    | open buffer, go `Writing`       | stays `Idle`        |
//! | `Reading` | reuse stream if positioned, | drop stream, open buffer,       | keeps the stream    |
//! |           | otherwise fresh ranged GET  | go `Writing`                    |                     |
//! | `Writing` | commit, ranged GET,         | append if positioned, otherwise | commit, go `Idle`   |
//! |           | go `Reading`                | commit and open a new buffer    |                     |
//!
//! A buffer is committed as one whole-object PUT. A buffer that starts past
//! offset zero carries the multipart hint so the backend keeps the bytes in
//! front of it. A write may start anywhere up to the last known object size;
//! anything beyond is `OutOfRange`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ObjectClient, ObjectInfo, PutOptions};
use crate::error::{from_io, BlobError, Result};
use crate::file::{BlobFile, OpenFlags};
use crate::record::FileStat;
use crate::sniff::{detect_content_type, SNIFF_LEN};

struct RangeReader {
    stream: Box<dyn Read + Send>,
    pos: u64,
}

struct PendingWrite {
    start: u64,
    buffer: Vec<u8>,
}

impl PendingWrite {
    fn end(&self) -> u64 {
        self.start + self.buffer.len() as u64
    }
}

enum IoState {
    Idle,
    Reading(RangeReader),
    Writing(PendingWrite),
}

/// A remote object opened as a file.
pub struct RemoteFile {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    key: String,
    flags: OpenFlags,
    options: PutOptions,
    cancel: CancellationToken,
    offset: u64,
    known_size: u64,
    state: IoState,
    closed: bool,
}

impl RemoteFile {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        flags: OpenFlags,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
            flags,
            options: PutOptions::default(),
            cancel,
            offset: 0,
            known_size: 0,
            state: IoState::Idle,
            closed: false,
        }
    }

    /// Content type and metadata attached to every commit.
    ///
    /// Without a content type, it is sniffed from the first committed bytes.
    pub fn with_options(mut self, options: PutOptions) -> Self {
        self.options = PutOptions {
            resume_from: None,
            ..options
        };
        self
    }

    /// Start out knowing the object size, e.g. from a stat at open time.
    pub fn with_known_size(mut self, size: u64) -> Self {
        self.known_size = size;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Last observed size of the object.
    pub fn known_size(&self) -> u64 {
        self.known_size
    }

    /// Write `buf` at `off`. The offset ends up at `off + buf.len()`.
    pub fn write_at(&mut self, buf: &[u8], off: u64) -> Result<usize> {
        self.ensure_open()?;
        if !self.flags.is_writable() {
            return Err(BlobError::permission_denied(&self.key));
        }

        let appending = matches!(&self.state, IoState::Writing(pending) if pending.end() == off);
        if appending {
            if let IoState::Writing(pending) = &mut self.state {
                pending.buffer.extend_from_slice(buf);
            }
        } else {
            self.sync()?;
            if off > self.known_size {
                return Err(BlobError::OutOfRange {
                    offset: off,
                    size: self.known_size,
                });
            }
            self.state = IoState::Writing(PendingWrite {
                start: off,
                buffer: buf.to_vec(),
            });
        }

        self.offset = off + buf.len() as u64;
        Ok(buf.len())
    }

    /// Commit pending writes and drop any open read stream.
    pub fn sync(&mut self) -> Result<()> {
        self.commit()?;
        self.state = IoState::Idle;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(BlobError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BlobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// PUT the pending buffer, if any. Leaves a reader untouched.
    fn commit(&mut self) -> Result<()> {
        let pending = match std::mem::replace(&mut self.state, IoState::Idle) {
            IoState::Writing(pending) => pending,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        self.check_cancelled()?;

        let mut options = self.options.clone();
        if pending.start > 0 {
            options.resume_from = Some(pending.start);
        } else if options.content_type.is_none() {
            let head = &pending.buffer[..pending.buffer.len().min(SNIFF_LEN)];
            options.content_type = Some(detect_content_type(head).to_string());
        }

        let len = pending.buffer.len();
        let info = self
            .client
            .put_object(&self.bucket, &self.key, pending.buffer, &options)?;
        debug!(key = %self.key, start = pending.start, len, size = info.size, "object committed");
        self.known_size = info.size;
        Ok(())
    }

    fn open_reader(&mut self) -> Result<RangeReader> {
        self.check_cancelled()?;
        let stream = self.client.get_object(&self.bucket, &self.key, self.offset)?;
        Ok(RangeReader {
            stream,
            pos: self.offset,
        })
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut reader = match std::mem::replace(&mut self.state, IoState::Idle) {
            IoState::Reading(reader) if reader.pos == self.offset => reader,
            other => {
                self.state = other;
                self.commit()?;
                self.open_reader()?
            }
        };

        let n = reader
            .stream
            .read(buf)
            .map_err(|e| from_io(&self.key, e))?;
        reader.pos += n as u64;
        self.offset = reader.pos;
        self.known_size = self.known_size.max(reader.pos);
        self.state = IoState::Reading(reader);
        Ok(n)
    }

    fn seek_inner(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        match pos {
            SeekFrom::Start(off) if off == self.offset => return Ok(off),
            SeekFrom::Current(0) => return Ok(self.offset),
            _ => {}
        }

        self.commit()?;
        let target = match pos {
            SeekFrom::Start(off) => i128::from(off),
            SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.fetch_info()?.size) + i128::from(delta),
        };
        self.offset = u64::try_from(target)
            .map_err(|_| BlobError::InvalidInput(format!("seek to {target} on {}", self.key)))?;
        Ok(self.offset)
    }

    fn fetch_info(&mut self) -> Result<ObjectInfo> {
        self.check_cancelled()?;
        let info = self.client.stat_object(&self.bucket, &self.key)?;
        self.known_size = info.size;
        Ok(info)
    }

    /// The key with a trailing slash, as used for listing children.
    fn dir_prefix(&self) -> String {
        let key = self.key.trim_end_matches('/');
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    fn has_children(&self) -> Result<bool> {
        self.check_cancelled()?;
        let children = self.client.list_objects(&self.bucket, &self.dir_prefix())?;
        Ok(!children.is_empty())
    }
}

/// Last path segment of a key. Empty for directory markers.
pub(crate) fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub(crate) fn object_stat(info: &ObjectInfo) -> FileStat {
    let stat = FileStat::file(base_name(&info.key), info.size, info.last_modified)
        .with_etag(info.etag.clone());
    match &info.content_type {
        Some(content_type) => stat.with_content_type(content_type.clone()),
        None => stat,
    }
}

impl BlobFile for RemoteFile {
    fn stat(&mut self) -> Result<FileStat> {
        self.ensure_open()?;
        self.commit()?;
        match self.fetch_info() {
            Ok(info) => Ok(object_stat(&info)),
            Err(err) if err.is_not_found() => {
                if self.key.trim_end_matches('/').is_empty() || self.has_children()? {
                    Ok(FileStat::dir(base_name(self.key.trim_end_matches('/'))))
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    fn read_dir(&mut self, count: usize) -> Result<Vec<FileStat>> {
        if !self.stat()?.is_dir {
            return Err(BlobError::NotADirectory {
                name: self.key.clone(),
            });
        }

        self.check_cancelled()?;
        let mut entries: Vec<FileStat> = self
            .client
            .list_objects(&self.bucket, &self.dir_prefix())?
            .iter()
            .filter(|info| !base_name(&info.key).is_empty())
            .map(object_stat)
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if count > 0 {
            entries.truncate(count);
        }
        Ok(entries)
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(BlobError::NotSupported("truncate on remote objects"))
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        let result = self.commit();
        self.state = IoState::Idle;
        result
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_inner(buf)?)
    }
}

impl Write for RemoteFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_at(buf, self.offset)?)
    }

    /// Commits the pending buffer. Further writes continue the object.
    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        Ok(self.commit()?)
    }
}

impl Seek for RemoteFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_inner(pos)?)
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.closed || !matches!(self.state, IoState::Writing(_)) {
            return;
        }
        if let Err(err) = self.commit() {
            warn!(key = %self.key, error = %err, "dropping uncommitted remote writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryObjectClient;

    const BUCKET: &str = "bucket";

    fn client() -> Arc<MemoryObjectClient> {
        Arc::new(MemoryObjectClient::new())
    }

    fn open(client: &Arc<MemoryObjectClient>, key: &str, flags: OpenFlags) -> RemoteFile {
        RemoteFile::new(client.clone(), BUCKET, key, flags, CancellationToken::new())
    }

    fn contents(client: &Arc<MemoryObjectClient>, key: &str) -> Vec<u8> {
        let mut out = Vec::new();
        client
            .get_object(BUCKET, key, 0)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_write_close_read() {
        let client = client();
        let mut file = open(&client, "a/b.txt", OpenFlags::create_truncate());
        file.write_all(b"hello ").unwrap();
        file.write_all(b"world").unwrap();
        file.close().unwrap();
        assert_eq!(contents(&client, "a/b.txt"), b"hello world");

        let mut file = open(&client, "a/b.txt", OpenFlags::read_only());
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(file.known_size(), 11);
    }

    #[test]
    fn test_content_type_is_sniffed() {
        let client = client();
        let mut file = open(&client, "page", OpenFlags::create_truncate());
        file.write_all(b"<!DOCTYPE HTML><html></html>").unwrap();
        file.close().unwrap();

        let info = client.stat_object(BUCKET, "page").unwrap();
        assert_eq!(info.content_type.as_deref(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let client = client();
        let mut file = open(&client, "page", OpenFlags::create_truncate())
            .with_options(PutOptions::default().with_content_type("application/x-custom"));
        file.write_all(b"<html></html>").unwrap();
        file.close().unwrap();

        let info = client.stat_object(BUCKET, "page").unwrap();
        assert_eq!(info.content_type.as_deref(), Some("application/x-custom"));
    }

    #[test]
    fn test_write_past_known_size_is_out_of_range() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        let err = file.write_at(b"x", 5).unwrap_err();
        assert!(matches!(err, BlobError::OutOfRange { offset: 5, size: 0 }));
    }

    #[test]
    fn test_flush_then_continue_resumes() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();
        assert_eq!(file.known_size(), 3);

        file.write_all(b"def").unwrap();
        file.close().unwrap();
        assert_eq!(contents(&client, "k"), b"abcdef");
    }

    #[test]
    fn test_overwrite_in_the_middle() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        file.write_all(b"0123456789").unwrap();
        file.sync().unwrap();

        file.write_at(b"xy", 4).unwrap();
        file.close().unwrap();
        assert_eq!(contents(&client, "k"), b"0123xy");
    }

    #[test]
    fn test_read_after_write_commits() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        file.write_all(b"payload").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pay");
        assert_eq!(file.offset(), 3);
    }

    #[test]
    fn test_seek_positions() {
        let client = client();
        client
            .put_object(BUCKET, "k", b"0123456789".to_vec(), &PutOptions::default())
            .unwrap();
        let mut file = open(&client, "k", OpenFlags::read_only());

        assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 7);
        assert_eq!(file.seek(SeekFrom::Current(-2)).unwrap(), 5);

        let mut rest = String::new();
        file.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "56789");

        let err = file.seek(SeekFrom::Current(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::read_only());
        let err = file.write_at(b"x", 0).unwrap_err();
        assert!(matches!(err, BlobError::PermissionDenied { .. }));
    }

    #[test]
    fn test_truncate_not_supported() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        assert!(matches!(file.truncate(0), Err(BlobError::NotSupported(_))));
    }

    #[test]
    fn test_double_close() {
        let client = client();
        let mut file = open(&client, "k", OpenFlags::create_truncate());
        file.close().unwrap();
        assert!(matches!(file.close(), Err(BlobError::AlreadyClosed)));

        let err = file.read(&mut [0u8; 4]).unwrap_err();
        assert!(matches!(from_io("k", err), BlobError::AlreadyClosed));
    }

    #[test]
    fn test_drop_commits_pending_writes() {
        let client = client();
        {
            let mut file = open(&client, "k", OpenFlags::create_truncate());
            file.write_all(b"late").unwrap();
        }
        assert_eq!(contents(&client, "k"), b"late");
    }

    #[test]
    fn test_stat_synthesizes_directories() {
        let client = client();
        for key in ["dir/b", "dir/a", "dir/", "dir/sub/c"] {
            client.put_object(BUCKET, key, b"x".to_vec(), &PutOptions::default()).unwrap();
        }

        let mut dir = open(&client, "dir", OpenFlags::read_only());
        let stat = dir.stat().unwrap();
        assert!(stat.is_dir);
        assert_eq!(stat.name, "dir");

        let names: Vec<_> = dir.read_dir(0).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(dir.read_dir(2).unwrap().len(), 2);
        assert_eq!(dir.read_dir(50).unwrap().len(), 3);

        let mut root = open(&client, "", OpenFlags::read_only());
        assert!(root.stat().unwrap().is_dir);

        let mut missing = open(&client, "nope", OpenFlags::read_only());
        assert!(missing.stat().unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_dir_on_file_fails() {
        let client = client();
        client.put_object(BUCKET, "f", b"x".to_vec(), &PutOptions::default()).unwrap();
        let mut file = open(&client, "f", OpenFlags::read_only());
        assert!(matches!(file.read_dir(0), Err(BlobError::NotADirectory { .. })));
    }

    #[test]
    fn test_cancelled_token_stops_network_calls() {
        let client = client();
        let cancel = CancellationToken::new();
        let mut file = RemoteFile::new(
            client.clone(),
            BUCKET,
            "k",
            OpenFlags::create_truncate(),
            cancel.clone(),
        );
        file.write_all(b"never stored").unwrap();
        cancel.cancel();

        assert!(matches!(file.close(), Err(BlobError::Cancelled)));
        assert!(client.stat_object(BUCKET, "k").unwrap_err().is_not_found());
    }
}
