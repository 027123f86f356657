//! In-process object store.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use md5::{Digest as _, Md5};

use super::{ObjectClient, ObjectInfo, PutOptions};
use crate::error::{BlobError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<[u8]>,
    last_modified: SystemTime,
    etag: String,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: self.last_modified,
            etag: self.etag.clone(),
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

type Bucket = BTreeMap<String, StoredObject>;

/// Object store held in memory.
///
/// Buckets spring into existence on first write. Objects are immutable
/// snapshots, so readers never observe a concurrent PUT half-applied.
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects in `bucket`.
    pub fn len(&self, bucket: &str) -> usize {
        self.read(|buckets| buckets.get(bucket).map_or(0, BTreeMap::len))
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Bucket>) -> T) -> T {
        f(&self.buckets.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, Bucket>) -> T) -> T {
        f(&mut self.buckets.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.read(|buckets| {
            buckets
                .get(bucket)
                .and_then(|objects| objects.get(key))
                .cloned()
                .ok_or_else(|| BlobError::not_found(key))
        })
    }
}

impl ObjectClient for MemoryObjectClient {
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        self.write(|buckets| {
            let objects = buckets.entry(bucket.to_string()).or_default();

            let (data, content_type) = match options.resume_from {
                Some(start) if start > 0 => {
                    let existing = objects.get(key).ok_or_else(|| BlobError::not_found(key))?;
                    let size = existing.data.len() as u64;
                    if start > size {
                        return Err(BlobError::OutOfRange { offset: start, size });
                    }
                    let mut data = existing.data[..start as usize].to_vec();
                    data.extend_from_slice(&body);
                    let content_type = options
                        .content_type
                        .clone()
                        .or_else(|| existing.content_type.clone());
                    (data, content_type)
                }
                _ => (body, options.content_type.clone()),
            };

            let object = StoredObject {
                etag: format!("\"{}\"", hex::encode(Md5::digest(&data))),
                data: data.into(),
                last_modified: SystemTime::now(),
                content_type,
                metadata: options.metadata.clone(),
            };
            let info = object.info(key);
            objects.insert(key.to_string(), object);
            Ok(info)
        })
    }

    fn get_object(&self, bucket: &str, key: &str, offset: u64) -> Result<Box<dyn Read + Send>> {
        let object = self.object(bucket, key)?;
        let mut cursor = Cursor::new(object.data);
        cursor.set_position(offset);
        Ok(Box::new(cursor))
    }

    fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.object(bucket, key).map(|object| object.info(key))
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self.read(|buckets| {
            buckets
                .get(bucket)
                .map(|objects| {
                    objects
                        .range(prefix.to_string()..)
                        .take_while(|(key, _)| key.starts_with(prefix))
                        .map(|(key, object)| object.info(key))
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.write(|buckets| {
            buckets
                .get_mut(bucket)
                .and_then(|objects| objects.remove(key))
                .map(drop)
                .ok_or_else(|| BlobError::not_found(key))
        })
    }

    fn copy_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        let mut object = self.object(bucket, from)?;
        object.last_modified = SystemTime::now();
        self.write(|buckets| {
            buckets
                .entry(bucket.to_string())
                .or_default()
                .insert(to.to_string(), object);
        });
        Ok(())
    }
}
