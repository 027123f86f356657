//! Digest: the content name of a blob.
//!
//! A digest is the CRC32 (IEEE) of the content followed by its MD5, twenty
//! bytes in all, encoded with the standard base32 alphabet. Twenty bytes
//! encode to exactly 32 characters, so no padding ever appears.
//!
//! Both hashes are computed in a single pass by [`DigestWriter`], which fans
//! every write out to an inner writer and the two hashers. The result does
//! not depend on how the stream was chunked.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use data_encoding::BASE32;
use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{BlobError, Result};

/// Length of an encoded digest.
pub const DIGEST_LEN: usize = 32;

const RAW_LEN: usize = 20;

/// A content digest: 32 characters from the base32 alphabet `A-Z2-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Build a digest from its two component hashes.
    pub fn from_parts(crc32: u32, md5: [u8; 16]) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..4].copy_from_slice(&crc32.to_be_bytes());
        raw[4..].copy_from_slice(&md5);
        Self(BASE32.encode(&raw))
    }

    /// Hash a byte slice.
    pub fn from_data(data: &[u8]) -> Self {
        let md5: [u8; 16] = Md5::digest(data).into();
        Self::from_parts(crc32fast::hash(data), md5)
    }

    /// Recover the CRC32 and MD5 encoded in this digest.
    pub fn parts(&self) -> (u32, [u8; 16]) {
        // Construction guarantees a valid 32-char encoding.
        let raw = decode_raw(&self.0).unwrap_or([0u8; RAW_LEN]);
        let crc32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&raw[4..]);
        (crc32, md5)
    }

    pub fn crc32(&self) -> u32 {
        self.parts().0
    }

    /// Hex-encoded MD5 component.
    pub fn md5_hex(&self) -> String {
        hex::encode(self.parts().1)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

fn decode_raw(s: &str) -> Option<[u8; RAW_LEN]> {
    if s.len() != DIGEST_LEN {
        return None;
    }
    let bytes = BASE32.decode(s.as_bytes()).ok()?;
    bytes.try_into().ok()
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        match decode_raw(s) {
            Some(_) => Ok(Self(s.to_string())),
            None => Err(BlobError::InvalidInput(format!("malformed digest {s:?}"))),
        }
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything learned about a stream while it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSummary {
    pub digest: Digest,
    pub crc32: u32,
    pub md5_hex: String,
    pub size: u64,
}

/// Fan-out writer: forwards bytes to `inner` while hashing them.
pub struct DigestWriter<W> {
    inner: W,
    crc32: crc32fast::Hasher,
    md5: Md5,
    size: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc32: crc32fast::Hasher::new(),
            md5: Md5::new(),
            size: 0,
        }
    }

    /// Stop hashing and hand back the inner writer.
    pub fn finish(self) -> (W, DigestSummary) {
        let crc32 = self.crc32.finalize();
        let md5: [u8; 16] = self.md5.finalize().into();
        let summary = DigestSummary {
            digest: Digest::from_parts(crc32, md5),
            crc32,
            md5_hex: hex::encode(md5),
            size: self.size,
        };
        (self.inner, summary)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Only hash what the inner writer accepted.
        let n = self.inner.write(buf)?;
        self.crc32.update(&buf[..n]);
        self.md5.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash a stream without keeping it.
pub fn digest_of(reader: &mut dyn Read) -> io::Result<DigestSummary> {
    let mut writer = DigestWriter::new(io::sink());
    io::copy(reader, &mut writer)?;
    Ok(writer.finish().1)
}
