//! Error taxonomy shared by the local store, the registry and the remote adapter.

use std::io;
use thiserror::Error;

/// Placeholder used in errors raised before a blob has a name.
///
/// Internal temporary paths never reach the caller.
pub const TEMPORARY_FILE: &str = "<temporary file>";

/// Errors produced by blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("{name}: no such blob")]
    NotFound { name: String },

    #[error("{name}: permission denied")]
    PermissionDenied { name: String },

    #[error("{name}: not a directory")]
    NotADirectory { name: String },

    #[error("file already closed")]
    AlreadyClosed,

    #[error("write at offset {offset} is out of range (object size {size})")]
    OutOfRange { offset: u64, size: u64 },

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("unknown backend {0:?} (not registered)")]
    UnknownBackend(String),

    #[error("connection string cannot be empty")]
    EmptyUrl,

    #[error("connection string has no scheme")]
    NoScheme,

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result alias for blob storage operations.
pub type Result<T> = std::result::Result<T, BlobError>;

impl BlobError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn permission_denied(name: impl Into<String>) -> Self {
        Self::PermissionDenied { name: name.into() }
    }

    /// Wrap an I/O error with the caller-visible name.
    ///
    /// `NotFound` and `PermissionDenied` I/O errors are lifted into the
    /// matching variants so callers can match on them directly.
    pub fn io(name: impl Into<String>, source: io::Error) -> Self {
        let name = name.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { name },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { name },
            _ => Self::Io { name, source },
        }
    }

    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(err))
    }

    /// Closest `std::io::ErrorKind` for this error.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound { .. } => io::ErrorKind::NotFound,
            Self::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
            Self::NotADirectory { .. } => io::ErrorKind::InvalidInput,
            Self::AlreadyClosed => io::ErrorKind::BrokenPipe,
            Self::OutOfRange { .. } | Self::InvalidInput(_) => io::ErrorKind::InvalidInput,
            Self::NotSupported(_) => io::ErrorKind::Unsupported,
            Self::UnknownBackend(_)
            | Self::EmptyUrl
            | Self::NoScheme
            | Self::InvalidConnectionString(_) => io::ErrorKind::InvalidInput,
            Self::Cancelled => io::ErrorKind::Interrupted,
            Self::Io { source, .. } => source.kind(),
            Self::Transport(_) => io::ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<BlobError> for io::Error {
    fn from(err: BlobError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// Recover a `BlobError` from an `io::Error` produced by this crate.
///
/// Errors raised by other layers are wrapped as `Io` with the given name.
pub fn from_io(name: &str, err: io::Error) -> BlobError {
    if !err.get_ref().is_some_and(|inner| inner.is::<BlobError>()) {
        return BlobError::io(name, err);
    }
    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<BlobError>()) {
        Some(Ok(blob)) => *blob,
        Some(Err(other)) => BlobError::io(name, io::Error::new(kind, other)),
        None => BlobError::io(name, io::Error::from(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_is_lifted() {
        let err = BlobError::io("ABC", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "ABC: no such blob");
    }

    #[test]
    fn test_roundtrip_through_io_error() {
        let io_err: io::Error = BlobError::OutOfRange { offset: 9, size: 3 }.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);

        let back = from_io("x", io_err);
        assert!(matches!(back, BlobError::OutOfRange { offset: 9, size: 3 }));
    }

    #[test]
    fn test_foreign_io_error_wrapped_with_name() {
        let err = from_io("name", io::Error::other("disk on fire"));
        assert!(matches!(err, BlobError::Io { ref name, .. } if name == "name"));
    }
}
