//! Error types shared by every filesystem layer.
//!
//! Two shapes exist on purpose:
//! - [`FsErrorCode`] is the thin code returned by [`FsOperations`](crate::FsOperations)
//!   backends. It carries no context and is `Copy`.
//! - [`FsIoError`] is the structured error of the rich [`FsIo`](crate::FsIo)
//!   interface. It carries the path involved and, where available, the
//!   underlying cause.
//!
//! The adapters in [`bridge`](crate::bridge) and [`fsio_ops`](crate::fsio_ops)
//! translate between them.

use std::io;
use thiserror::Error;

/// Result type for operation-table primitives.
pub type OpResult<T> = Result<T, FsErrorCode>;

/// Result type for the rich filesystem interface.
pub type FsIoResult<T> = Result<T, FsIoError>;

/// Native error code returned by operation-table backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FsErrorCode {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("directory not empty")]
    NotEmpty,
    #[error("permission denied")]
    Access,
    #[error("invalid path")]
    InvalidPath,
    #[error("cross-device link")]
    CrossDevice,
    #[error("no space left on device")]
    NoSpace,
    #[error("bad file handle")]
    BadHandle,
    #[error("input/output error")]
    Io,
}

impl FsErrorCode {
    /// Classify a host I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsErrorCode::NotFound,
            io::ErrorKind::AlreadyExists => FsErrorCode::Exists,
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                FsErrorCode::Access
            }
            io::ErrorKind::NotADirectory => FsErrorCode::NotDir,
            io::ErrorKind::IsADirectory => FsErrorCode::IsDir,
            io::ErrorKind::DirectoryNotEmpty => FsErrorCode::NotEmpty,
            io::ErrorKind::CrossesDevices => FsErrorCode::CrossDevice,
            io::ErrorKind::StorageFull => FsErrorCode::NoSpace,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidFilename => {
                FsErrorCode::InvalidPath
            }
            _ => FsErrorCode::Io,
        }
    }
}

impl From<io::Error> for FsErrorCode {
    fn from(err: io::Error) -> Self {
        FsErrorCode::from_io(&err)
    }
}

/// Structured error of the rich filesystem interface.
#[derive(Debug, Error)]
pub enum FsIoError {
    /// A backend primitive failed with a native code.
    #[error("{code}: {path}")]
    Fs { code: FsErrorCode, path: String },

    /// The path was rejected before reaching the backend.
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// Host I/O failure with its original cause.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Stored data failed authentication or is structurally corrupt.
    #[error("integrity check failed for {path}: {reason}")]
    Integrity { path: String, reason: String },

    /// Write attempted through a handle opened read-only.
    #[error("{path} is not open for writing")]
    ReadOnly { path: String },

    /// The handle outlived the filesystem that issued it.
    #[error("file handle already closed")]
    Closed,
}

impl FsIoError {
    pub fn fs(code: FsErrorCode, path: impl Into<String>) -> Self {
        FsIoError::Fs {
            code,
            path: path.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        FsIoError::Io {
            path: path.into(),
            source,
        }
    }

    /// The native code this error collapses to when crossing back into an
    /// operation table.
    pub fn code(&self) -> FsErrorCode {
        match self {
            FsIoError::Fs { code, .. } => *code,
            FsIoError::InvalidPath(_) => FsErrorCode::InvalidPath,
            FsIoError::Io { source, .. } => FsErrorCode::from_io(source),
            FsIoError::Integrity { .. } => FsErrorCode::Io,
            FsIoError::ReadOnly { .. } => FsErrorCode::Access,
            FsIoError::Closed => FsErrorCode::BadHandle,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == FsErrorCode::NotFound
    }
}

/// Failure to assemble a filesystem stack.
#[derive(Debug, Error)]
#[error("error while creating base fs: {reason}")]
pub struct FsInitError {
    reason: String,
}

impl FsInitError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classification() {
        let cases = [
            (io::ErrorKind::NotFound, FsErrorCode::NotFound),
            (io::ErrorKind::AlreadyExists, FsErrorCode::Exists),
            (io::ErrorKind::PermissionDenied, FsErrorCode::Access),
            (io::ErrorKind::DirectoryNotEmpty, FsErrorCode::NotEmpty),
            (io::ErrorKind::UnexpectedEof, FsErrorCode::Io),
        ];
        for (kind, expected) in cases {
            assert_eq!(FsErrorCode::from_io(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_rich_error_collapses_to_code() {
        assert_eq!(
            FsIoError::fs(FsErrorCode::IsDir, "/a").code(),
            FsErrorCode::IsDir
        );
        assert_eq!(
            FsIoError::InvalidPath("a".into()).code(),
            FsErrorCode::InvalidPath
        );
        assert_eq!(FsIoError::Closed.code(), FsErrorCode::BadHandle);
        assert!(
            FsIoError::io("/x", io::Error::from(io::ErrorKind::NotFound)).is_not_found()
        );
    }

    #[test]
    fn test_error_messages_name_the_path() {
        let err = FsIoError::fs(FsErrorCode::NotFound, "/missing");
        assert_eq!(err.to_string(), "no such file or directory: /missing");
    }
}
