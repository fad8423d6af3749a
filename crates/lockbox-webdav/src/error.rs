//! Errors of the server layer and the mapping of filesystem codes onto
//! WebDAV result codes.

use std::io;

use dav_server::fs::FsError;
use lockbox_fs::FsErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// `global_init` was called while a runtime is still alive.
    #[error("WebDAV runtime is already initialized")]
    AlreadyInitialized,

    #[error("socket subsystem unavailable: {0}")]
    SocketSubsystem(#[source] io::Error),

    /// One bootstrap step could not build its resource.
    #[error("could not create {component}")]
    Create {
        component: &'static str,
        #[source]
        source: io::Error,
    },

    /// The filesystem object is already being served by another `run`.
    #[error("filesystem is already being served")]
    FilesystemBusy,

    #[error("invalid root {path:?}: {reason}")]
    InvalidRoot { path: String, reason: String },

    /// The startup signal was lost before the loop observed it.
    #[error("startup notification was dropped before it fired")]
    StartupCallback,
}

impl ServerError {
    pub(crate) fn create(component: &'static str, source: io::Error) -> Self {
        ServerError::Create { component, source }
    }
}

/// Convert a backend code into the status dav-server reports to clients.
pub fn to_dav_error(code: FsErrorCode) -> FsError {
    match code {
        FsErrorCode::NotFound => FsError::NotFound,
        FsErrorCode::Exists => FsError::Exists,
        FsErrorCode::NotDir
        | FsErrorCode::IsDir
        | FsErrorCode::NotEmpty
        | FsErrorCode::Access => FsError::Forbidden,
        FsErrorCode::CrossDevice => FsError::IsRemote,
        FsErrorCode::NoSpace => FsError::InsufficientStorage,
        FsErrorCode::InvalidPath | FsErrorCode::BadHandle | FsErrorCode::Io => {
            FsError::GeneralFailure
        }
    }
}
