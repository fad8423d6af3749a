use lockbox_fs::FsIoError;
use thiserror::Error;

use crate::keys::KeyAccessError;

/// Everything that can go wrong while opening or creating an encrypted folder.
#[derive(Debug, Error)]
pub enum EncFsError {
    /// The configuration blob could not be read or written through the base
    /// filesystem.
    #[error("cannot access configuration: {0}")]
    ConfigIo(#[source] FsIoError),

    #[error("malformed configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("unsupported configuration version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid key derivation parameters: {0}")]
    KdfParams(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The wrapped volume key failed authentication. Either the passphrase is
    /// wrong or the configuration was tampered with.
    #[error("wrong password or corrupted configuration")]
    WrongPassword,

    #[error("no password available")]
    MissingPassword,

    #[error("key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    /// The encrypted folder itself is missing or not a directory.
    #[error("encrypted folder unusable: {0}")]
    Folder(#[source] FsIoError),
}

/// The single failure category of encrypted filesystem construction.
///
/// The cause is kept for callers that want to tell a wrong password from a
/// damaged folder.
#[derive(Debug, Error)]
#[error("cannot initialize encrypted filesystem at {folder}")]
pub struct EncFsInitError {
    folder: String,
    #[source]
    source: EncFsError,
}

impl EncFsInitError {
    pub fn new(folder: impl Into<String>, source: EncFsError) -> Self {
        Self {
            folder: folder.into(),
            source,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn cause(&self) -> &EncFsError {
        &self.source
    }

    pub fn is_wrong_password(&self) -> bool {
        matches!(self.source, EncFsError::WrongPassword)
    }

    /// Whether the configuration could not be read at all.
    pub fn is_config_unreadable(&self) -> bool {
        matches!(self.source, EncFsError::ConfigIo(_))
    }
}
