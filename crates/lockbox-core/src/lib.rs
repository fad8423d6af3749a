//! Encrypted folders for Lockbox.
//!
//! An encrypted folder is an ordinary directory on some base [`FsIo`] that
//! holds a `.lockbox.json` configuration and entries whose names and contents
//! are encrypted. [`create_enc_fs`] unlocks such a folder and returns an
//! [`EncryptedFs`], itself an [`FsIo`], that reads and writes cleartext.
//!
//! ```text
//! names:    AES-SIV, base64url without padding
//! contents: 68-byte header + 32 KiB AES-GCM chunks
//! keys:     scrypt(passphrase, salt) unwraps a random 512-bit volume key
//! ```

pub mod config;
pub mod content;
pub mod encfs;
pub mod error;
pub mod keys;
pub mod names;
pub mod secret;
mod write_buffer;

use std::sync::Arc;

use lockbox_fs::{FsErrorCode, FsIo, FsIoError};
use tracing::{info, instrument};

pub use config::{CONFIG_FILENAME, EncfsConfig, KdfParams, read_config, write_config};
pub use encfs::{EncFsOptions, EncryptedFs};
pub use error::{EncFsError, EncFsInitError};
pub use keys::{KeyAccessError, VolumeKey};
pub use secret::{Passphrase, PassphraseReader, PasswordReader};

/// Build an encrypted filesystem over `folder` on `base`.
///
/// `folder` must already be a directory on `base`, and `config` must be the
/// configuration stored in it (or about to be). `secret` is moved into the
/// password reader and cleared once the key is derived, whatever the outcome.
#[instrument(level = "debug", skip(base, config, secret))]
pub fn create_enc_fs(
    base: Arc<dyn FsIo>,
    folder: &str,
    config: &EncfsConfig,
    secret: Passphrase,
) -> Result<EncryptedFs, EncFsInitError> {
    let fail = |source| EncFsInitError::new(folder, source);

    let password_reader: Box<dyn PasswordReader> = Box::new(PassphraseReader::new(secret));
    let root = base
        .path_from_string(folder)
        .map_err(|e| fail(EncFsError::Folder(e)))?;
    let options = EncFsOptions {
        base,
        root,
        password_reader,
    };
    EncryptedFs::init(options, config).map_err(fail)
}

/// Read the configuration stored in `folder`, then unlock it.
#[instrument(level = "debug", skip(base, secret))]
pub fn open_enc_fs(
    base: Arc<dyn FsIo>,
    folder: &str,
    secret: Passphrase,
) -> Result<EncryptedFs, EncFsInitError> {
    let fail = |source| EncFsInitError::new(folder, source);

    let root = base
        .path_from_string(folder)
        .map_err(|e| fail(EncFsError::Folder(e)))?;
    let config = read_config(base.as_ref(), &root).map_err(fail)?;
    create_enc_fs(base, folder, &config, secret)
}

/// Turn `folder` into a new encrypted folder and unlock it.
///
/// Refuses to overwrite an existing configuration.
#[instrument(level = "debug", skip(base, secret, params))]
pub fn init_enc_folder(
    base: Arc<dyn FsIo>,
    folder: &str,
    secret: Passphrase,
    params: KdfParams,
) -> Result<EncryptedFs, EncFsInitError> {
    let fail = |source| EncFsInitError::new(folder, source);

    let root = base
        .path_from_string(folder)
        .map_err(|e| fail(EncFsError::Folder(e)))?;
    match read_config(base.as_ref(), &root) {
        Ok(_) => {
            return Err(fail(EncFsError::ConfigIo(FsIoError::fs(
                FsErrorCode::Exists,
                root.as_str(),
            ))));
        }
        Err(EncFsError::ConfigIo(e)) if e.is_not_found() => {}
        Err(e) => return Err(fail(e)),
    }

    let config = EncfsConfig::generate(params, &secret).map_err(fail)?;
    write_config(base.as_ref(), &root, &config).map_err(fail)?;
    info!(folder, "Initialized encrypted folder");
    create_enc_fs(base, folder, &config, secret)
}
