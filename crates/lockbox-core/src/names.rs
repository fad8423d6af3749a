//! Name encryption.
//!
//! Every path component is sealed on its own with AES-SIV and stored as
//! unpadded base64url. SIV is deterministic, so a cleartext name always maps
//! to the same stored name and lookups need no directory scan. The associated
//! data is a fixed domain tag rather than the parent path, which keeps a
//! directory rename a single base rename.

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::keys::{KeyAccessError, VolumeKey};

const NAME_AD: &[u8] = b"lockbox name";

/// Longest stored name most host filesystems accept.
const MAX_STORED_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum NameError {
    /// AES-SIV authentication failed: not one of our names.
    #[error("name {0:?} does not decrypt")]
    DecryptionFailed(String),

    #[error("name {0:?} is not valid base64url")]
    Base64Decode(String),

    #[error("decrypted name is not valid UTF-8")]
    Utf8Decode,

    #[error("name is too long to store ({stored_len} bytes encrypted)")]
    TooLong { stored_len: usize },

    #[error("name encryption failed")]
    EncryptionFailed,

    #[error("key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

fn stored_len(cleartext_len: usize) -> usize {
    // 16-byte synthetic IV, then base64 without padding.
    (4 * (cleartext_len + 16)).div_ceil(3)
}

/// Encrypt one path component. The name is NFC-normalized first.
pub fn encrypt_name(name: &str, key: &VolumeKey) -> Result<String, NameError> {
    let normalized: String = name.nfc().collect();
    let len = stored_len(normalized.len());
    if len > MAX_STORED_LEN {
        return Err(NameError::TooLong { stored_len: len });
    }
    key.with_siv_key(|siv_key| {
        let mut cipher = Aes256Siv::new(siv_key);
        let sealed = cipher
            .encrypt([NAME_AD], normalized.as_bytes())
            .map_err(|_| NameError::EncryptionFailed)?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    })?
}

/// Decrypt a stored name produced by [`encrypt_name`].
pub fn decrypt_name(stored: &str, key: &VolumeKey) -> Result<String, NameError> {
    let sealed = URL_SAFE_NO_PAD
        .decode(stored.as_bytes())
        .map_err(|_| NameError::Base64Decode(stored.to_owned()))?;
    key.with_siv_key(|siv_key| {
        let mut cipher = Aes256Siv::new(siv_key);
        let plain = cipher
            .decrypt([NAME_AD], &sealed)
            .map_err(|_| NameError::DecryptionFailed(stored.to_owned()))?;
        String::from_utf8(plain).map_err(|_| NameError::Utf8Decode)
    })?
}
