//! Passphrase handling.
//!
//! A [`Passphrase`] is moved, never copied, from the caller into a
//! [`PassphraseReader`], which hands it out once for key derivation. The
//! underlying buffer is zeroized whenever the value is dropped, on every
//! exit path.

use secrecy::{ExposeSecret, SecretString};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

/// A secret passphrase held in zeroize-on-drop memory.
pub struct Passphrase(SecretString);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// NFC-normalized bytes for key derivation, so the same passphrase typed
    /// on different platforms derives the same key.
    pub(crate) fn normalized(&self) -> Zeroizing<Vec<u8>> {
        let nfc: Zeroizing<String> = Zeroizing::new(self.0.expose_secret().nfc().collect());
        Zeroizing::new(nfc.as_bytes().to_vec())
    }
}

impl From<String> for Passphrase {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

/// Source of the passphrase used to unlock an encrypted folder.
pub trait PasswordReader: Send {
    /// Take the passphrase. Returns `None` once nothing is available.
    fn read_password(&mut self) -> Option<Passphrase>;
}

/// Reader that owns one in-memory passphrase and releases it at most once.
#[derive(Debug)]
pub struct PassphraseReader {
    secret: Option<Passphrase>,
}

impl PassphraseReader {
    pub fn new(secret: Passphrase) -> Self {
        Self {
            secret: Some(secret),
        }
    }
}

impl PasswordReader for PassphraseReader {
    fn read_password(&mut self) -> Option<Passphrase> {
        self.secret.take()
    }
}
