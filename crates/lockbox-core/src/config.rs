//! Encrypted folder configuration (`.lockbox.json`).
//!
//! The configuration is stored next to the encrypted data and moved through
//! the base filesystem unchanged. It records the scrypt parameters and,
//! optionally, a volume key wrapped with AES-GCM under the passphrase-derived
//! key. Without a wrapped key the volume key is the scrypt output itself.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use lockbox_fs::{FsIo, FsIoError, FsPath, OpenMode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::error::EncFsError;
use crate::keys::{VOLUME_KEY_LEN, VolumeKey};
use crate::secret::{Passphrase, PasswordReader};

pub const CONFIG_FILENAME: &str = ".lockbox.json";
pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_LOG_N: u8 = 15;
const FAST_LOG_N: u8 = 10;
const DEFAULT_R: u32 = 8;
const DEFAULT_P: u32 = 1;
const SALT_LEN: usize = 16;
const WRAP_NONCE_LEN: usize = 12;
const WRAP_AAD: &[u8] = b"lockbox volume key";

/// `LOCKBOX_FAST_KDF=1` trades scrypt strength for speed. Tests and CI only.
fn is_fast_kdf_enabled() -> bool {
    std::env::var("LOCKBOX_FAST_KDF")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    #[serde_as(as = "Base64")]
    pub salt: Vec<u8>,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_LOG_N,
            r: DEFAULT_R,
            p: DEFAULT_P,
            salt: Vec::new(),
        }
    }
}

impl KdfParams {
    /// Default parameters, with the cost lowered when `LOCKBOX_FAST_KDF` is set.
    pub fn from_env_or_default() -> Self {
        let log_n = if is_fast_kdf_enabled() {
            FAST_LOG_N
        } else {
            DEFAULT_LOG_N
        };
        Self {
            log_n,
            ..Self::default()
        }
    }

    fn derive(&self, passphrase: &Passphrase) -> Result<Zeroizing<[u8; VOLUME_KEY_LEN]>, EncFsError> {
        let params = scrypt::Params::new(self.log_n, self.r, self.p, VOLUME_KEY_LEN).map_err(|e| {
            EncFsError::KdfParams(format!(
                "N=2^{}, r={}, p={}: {e}",
                self.log_n, self.r, self.p
            ))
        })?;
        let password = passphrase.normalized();
        let mut out = Zeroizing::new([0u8; VOLUME_KEY_LEN]);
        scrypt::scrypt(&password, &self.salt, &params, &mut out[..])
            .map_err(|e| EncFsError::KeyDerivation(e.to_string()))?;
        Ok(out)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncfsConfig {
    pub version: u32,
    pub kdf: KdfParams,
    /// Nonce followed by the AES-GCM sealed volume key.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<Vec<u8>>,
}

/// The empty configuration: default cost, empty salt, no wrapped key.
impl Default for EncfsConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            kdf: KdfParams::default(),
            wrapped_key: None,
        }
    }
}

impl EncfsConfig {
    /// Fresh configuration with a random salt and a random volume key sealed
    /// under `passphrase`.
    #[instrument(level = "debug", skip_all, fields(log_n = params.log_n))]
    pub fn generate(params: KdfParams, passphrase: &Passphrase) -> Result<Self, EncFsError> {
        let mut kdf = params;
        let mut salt = vec![0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        kdf.salt = salt;

        let derived = kdf.derive(passphrase)?;
        let volume_key = VolumeKey::random()?;
        let wrapped = volume_key.with_raw_key(|raw| seal(&derived, raw))??;
        debug!("Generated new encrypted folder configuration");

        Ok(Self {
            version: CONFIG_VERSION,
            kdf,
            wrapped_key: Some(wrapped),
        })
    }

    /// Derive the volume key. The passphrase is taken from `reader` and
    /// dropped (zeroized) before this returns.
    #[instrument(level = "debug", skip_all)]
    pub fn unlock(&self, reader: &mut dyn PasswordReader) -> Result<VolumeKey, EncFsError> {
        if self.version != CONFIG_VERSION {
            return Err(EncFsError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        let passphrase = reader.read_password().ok_or(EncFsError::MissingPassword)?;
        let derived = self.kdf.derive(&passphrase)?;
        drop(passphrase);

        match &self.wrapped_key {
            None => Ok(VolumeKey::from_raw(&derived)?),
            Some(wrapped) => {
                let raw = open_sealed(&derived, wrapped)?;
                Ok(VolumeKey::from_raw(&raw)?)
            }
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EncFsError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, EncFsError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn seal(
    derived: &[u8; VOLUME_KEY_LEN],
    raw: &[u8; VOLUME_KEY_LEN],
) -> Result<Vec<u8>, EncFsError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived[..32]));
    let mut nonce = [0u8; WRAP_NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: raw,
                aad: WRAP_AAD,
            },
        )
        .map_err(|e| EncFsError::KeyDerivation(format!("volume key wrap failed: {e}")))?;

    let mut wrapped = Vec::with_capacity(WRAP_NONCE_LEN + sealed.len());
    wrapped.extend_from_slice(&nonce);
    wrapped.extend_from_slice(&sealed);
    Ok(wrapped)
}

fn open_sealed(
    derived: &[u8; VOLUME_KEY_LEN],
    wrapped: &[u8],
) -> Result<Zeroizing<[u8; VOLUME_KEY_LEN]>, EncFsError> {
    if wrapped.len() <= WRAP_NONCE_LEN {
        return Err(EncFsError::WrongPassword);
    }
    let (nonce, sealed) = wrapped.split_at(WRAP_NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived[..32]));
    let plain = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: WRAP_AAD,
                },
            )
            .map_err(|_| {
                warn!("Volume key unwrap failed");
                EncFsError::WrongPassword
            })?,
    );
    let mut raw = Zeroizing::new([0u8; VOLUME_KEY_LEN]);
    if plain.len() != VOLUME_KEY_LEN {
        return Err(EncFsError::WrongPassword);
    }
    raw.copy_from_slice(&plain);
    Ok(raw)
}

fn config_path(base: &dyn FsIo, folder: &FsPath) -> Result<FsPath, EncFsError> {
    base.join(folder, CONFIG_FILENAME)
        .map_err(EncFsError::ConfigIo)
}

/// Read `<folder>/.lockbox.json` through the base filesystem.
#[instrument(level = "debug", skip_all, fields(folder = %folder))]
pub fn read_config(base: &dyn FsIo, folder: &FsPath) -> Result<EncfsConfig, EncFsError> {
    let path = config_path(base, folder)?;
    let mut file = base.open(&path, OpenMode::READ).map_err(EncFsError::ConfigIo)?;

    let mut bytes = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = file
            .read(bytes.len() as u64, &mut chunk)
            .map_err(EncFsError::ConfigIo)?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
    }
    EncfsConfig::from_json(&bytes)
}

/// Write `<folder>/.lockbox.json`, replacing any previous contents.
#[instrument(level = "debug", skip_all, fields(folder = %folder))]
pub fn write_config(
    base: &dyn FsIo,
    folder: &FsPath,
    config: &EncfsConfig,
) -> Result<(), EncFsError> {
    let path = config_path(base, folder)?;
    let bytes = config.to_json()?;
    let write = || -> Result<(), FsIoError> {
        let mut file = base.open(&path, OpenMode::CREATE)?;
        file.truncate(0)?;
        let mut written = 0;
        while written < bytes.len() {
            written += file.write(written as u64, &bytes[written..])?;
        }
        file.flush()
    };
    write().map_err(EncFsError::ConfigIo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::PassphraseReader;

    fn fast() -> KdfParams {
        KdfParams {
            log_n: FAST_LOG_N,
            ..KdfParams::default()
        }
    }

    fn reader(secret: &str) -> PassphraseReader {
        PassphraseReader::new(Passphrase::new(secret))
    }

    #[test]
    fn test_generated_config_unlocks_with_same_passphrase() {
        let config = EncfsConfig::generate(fast(), &Passphrase::new("pw")).unwrap();
        assert_eq!(config.kdf.salt.len(), SALT_LEN);
        let a = config.unlock(&mut reader("pw")).unwrap();
        let b = config.unlock(&mut reader("pw")).unwrap();
        assert_eq!(
            a.with_raw_key(|k| *k).unwrap(),
            b.with_raw_key(|k| *k).unwrap()
        );
    }

    #[test]
    fn test_wrong_passphrase_is_detected() {
        let config = EncfsConfig::generate(fast(), &Passphrase::new("right")).unwrap();
        let err = config.unlock(&mut reader("wrong")).unwrap_err();
        assert!(matches!(err, EncFsError::WrongPassword));
    }

    #[test]
    fn test_empty_config_derives_directly() {
        let config = EncfsConfig {
            kdf: fast(),
            ..EncfsConfig::default()
        };
        assert!(config.wrapped_key.is_none());
        let a = config.unlock(&mut reader("pw")).unwrap();
        let b = config.unlock(&mut reader("other")).unwrap();
        assert_ne!(
            a.with_raw_key(|k| *k).unwrap(),
            b.with_raw_key(|k| *k).unwrap()
        );
    }

    #[test]
    fn test_missing_password() {
        let mut empty = reader("pw");
        let _ = empty.read_password();
        let err = EncfsConfig::default().unlock(&mut empty).unwrap_err();
        assert!(matches!(err, EncFsError::MissingPassword));
    }

    #[test]
    fn test_unsupported_version() {
        let config = EncfsConfig {
            version: 7,
            ..EncfsConfig::default()
        };
        let err = config.unlock(&mut reader("pw")).unwrap_err();
        assert!(matches!(
            err,
            EncFsError::UnsupportedVersion { found: 7, .. }
        ));
    }

    #[test]
    fn test_json_shape() {
        let config = EncfsConfig::generate(fast(), &Passphrase::new("pw")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&config.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], CONFIG_VERSION);
        assert_eq!(json["kdf"]["log_n"], FAST_LOG_N);
        assert!(json["wrapped_key"].is_string());

        let parsed = EncfsConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            EncfsConfig::from_json(b"{ not json"),
            Err(EncFsError::ConfigFormat(_))
        ));
    }
}
