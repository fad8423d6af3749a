//! Volume key storage.
//!
//! The volume key is 512 bits: a 256-bit AES key for file content and a
//! 256-bit MAC key that, together with the AES key, forms the AES-SIV key
//! used for names. Both halves live in `memsafe` containers (locked in RAM,
//! `PROT_NONE` while idle, zeroed on drop) and are only reachable through
//! scoped accessors.

use std::sync::RwLock;

use generic_array::{GenericArray, typenum::U64};
use memsafe::MemSafe;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// Failure to reach protected key material.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// mlock/mprotect or a related call failed.
    #[error("memory protection operation failed: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A thread panicked while holding the key lock.
    #[error("key lock was poisoned")]
    LockPoisoned,
}

impl KeyAccessError {
    fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        KeyAccessError::MemoryProtection(Box::new(err))
    }
}

pub const VOLUME_KEY_LEN: usize = 64;

#[derive(Debug)]
pub struct VolumeKey {
    aes_key: RwLock<MemSafe<[u8; 32]>>,
    mac_key: RwLock<MemSafe<[u8; 32]>>,
}

// SAFETY: `MemSafe` holds a raw pointer to its protected page, which is what
// suppresses the auto traits. Every access to that page goes through the
// surrounding `RwLock`, the pointer is never exposed, and the protection
// syscalls it issues are thread-safe.
unsafe impl Send for VolumeKey {}
// SAFETY: see `Send` above; shared access is serialized by the locks.
unsafe impl Sync for VolumeKey {}

struct ZeroOnDrop<T: Zeroize>(T);

impl<T: Zeroize> Drop for ZeroOnDrop<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl VolumeKey {
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut raw = ZeroOnDrop([0u8; VOLUME_KEY_LEN]);
        rand::rng().fill_bytes(&mut raw.0);
        Self::from_raw(&raw.0)
    }

    /// Build from raw material laid out as AES key followed by MAC key.
    /// The caller keeps responsibility for clearing `raw`.
    pub fn from_raw(raw: &[u8; VOLUME_KEY_LEN]) -> Result<Self, KeyAccessError> {
        let mut aes = ZeroOnDrop([0u8; 32]);
        let mut mac = ZeroOnDrop([0u8; 32]);
        aes.0.copy_from_slice(&raw[..32]);
        mac.0.copy_from_slice(&raw[32..]);
        Ok(Self {
            aes_key: RwLock::new(MemSafe::new(aes.0).map_err(KeyAccessError::memory_protection)?),
            mac_key: RwLock::new(MemSafe::new(mac.0).map_err(KeyAccessError::memory_protection)?),
        })
    }

    fn read_half(
        half: &RwLock<MemSafe<[u8; 32]>>,
        out: &mut [u8],
    ) -> Result<(), KeyAccessError> {
        let mut lock = half.write().map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        out.copy_from_slice(&*guard);
        Ok(())
    }

    /// Run `f` with the 32-byte content key.
    pub fn with_content_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        let mut lock = self
            .aes_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Run `f` with the AES-SIV key (MAC key first, then AES key).
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        let mut key = ZeroOnDrop(GenericArray::<u8, U64>::default());
        Self::read_half(&self.mac_key, &mut key.0[..32])?;
        Self::read_half(&self.aes_key, &mut key.0[32..])?;
        Ok(f(&key.0))
    }

    /// Run `f` with the full 64-byte key in storage order (AES, MAC).
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; VOLUME_KEY_LEN]) -> R,
    {
        let mut key = ZeroOnDrop([0u8; VOLUME_KEY_LEN]);
        Self::read_half(&self.aes_key, &mut key.0[..32])?;
        Self::read_half(&self.mac_key, &mut key.0[32..])?;
        Ok(f(&key.0))
    }
}
