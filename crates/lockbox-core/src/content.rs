//! File content encryption.
//!
//! Layout of an encrypted file:
//!
//! ```text
//! header (68 bytes)  = nonce (12) ‖ AES-GCM(0xFF×8 ‖ content key) (40) ‖ tag (16)
//! chunk  (≤ 32 KiB+28) = nonce (12) ‖ AES-GCM(plaintext ≤ 32 KiB) ‖ tag (16)
//! ```
//!
//! Each chunk is bound to its position and to its file by the AAD
//! `chunk number (u64 BE) ‖ header nonce`, so chunks cannot be reordered or
//! moved between files. A file with zero bytes of ciphertext is an empty
//! plaintext; this is what a freshly created, never flushed file looks like.

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::keys::{KeyAccessError, VolumeKey};

pub const HEADER_LEN: usize = 68;
pub const HEADER_NONCE_LEN: usize = 12;
pub const CHUNK_PLAINTEXT_LEN: usize = 32 * 1024;
pub const CHUNK_OVERHEAD: usize = 12 + 16;
const CHUNK_CIPHERTEXT_LEN: usize = CHUNK_PLAINTEXT_LEN + CHUNK_OVERHEAD;
const RESERVED: [u8; 8] = [0xFF; 8];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid file header: {reason}")]
    InvalidHeader { reason: String },

    /// Header tag mismatch: wrong key or tampered header.
    #[error("header authentication failed")]
    HeaderAuthentication,

    /// Chunk tag mismatch: tampered, truncated, or reordered content.
    #[error("chunk {chunk} failed authentication")]
    ChunkAuthentication { chunk: u64 },

    #[error("chunk {chunk} is incomplete ({size} bytes)")]
    IncompleteChunk { chunk: u64, size: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

fn chunk_aad(chunk: u64, header_nonce: &[u8]) -> [u8; 20] {
    let mut aad = [0u8; 20];
    aad[..8].copy_from_slice(&chunk.to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}

fn encrypt_header(
    content_key: &[u8; 32],
    key: &VolumeKey,
) -> Result<Vec<u8>, ContentError> {
    let mut nonce = [0u8; HEADER_NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    key.with_content_key(|aes_key| {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(aes_key));
        let mut payload = Zeroizing::new(Vec::with_capacity(40));
        payload.extend_from_slice(&RESERVED);
        payload.extend_from_slice(content_key);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|e| ContentError::Encryption(e.to_string()))?;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&nonce);
        header.extend_from_slice(&sealed);
        Ok(header)
    })?
}

fn decrypt_header(
    header: &[u8],
    key: &VolumeKey,
) -> Result<Zeroizing<[u8; 32]>, ContentError> {
    if header.len() != HEADER_LEN {
        return Err(ContentError::InvalidHeader {
            reason: format!("expected {HEADER_LEN} bytes, got {}", header.len()),
        });
    }
    let (nonce, sealed) = header.split_at(HEADER_NONCE_LEN);

    key.with_content_key(|aes_key| {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(aes_key));
        let payload = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| {
                    warn!("Header decryption failed - authentication tag mismatch");
                    ContentError::HeaderAuthentication
                })?,
        );
        if payload.len() != 40 {
            return Err(ContentError::InvalidHeader {
                reason: format!("decrypted payload is {} bytes", payload.len()),
            });
        }
        if payload[..8] != RESERVED {
            debug!("Header has non-standard reserved bytes");
        }
        let mut content_key = Zeroizing::new([0u8; 32]);
        content_key.copy_from_slice(&payload[8..]);
        Ok(content_key)
    })?
}

/// Encrypt a whole file: fresh content key, header, then chunks.
#[instrument(level = "debug", skip_all, fields(plaintext_len = plaintext.len()))]
pub fn encrypt_file(plaintext: &[u8], key: &VolumeKey) -> Result<Vec<u8>, ContentError> {
    let mut content_key = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(content_key.as_mut_slice());

    let mut out = encrypt_header(&content_key, key)?;
    out.reserve(ciphertext_size(plaintext.len() as u64) as usize - HEADER_LEN);
    let mut header_nonce = [0u8; HEADER_NONCE_LEN];
    header_nonce.copy_from_slice(&out[..HEADER_NONCE_LEN]);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(content_key.as_slice()));

    // An empty file still gets one authenticated chunk.
    let chunks: Vec<&[u8]> = if plaintext.is_empty() {
        vec![&[]]
    } else {
        plaintext.chunks(CHUNK_PLAINTEXT_LEN).collect()
    };

    for (chunk_number, chunk) in chunks.into_iter().enumerate() {
        let mut nonce = [0u8; 12];
        rand::rng().fill_bytes(&mut nonce);
        let aad = chunk_aad(chunk_number as u64, &header_nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: chunk, aad: &aad })
            .map_err(|e| ContentError::Encryption(e.to_string()))?;
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
    }
    trace!(ciphertext_len = out.len(), "File encrypted");
    Ok(out)
}

/// Decrypt a whole file.
#[instrument(level = "debug", skip_all, fields(ciphertext_len = ciphertext.len()))]
pub fn decrypt_file(ciphertext: &[u8], key: &VolumeKey) -> Result<Vec<u8>, ContentError> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    if ciphertext.len() < HEADER_LEN {
        return Err(ContentError::InvalidHeader {
            reason: format!(
                "file too small: expected at least {HEADER_LEN} bytes, got {}",
                ciphertext.len()
            ),
        });
    }
    let (header, body) = ciphertext.split_at(HEADER_LEN);
    let content_key = decrypt_header(header, key)?;
    let header_nonce = &header[..HEADER_NONCE_LEN];
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(content_key.as_slice()));

    let mut plaintext = Vec::with_capacity(plaintext_size(ciphertext.len() as u64) as usize);
    for (chunk_number, chunk) in body.chunks(CHUNK_CIPHERTEXT_LEN).enumerate() {
        let chunk_number = chunk_number as u64;
        if chunk.len() < CHUNK_OVERHEAD {
            return Err(ContentError::IncompleteChunk {
                chunk: chunk_number,
                size: chunk.len(),
            });
        }
        let (nonce, sealed) = chunk.split_at(12);
        let aad = chunk_aad(chunk_number, header_nonce);
        let opened = cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map_err(|_| {
                warn!(chunk = chunk_number, "Chunk decryption failed - authentication tag mismatch");
                ContentError::ChunkAuthentication {
                    chunk: chunk_number,
                }
            })?;
        plaintext.extend_from_slice(&opened);
    }
    Ok(plaintext)
}

/// Cleartext length of a ciphertext of `ciphertext_len` bytes.
///
/// Malformed lengths (a truncated header or a trailing partial chunk
/// overhead) are clamped rather than rejected; reading the file reports the
/// corruption.
pub fn plaintext_size(ciphertext_len: u64) -> u64 {
    let header = HEADER_LEN as u64;
    if ciphertext_len <= header {
        return 0;
    }
    let body = ciphertext_len - header;
    let full = body / CHUNK_CIPHERTEXT_LEN as u64;
    let rest = body % CHUNK_CIPHERTEXT_LEN as u64;
    full * CHUNK_PLAINTEXT_LEN as u64 + rest.saturating_sub(CHUNK_OVERHEAD as u64)
}

/// Ciphertext length that [`encrypt_file`] produces for `plaintext_len` bytes.
pub fn ciphertext_size(plaintext_len: u64) -> u64 {
    let chunk = CHUNK_PLAINTEXT_LEN as u64;
    let chunks = plaintext_len.div_ceil(chunk).max(1);
    HEADER_LEN as u64 + plaintext_len + chunks * CHUNK_OVERHEAD as u64
}
