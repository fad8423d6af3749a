//! Cleartext buffer for an open encrypted file.
//!
//! AES-GCM chunks carry their chunk number in the AAD, so they cannot be
//! patched in place. An open file is decrypted into a buffer, edited there,
//! and re-encrypted as a whole when it is flushed.

use lockbox_fs::{FsErrorCode, MAX_FILE_SIZE};
use zeroize::Zeroize;

/// In-memory length for a requested file size, or `NoSpace` past the limit.
fn buffer_len(size: u64) -> Result<usize, FsErrorCode> {
    if size > MAX_FILE_SIZE {
        return Err(FsErrorCode::NoSpace);
    }
    usize::try_from(size).map_err(|_| FsErrorCode::NoSpace)
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    content: Vec<u8>,
    dirty: bool,
}

impl WriteBuffer {
    pub fn new(existing: Vec<u8>) -> Self {
        Self {
            content: existing,
            dirty: false,
        }
    }

    /// Buffer for a file that does not exist on the base yet. It starts
    /// dirty so that even an empty file gets written out.
    pub fn for_create() -> Self {
        Self {
            content: Vec::new(),
            dirty: true,
        }
    }

    /// Write at `offset`, zero-filling any gap past the current end.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, FsErrorCode> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FsErrorCode::NoSpace)
            .and_then(buffer_len)?;
        let start = end - data.len();
        self.grow(end)?;
        self.content[start..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    fn grow(&mut self, len: usize) -> Result<(), FsErrorCode> {
        if len > self.content.len() {
            self.content
                .try_reserve(len - self.content.len())
                .map_err(|_| FsErrorCode::NoSpace)?;
            self.content.resize(len, 0);
        }
        Ok(())
    }

    /// Copy into `buf` from `offset`. Returns 0 at or past the end.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        if offset >= self.content.len() {
            return 0;
        }
        let n = buf.len().min(self.content.len() - offset);
        buf[..n].copy_from_slice(&self.content[offset..offset + n]);
        n
    }

    pub fn truncate(&mut self, size: u64) -> Result<(), FsErrorCode> {
        let size = buffer_len(size)?;
        if size == self.content.len() {
            return Ok(());
        }
        if size > self.content.len() {
            self.grow(size)?;
        } else {
            self.content[size..].zeroize();
            self.content.truncate(size);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        self.content.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_extends_with_zeros() {
        let mut buf = WriteBuffer::new(b"ab".to_vec());
        assert!(!buf.is_dirty());
        buf.write(4, b"cd").unwrap();
        assert_eq!(buf.content(), b"ab\0\0cd");
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_read_past_end() {
        let buf = WriteBuffer::new(b"hello".to_vec());
        let mut out = [0u8; 8];
        assert_eq!(buf.read(3, &mut out), 2);
        assert_eq!(&out[..2], b"lo");
        assert_eq!(buf.read(5, &mut out), 0);
        assert_eq!(buf.read(50, &mut out), 0);
    }

    #[test]
    fn test_truncate_to_same_size_is_clean() {
        let mut buf = WriteBuffer::new(b"hello".to_vec());
        buf.truncate(5).unwrap();
        assert!(!buf.is_dirty());
        buf.truncate(2).unwrap();
        assert_eq!(buf.content(), b"he");
        assert!(buf.is_dirty());
        buf.mark_clean();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_created_buffer_starts_dirty() {
        let buf = WriteBuffer::for_create();
        assert!(buf.is_empty());
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_oversized_requests_leave_buffer_untouched() {
        let mut buf = WriteBuffer::new(b"keep".to_vec());

        assert_eq!(buf.write(u64::MAX - 1, b"x"), Err(FsErrorCode::NoSpace));
        assert_eq!(buf.write(MAX_FILE_SIZE, b"x"), Err(FsErrorCode::NoSpace));
        assert_eq!(buf.truncate(u64::MAX), Err(FsErrorCode::NoSpace));
        assert_eq!(buf.truncate(MAX_FILE_SIZE + 1), Err(FsErrorCode::NoSpace));

        assert_eq!(buf.content(), b"keep");
        assert!(!buf.is_dirty());
        assert_eq!(buf.read(u64::MAX, &mut [0u8; 4]), 0);
    }
}
