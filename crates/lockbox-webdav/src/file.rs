//! WebDAV file handle over an operation-table file.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use lockbox_fs::{FileHandle, FsOperations, MAX_FILE_SIZE};
use tracing::{trace, warn};

use crate::error::to_dav_error;
use crate::filesystem::Storage;
use crate::metadata::LockboxMetaData;

/// An open file. The backend handle is closed exactly once, by
/// [`LockboxFile::close`] or on drop; buffered backends persist their data
/// at that point.
pub struct LockboxFile {
    storage: Arc<Storage>,
    handle: FileHandle,
    open: bool,
    path: String,
    position: u64,
}

impl std::fmt::Debug for LockboxFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockboxFile")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl LockboxFile {
    pub(crate) fn new(storage: Arc<Storage>, handle: FileHandle, path: String) -> Self {
        Self {
            storage,
            handle,
            open: true,
            path,
            position: 0,
        }
    }

    pub(crate) fn truncate(&mut self) -> Result<(), FsError> {
        self.ops().ftruncate(self.handle, 0).map_err(to_dav_error)?;
        self.position = 0;
        Ok(())
    }

    pub(crate) fn seek_to_end(&mut self) -> Result<(), FsError> {
        self.position = self.size()?;
        Ok(())
    }

    /// Close now and report what a drop could only log.
    pub(crate) fn close(mut self) -> Result<(), FsError> {
        self.open = false;
        self.ops().close(self.handle).map_err(to_dav_error)
    }

    fn ops(&self) -> &dyn FsOperations {
        self.storage.ops()
    }

    fn size(&self) -> Result<u64, FsError> {
        self.ops()
            .fgetattr(self.handle)
            .map(|attrs| attrs.size)
            .map_err(to_dav_error)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), FsError> {
        let mut written = 0;
        while written < data.len() {
            let n = self
                .ops()
                .write(self.handle, &data[written..], self.position + written as u64)
                .map_err(to_dav_error)?;
            if n == 0 {
                return Err(FsError::GeneralFailure);
            }
            written += n;
        }
        self.position += written as u64;
        Ok(())
    }
}

impl Drop for LockboxFile {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(code) = self.ops().close(self.handle) {
            warn!(path = %self.path, error = %code, "Closing file failed, changes may be lost");
        }
    }
}

impl DavFile for LockboxFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let attrs = self.ops().fgetattr(self.handle).map_err(to_dav_error)?;
            Ok(Box::new(LockboxMetaData::new(attrs)) as Box<dyn DavMetaData>)
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let mut buf = vec![0u8; count];
            let n = self
                .ops()
                .read(self.handle, &mut buf, self.position)
                .map_err(to_dav_error)?;
            buf.truncate(n);
            self.position += n as u64;
            trace!(path = %self.path, n, "Read");
            Ok(Bytes::from(buf))
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move { self.write_all(&buf) })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let bytes = buf.copy_to_bytes(buf.remaining());
            self.write_all(&bytes)
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let (base, offset) = match pos {
                SeekFrom::Start(n) => (0, i128::from(n)),
                SeekFrom::End(n) => (self.size()?, i128::from(n)),
                SeekFrom::Current(n) => (self.position, i128::from(n)),
            };
            let target = i128::from(base) + offset;
            self.position = u64::try_from(target)
                .ok()
                .filter(|&target| target <= MAX_FILE_SIZE)
                .ok_or(FsError::GeneralFailure)?;
            Ok(self.position)
        })
    }

    // Data reaches the backend when the handle is closed.
    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
