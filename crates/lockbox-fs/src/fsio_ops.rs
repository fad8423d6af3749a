//! Operation table over an already-bridged [`FsIo`].
//!
//! This is how an encrypted filesystem is served through the same
//! operation-table shape that a native one is: the server only ever talks to
//! [`FsOperations`], and [`FsIoOps`] turns those calls back into `FsIo` calls.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FsErrorCode, FsIoError, OpResult};
use crate::fsio::{FsDirectory, FsFile, FsIo, FsPath, OpenMode};
use crate::handle_table::HandleTable;
use crate::ops::{DirEntry, DirHandle, FileHandle, FsAttrs, FsOperations, OpenFile};

/// [`FsOperations`] backed by a shared [`FsIo`].
///
/// The `FsIo` is never destroyed by this table; dropping it only releases the
/// table's reference and closes any files and streams still open through it.
pub struct FsIoOps {
    fs: Arc<dyn FsIo>,
    files: HandleTable<Mutex<Box<dyn FsFile>>>,
    dirs: HandleTable<Mutex<Box<dyn FsDirectory>>>,
}

impl FsIoOps {
    pub fn new(fs: Arc<dyn FsIo>) -> Self {
        Self {
            fs,
            files: HandleTable::new(),
            dirs: HandleTable::new(),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    fn parse(&self, path: &str) -> OpResult<FsPath> {
        self.fs.path_from_string(path).map_err(|e| e.code())
    }

    fn with_file<R>(
        &self,
        file: FileHandle,
        f: impl FnOnce(&mut dyn FsFile) -> Result<R, FsIoError>,
    ) -> OpResult<R> {
        let entry = self
            .files
            .get(file.into_raw())
            .ok_or(FsErrorCode::BadHandle)?;
        let mut guard = entry.value().lock();
        f(guard.as_mut()).map_err(report)
    }
}

impl Drop for FsIoOps {
    fn drop(&mut self) {
        if self.open_handles() > 0 {
            debug!(
                files = self.files.len(),
                dirs = self.dirs.len(),
                "Closing fsio handles at table teardown"
            );
        }
    }
}

fn report(err: FsIoError) -> FsErrorCode {
    debug!(error = %err, "fsio operation failed");
    err.code()
}

impl FsOperations for FsIoOps {
    fn open(&self, path: &str, create: bool) -> OpResult<OpenFile> {
        let path = self.parse(path)?;
        let mode = if create {
            OpenMode::CREATE
        } else {
            OpenMode::READ_WRITE
        };
        let file = self.fs.open(&path, mode).map_err(report)?;
        let created = file.created();
        let handle = FileHandle::from_raw(self.files.insert(Mutex::new(file)));
        Ok(OpenFile { handle, created })
    }

    fn fgetattr(&self, file: FileHandle) -> OpResult<FsAttrs> {
        self.with_file(file, |f| f.get_attrs())
    }

    fn ftruncate(&self, file: FileHandle, size: u64) -> OpResult<()> {
        self.with_file(file, |f| f.truncate(size))
    }

    fn read(&self, file: FileHandle, buf: &mut [u8], offset: u64) -> OpResult<usize> {
        self.with_file(file, |f| f.read(offset, buf))
    }

    fn write(&self, file: FileHandle, buf: &[u8], offset: u64) -> OpResult<usize> {
        self.with_file(file, |f| f.write(offset, buf))
    }

    fn close(&self, file: FileHandle) -> OpResult<()> {
        let file = self
            .files
            .remove(file.into_raw())
            .ok_or(FsErrorCode::BadHandle)?;
        // Buffered filesystems persist on flush; surface that failure here
        // instead of losing it in a drop.
        file.into_inner().flush().map_err(report)
    }

    fn opendir(&self, path: &str) -> OpResult<DirHandle> {
        let path = self.parse(path)?;
        let stream = self.fs.opendir(&path).map_err(report)?;
        Ok(DirHandle::from_raw(self.dirs.insert(Mutex::new(stream))))
    }

    fn readdir(&self, dir: DirHandle) -> OpResult<Option<DirEntry>> {
        let entry = self
            .dirs
            .get(dir.into_raw())
            .ok_or(FsErrorCode::BadHandle)?;
        let mut stream = entry.value().lock();
        stream.read_entry().map_err(report)
    }

    fn closedir(&self, dir: DirHandle) -> OpResult<()> {
        self.dirs
            .remove(dir.into_raw())
            .map(drop)
            .ok_or(FsErrorCode::BadHandle)
    }

    fn remove(&self, path: &str) -> OpResult<()> {
        let path = self.parse(path)?;
        let attrs = self.fs.get_attrs(&path).map_err(report)?;
        let removed = if attrs.is_dir() {
            self.fs.rmdir(&path)
        } else {
            self.fs.unlink(&path)
        };
        removed.map_err(report)
    }

    fn mkdir(&self, path: &str) -> OpResult<()> {
        let path = self.parse(path)?;
        self.fs.mkdir(&path).map_err(report)
    }

    fn getattr(&self, path: &str) -> OpResult<FsAttrs> {
        let path = self.parse(path)?;
        self.fs.get_attrs(&path).map_err(report)
    }

    fn rename(&self, src: &str, dst: &str) -> OpResult<()> {
        let src = self.parse(src)?;
        let dst = self.parse(dst)?;
        self.fs.rename(&src, &dst).map_err(report)
    }

    fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> OpResult<()> {
        let path = self.parse(path)?;
        self.fs.set_times(&path, accessed, modified).map_err(report)
    }

    fn path_is_root(&self, path: &str) -> bool {
        self.fs
            .path_from_string(path)
            .is_ok_and(|p| self.fs.path_is_root(&p))
    }

    fn path_sep(&self) -> &str {
        self.fs.path_sep()
    }

    fn path_equals(&self, a: &str, b: &str) -> bool {
        match (self.fs.path_from_string(a), self.fs.path_from_string(b)) {
            (Ok(a), Ok(b)) => self.fs.path_equals(&a, &b),
            _ => false,
        }
    }

    fn path_is_parent(&self, parent: &str, child: &str) -> bool {
        match (
            self.fs.path_from_string(parent),
            self.fs.path_from_string(child),
        ) {
            (Ok(parent), Ok(child)) => self.fs.path_is_parent(&parent, &child),
            _ => false,
        }
    }

    fn path_is_valid(&self, path: &str) -> bool {
        self.fs.path_from_string(path).is_ok()
    }
}
