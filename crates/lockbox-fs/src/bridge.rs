//! Adapter from an operation table to the rich [`FsIo`] interface.
//!
//! The table's handles carry no ownership of their own, so the bridge keeps
//! a set of every handle it issued. A handle is closed by whoever removes it
//! from that set first: the file or directory object when dropped, or the
//! bridge during teardown. Either way the backend sees exactly one close.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::dynamic::DynamicFs;
use crate::error::{FsErrorCode, FsInitError, FsIoError, FsIoResult};
use crate::fsio::{FsDirectory, FsFile, FsIo, FsPath, OpenMode};
use crate::ops::{DirEntry, DirHandle, FileHandle, FsAttrs, FsOperations};

struct BridgeInner {
    fs: DynamicFs,
    open_files: Mutex<HashSet<FileHandle>>,
    open_dirs: Mutex<HashSet<DirHandle>>,
}

impl BridgeInner {
    fn close_file(&self, handle: FileHandle) {
        if self.open_files.lock().remove(&handle)
            && let Err(code) = self.fs.close(handle)
        {
            warn!(handle = handle.into_raw(), error = %code, "close failed");
        }
    }

    fn close_dir(&self, handle: DirHandle) {
        if self.open_dirs.lock().remove(&handle)
            && let Err(code) = self.fs.closedir(handle)
        {
            warn!(handle = handle.into_raw(), error = %code, "closedir failed");
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        let files: Vec<_> = self.open_files.get_mut().drain().collect();
        let dirs: Vec<_> = self.open_dirs.get_mut().drain().collect();
        if !files.is_empty() || !dirs.is_empty() {
            debug!(
                files = files.len(),
                dirs = dirs.len(),
                "Closing handles still open at bridge teardown"
            );
        }
        for handle in files {
            if let Err(code) = self.fs.close(handle) {
                warn!(handle = handle.into_raw(), error = %code, "close failed");
            }
        }
        for handle in dirs {
            if let Err(code) = self.fs.closedir(handle) {
                warn!(handle = handle.into_raw(), error = %code, "closedir failed");
            }
        }
    }
}

/// [`FsIo`] over a [`DynamicFs`].
///
/// The bridge owns its dynamic filesystem; dropping the bridge drops it
/// exactly once, which in turn destroys the backend if the dynamic
/// filesystem owns it.
pub struct OpsFsIo {
    inner: Arc<BridgeInner>,
}

impl OpsFsIo {
    pub fn new(fs: DynamicFs) -> Result<Self, FsInitError> {
        let sep = fs.path_sep();
        if sep.is_empty() {
            return Err(FsInitError::new("operation table reports an empty path separator"));
        }
        Ok(Self {
            inner: Arc::new(BridgeInner {
                fs,
                open_files: Mutex::new(HashSet::new()),
                open_dirs: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Handles issued by this bridge and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.inner.open_files.lock().len() + self.inner.open_dirs.lock().len()
    }

    fn fs(&self) -> &DynamicFs {
        &self.inner.fs
    }

    fn check(&self, path: &FsPath) -> FsIoResult<()> {
        if self.fs().path_is_valid(path.as_str()) {
            Ok(())
        } else {
            Err(FsIoError::InvalidPath(path.to_string()))
        }
    }
}

impl std::fmt::Debug for OpsFsIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsFsIo")
            .field("fs", &self.inner.fs)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

fn lift(path: &FsPath) -> impl FnOnce(FsErrorCode) -> FsIoError + '_ {
    move |code| FsIoError::fs(code, path.as_str())
}

impl FsIo for OpsFsIo {
    fn path_from_string(&self, path: &str) -> FsIoResult<FsPath> {
        if self.fs().path_is_valid(path) {
            Ok(FsPath::new_unchecked(path))
        } else {
            Err(FsIoError::InvalidPath(path.to_owned()))
        }
    }

    fn path_sep(&self) -> &str {
        self.fs().path_sep()
    }

    fn path_is_root(&self, path: &FsPath) -> bool {
        self.fs().path_is_root(path.as_str())
    }

    fn path_equals(&self, a: &FsPath, b: &FsPath) -> bool {
        self.fs().path_equals(a.as_str(), b.as_str())
    }

    fn path_is_parent(&self, parent: &FsPath, child: &FsPath) -> bool {
        self.fs().path_is_parent(parent.as_str(), child.as_str())
    }

    fn open(&self, path: &FsPath, mode: OpenMode) -> FsIoResult<Box<dyn FsFile>> {
        self.check(path)?;
        trace!(path = %path, ?mode, "bridge open");
        let opened = self
            .fs()
            .open(path.as_str(), mode.create || mode.exclusive)
            .map_err(lift(path))?;
        self.inner.open_files.lock().insert(opened.handle);

        let file = OpsFile {
            bridge: Arc::downgrade(&self.inner),
            handle: opened.handle,
            path: path.clone(),
            writable: mode.write,
            created: opened.created,
        };
        if mode.exclusive && !opened.created {
            // Dropping `file` releases the handle.
            return Err(FsIoError::fs(FsErrorCode::Exists, path.as_str()));
        }
        Ok(Box::new(file))
    }

    fn opendir(&self, path: &FsPath) -> FsIoResult<Box<dyn FsDirectory>> {
        self.check(path)?;
        let handle = self.fs().opendir(path.as_str()).map_err(lift(path))?;
        self.inner.open_dirs.lock().insert(handle);
        Ok(Box::new(OpsDirectory {
            bridge: Arc::downgrade(&self.inner),
            handle,
            path: path.clone(),
        }))
    }

    fn mkdir(&self, path: &FsPath) -> FsIoResult<()> {
        self.check(path)?;
        self.fs().mkdir(path.as_str()).map_err(lift(path))
    }

    fn unlink(&self, path: &FsPath) -> FsIoResult<()> {
        self.check(path)?;
        if self.get_attrs(path)?.is_dir() {
            return Err(FsIoError::fs(FsErrorCode::IsDir, path.as_str()));
        }
        self.fs().remove(path.as_str()).map_err(lift(path))
    }

    fn rmdir(&self, path: &FsPath) -> FsIoResult<()> {
        self.check(path)?;
        if !self.get_attrs(path)?.is_dir() {
            return Err(FsIoError::fs(FsErrorCode::NotDir, path.as_str()));
        }
        self.fs().remove(path.as_str()).map_err(lift(path))
    }

    fn rename(&self, from: &FsPath, to: &FsPath) -> FsIoResult<()> {
        self.check(from)?;
        self.check(to)?;
        self.fs()
            .rename(from.as_str(), to.as_str())
            .map_err(lift(from))
    }

    fn get_attrs(&self, path: &FsPath) -> FsIoResult<FsAttrs> {
        self.check(path)?;
        self.fs().getattr(path.as_str()).map_err(lift(path))
    }

    fn set_times(
        &self,
        path: &FsPath,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> FsIoResult<()> {
        self.check(path)?;
        self.fs()
            .set_times(path.as_str(), accessed, modified)
            .map_err(lift(path))
    }
}

struct OpsFile {
    bridge: Weak<BridgeInner>,
    handle: FileHandle,
    path: FsPath,
    writable: bool,
    created: bool,
}

impl OpsFile {
    fn bridge(&self) -> FsIoResult<Arc<BridgeInner>> {
        self.bridge.upgrade().ok_or(FsIoError::Closed)
    }

    fn ensure_writable(&self) -> FsIoResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(FsIoError::ReadOnly {
                path: self.path.to_string(),
            })
        }
    }
}

impl FsFile for OpsFile {
    fn path(&self) -> &FsPath {
        &self.path
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn created(&self) -> bool {
        self.created
    }

    fn get_attrs(&self) -> FsIoResult<FsAttrs> {
        self.bridge()?
            .fs
            .fgetattr(self.handle)
            .map_err(lift(&self.path))
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> FsIoResult<usize> {
        self.bridge()?
            .fs
            .read(self.handle, buf, offset)
            .map_err(lift(&self.path))
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> FsIoResult<usize> {
        self.ensure_writable()?;
        self.bridge()?
            .fs
            .write(self.handle, buf, offset)
            .map_err(lift(&self.path))
    }

    fn truncate(&mut self, size: u64) -> FsIoResult<()> {
        self.ensure_writable()?;
        self.bridge()?
            .fs
            .ftruncate(self.handle, size)
            .map_err(lift(&self.path))
    }

    fn flush(&mut self) -> FsIoResult<()> {
        // Writes go straight to the backend; there is nothing buffered here.
        self.bridge().map(drop)
    }
}

impl Drop for OpsFile {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.close_file(self.handle);
        }
    }
}

struct OpsDirectory {
    bridge: Weak<BridgeInner>,
    handle: DirHandle,
    path: FsPath,
}

impl FsDirectory for OpsDirectory {
    fn read_entry(&mut self) -> FsIoResult<Option<DirEntry>> {
        self.bridge
            .upgrade()
            .ok_or(FsIoError::Closed)?
            .fs
            .readdir(self.handle)
            .map_err(lift(&self.path))
    }
}

impl Drop for OpsDirectory {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.close_dir(self.handle);
        }
    }
}
