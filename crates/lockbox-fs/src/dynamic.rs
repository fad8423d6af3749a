//! Backend-agnostic filesystem handle.
//!
//! [`DynamicFs`] pairs an operation table with an explicit ownership choice:
//! an owned backend is destroyed together with the wrapper, a shared one
//! outlives it. The choice is made once, at construction.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::error::OpResult;
use crate::ops::{DirEntry, DirHandle, FileHandle, FsAttrs, FsOperations, OpenFile};

enum Backend {
    Owned(Box<dyn FsOperations>),
    Shared(Arc<dyn FsOperations>),
}

pub struct DynamicFs {
    backend: Backend,
}

impl DynamicFs {
    /// Take exclusive ownership of `backend`; dropping the result destroys it.
    pub fn owned<B: FsOperations + 'static>(backend: B) -> Self {
        Self {
            backend: Backend::Owned(Box::new(backend)),
        }
    }

    /// Borrow a shared backend; dropping the result only releases this reference.
    pub fn shared(backend: Arc<dyn FsOperations>) -> Self {
        Self {
            backend: Backend::Shared(backend),
        }
    }

    /// Whether dropping this handle destroys the backend.
    pub fn is_owner(&self) -> bool {
        matches!(self.backend, Backend::Owned(_))
    }

    fn ops(&self) -> &dyn FsOperations {
        match &self.backend {
            Backend::Owned(b) => b.as_ref(),
            Backend::Shared(b) => b.as_ref(),
        }
    }
}

impl fmt::Debug for DynamicFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicFs")
            .field("owner", &self.is_owner())
            .finish_non_exhaustive()
    }
}

impl Drop for DynamicFs {
    fn drop(&mut self) {
        debug!(destroy_backend = self.is_owner(), "Releasing dynamic filesystem");
    }
}

impl FsOperations for DynamicFs {
    fn open(&self, path: &str, create: bool) -> OpResult<OpenFile> {
        self.ops().open(path, create)
    }

    fn fgetattr(&self, file: FileHandle) -> OpResult<FsAttrs> {
        self.ops().fgetattr(file)
    }

    fn ftruncate(&self, file: FileHandle, size: u64) -> OpResult<()> {
        self.ops().ftruncate(file, size)
    }

    fn read(&self, file: FileHandle, buf: &mut [u8], offset: u64) -> OpResult<usize> {
        self.ops().read(file, buf, offset)
    }

    fn write(&self, file: FileHandle, buf: &[u8], offset: u64) -> OpResult<usize> {
        self.ops().write(file, buf, offset)
    }

    fn close(&self, file: FileHandle) -> OpResult<()> {
        self.ops().close(file)
    }

    fn opendir(&self, path: &str) -> OpResult<DirHandle> {
        self.ops().opendir(path)
    }

    fn readdir(&self, dir: DirHandle) -> OpResult<Option<DirEntry>> {
        self.ops().readdir(dir)
    }

    fn closedir(&self, dir: DirHandle) -> OpResult<()> {
        self.ops().closedir(dir)
    }

    fn remove(&self, path: &str) -> OpResult<()> {
        self.ops().remove(path)
    }

    fn mkdir(&self, path: &str) -> OpResult<()> {
        self.ops().mkdir(path)
    }

    fn getattr(&self, path: &str) -> OpResult<FsAttrs> {
        self.ops().getattr(path)
    }

    fn rename(&self, src: &str, dst: &str) -> OpResult<()> {
        self.ops().rename(src, dst)
    }

    fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> OpResult<()> {
        self.ops().set_times(path, accessed, modified)
    }

    fn path_is_root(&self, path: &str) -> bool {
        self.ops().path_is_root(path)
    }

    fn path_sep(&self) -> &str {
        self.ops().path_sep()
    }

    fn path_equals(&self, a: &str, b: &str) -> bool {
        self.ops().path_equals(a, b)
    }

    fn path_is_parent(&self, parent: &str, child: &str) -> bool {
        self.ops().path_is_parent(parent, child)
    }

    fn path_is_valid(&self, path: &str) -> bool {
        self.ops().path_is_valid(path)
    }
}
