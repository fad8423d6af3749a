//! Resource-accounting instrumentation for tests.
//!
//! [`CountingFs`] wraps any operation table and records every handle it
//! hands out and takes back, plus whether the backend itself was destroyed.
//! Tests keep a [`ResourceLedger`] clone and assert on it after the code
//! under test has torn everything down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use crate::error::{FsErrorCode, OpResult};
use crate::ops::{DirEntry, DirHandle, FileHandle, FsAttrs, FsOperations, OpenFile};

#[derive(Debug, Default)]
struct Counters {
    files_opened: AtomicUsize,
    files_closed: AtomicUsize,
    dirs_opened: AtomicUsize,
    dirs_closed: AtomicUsize,
    double_closes: AtomicUsize,
    destroyed: AtomicBool,
}

/// Shared view of what a [`CountingFs`] observed.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<Counters>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files_opened(&self) -> usize {
        self.counters.files_opened.load(Ordering::SeqCst)
    }

    pub fn files_closed(&self) -> usize {
        self.counters.files_closed.load(Ordering::SeqCst)
    }

    pub fn dirs_opened(&self) -> usize {
        self.counters.dirs_opened.load(Ordering::SeqCst)
    }

    pub fn dirs_closed(&self) -> usize {
        self.counters.dirs_closed.load(Ordering::SeqCst)
    }

    /// Closes the backend rejected because the handle was already gone.
    pub fn double_closes(&self) -> usize {
        self.counters.double_closes.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.counters.destroyed.load(Ordering::SeqCst)
    }

    /// Handles opened but not yet closed.
    pub fn outstanding(&self) -> usize {
        (self.files_opened() + self.dirs_opened())
            .saturating_sub(self.files_closed() + self.dirs_closed())
    }
}

/// Operation table that counts handle traffic of an inner table.
pub struct CountingFs<B> {
    inner: B,
    counters: Arc<Counters>,
}

impl<B: FsOperations> CountingFs<B> {
    pub fn new(inner: B, ledger: &ResourceLedger) -> Self {
        Self {
            inner,
            counters: Arc::clone(&ledger.counters),
        }
    }

    fn count_close(&self, result: OpResult<()>, closed: &AtomicUsize) -> OpResult<()> {
        match result {
            Ok(()) => {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(FsErrorCode::BadHandle) => {
                self.counters.double_closes.fetch_add(1, Ordering::SeqCst);
                Err(FsErrorCode::BadHandle)
            }
            Err(code) => Err(code),
        }
    }
}

impl<B> Drop for CountingFs<B> {
    fn drop(&mut self) {
        self.counters.destroyed.store(true, Ordering::SeqCst);
    }
}

impl<B: FsOperations> FsOperations for CountingFs<B> {
    fn open(&self, path: &str, create: bool) -> OpResult<OpenFile> {
        let opened = self.inner.open(path, create)?;
        self.counters.files_opened.fetch_add(1, Ordering::SeqCst);
        Ok(opened)
    }

    fn fgetattr(&self, file: FileHandle) -> OpResult<FsAttrs> {
        self.inner.fgetattr(file)
    }

    fn ftruncate(&self, file: FileHandle, size: u64) -> OpResult<()> {
        self.inner.ftruncate(file, size)
    }

    fn read(&self, file: FileHandle, buf: &mut [u8], offset: u64) -> OpResult<usize> {
        self.inner.read(file, buf, offset)
    }

    fn write(&self, file: FileHandle, buf: &[u8], offset: u64) -> OpResult<usize> {
        self.inner.write(file, buf, offset)
    }

    fn close(&self, file: FileHandle) -> OpResult<()> {
        self.count_close(self.inner.close(file), &self.counters.files_closed)
    }

    fn opendir(&self, path: &str) -> OpResult<DirHandle> {
        let dir = self.inner.opendir(path)?;
        self.counters.dirs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(dir)
    }

    fn readdir(&self, dir: DirHandle) -> OpResult<Option<DirEntry>> {
        self.inner.readdir(dir)
    }

    fn closedir(&self, dir: DirHandle) -> OpResult<()> {
        self.count_close(self.inner.closedir(dir), &self.counters.dirs_closed)
    }

    fn remove(&self, path: &str) -> OpResult<()> {
        self.inner.remove(path)
    }

    fn mkdir(&self, path: &str) -> OpResult<()> {
        self.inner.mkdir(path)
    }

    fn getattr(&self, path: &str) -> OpResult<FsAttrs> {
        self.inner.getattr(path)
    }

    fn rename(&self, src: &str, dst: &str) -> OpResult<()> {
        self.inner.rename(src, dst)
    }

    fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> OpResult<()> {
        self.inner.set_times(path, accessed, modified)
    }

    fn path_is_root(&self, path: &str) -> bool {
        self.inner.path_is_root(path)
    }

    fn path_sep(&self) -> &str {
        self.inner.path_sep()
    }

    fn path_equals(&self, a: &str, b: &str) -> bool {
        self.inner.path_equals(a, b)
    }

    fn path_is_parent(&self, parent: &str, child: &str) -> bool {
        self.inner.path_is_parent(parent, child)
    }

    fn path_is_valid(&self, path: &str) -> bool {
        self.inner.path_is_valid(path)
    }
}
