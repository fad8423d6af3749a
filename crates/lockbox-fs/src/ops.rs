//! The filesystem operation table.
//!
//! [`FsOperations`] is the canonical primitive set every backend supplies.
//! None of its methods has a default body, so a backend that misses a slot
//! does not compile. Tearing a backend down is its `Drop`.
//!
//! Paths at this layer are plain strings in the backend's own syntax; callers
//! check them with [`FsOperations::path_is_valid`] before use.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::OpResult;

/// Largest file size, and largest file offset, any layer accepts. Buffered
/// backends hold a whole file in memory, so requests past this fail with
/// [`FsErrorCode::NoSpace`](crate::FsErrorCode::NoSpace).
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// Opaque id of an open file, issued by the backend that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

impl FileHandle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Opaque id of an open directory stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(u64);

impl DirHandle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Other,
}

/// Attributes reported by `getattr`/`fgetattr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAttrs {
    pub kind: FileKind,
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: Option<SystemTime>,
    /// Backend-specific identity (inode number on Unix, 0 when unknown).
    pub file_id: u64,
}

impl FsAttrs {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else if meta.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        #[cfg(unix)]
        let file_id = std::os::unix::fs::MetadataExt::ino(meta);
        #[cfg(not(unix))]
        let file_id = 0;

        Self {
            kind,
            size: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
            accessed: meta.accessed().unwrap_or(UNIX_EPOCH),
            created: meta.created().ok(),
            file_id,
        }
    }
}

/// One directory stream entry. `.` and `..` are never produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Present when the backend could stat the entry cheaply.
    pub attrs: Option<FsAttrs>,
}

/// Result of [`FsOperations::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub handle: FileHandle,
    /// Whether this call created the file.
    pub created: bool,
}

/// The primitive operation set bound to one backend.
pub trait FsOperations: Send + Sync {
    /// Open a file for reading and writing, creating it when `create` is set.
    fn open(&self, path: &str, create: bool) -> OpResult<OpenFile>;

    fn fgetattr(&self, file: FileHandle) -> OpResult<FsAttrs>;

    fn ftruncate(&self, file: FileHandle, size: u64) -> OpResult<()>;

    /// Positional read. Fewer bytes than requested means end of file.
    fn read(&self, file: FileHandle, buf: &mut [u8], offset: u64) -> OpResult<usize>;

    fn write(&self, file: FileHandle, buf: &[u8], offset: u64) -> OpResult<usize>;

    fn close(&self, file: FileHandle) -> OpResult<()>;

    fn opendir(&self, path: &str) -> OpResult<DirHandle>;

    /// Next entry of the stream, `None` at the end.
    fn readdir(&self, dir: DirHandle) -> OpResult<Option<DirEntry>>;

    fn closedir(&self, dir: DirHandle) -> OpResult<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &str) -> OpResult<()>;

    fn mkdir(&self, path: &str) -> OpResult<()>;

    fn getattr(&self, path: &str) -> OpResult<FsAttrs>;

    fn rename(&self, src: &str, dst: &str) -> OpResult<()>;

    /// Update access and modification times; `None` leaves a time untouched.
    fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> OpResult<()>;

    fn path_is_root(&self, path: &str) -> bool;

    fn path_sep(&self) -> &str;

    fn path_equals(&self, a: &str, b: &str) -> bool;

    /// Whether `parent` is a proper ancestor of `child`.
    fn path_is_parent(&self, parent: &str, child: &str) -> bool;

    fn path_is_valid(&self, path: &str) -> bool;
}

/// Append `name` to `parent` using the backend's separator.
pub fn join_path(ops: &dyn FsOperations, parent: &str, name: &str) -> String {
    let sep = ops.path_sep();
    if parent.ends_with(sep) {
        format!("{parent}{name}")
    } else {
        format!("{parent}{sep}{name}")
    }
}
