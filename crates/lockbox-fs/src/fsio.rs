//! Rich, path-based filesystem interface.
//!
//! [`FsIo`] is what the encrypted filesystem is layered on and what the
//! server serves. Paths are [`FsPath`] values that the owning filesystem
//! validated; files and directory streams are owned objects that close
//! themselves on drop.

use std::fmt;
use std::time::SystemTime;

use crate::error::{FsIoError, FsIoResult};
use crate::ops::{DirEntry, FsAttrs};

/// A path accepted by some [`FsIo`]. Obtain one through
/// [`FsIo::path_from_string`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsPath(String);

impl FsPath {
    /// Wrap a string the caller has already validated against its filesystem.
    pub fn new_unchecked(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How [`FsIo::open`] treats the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub write: bool,
    pub create: bool,
    /// Fail with `Exists` if the file is already there.
    pub exclusive: bool,
}

impl OpenMode {
    pub const READ: Self = Self {
        write: false,
        create: false,
        exclusive: false,
    };

    pub const READ_WRITE: Self = Self {
        write: true,
        create: false,
        exclusive: false,
    };

    pub const CREATE: Self = Self {
        write: true,
        create: true,
        exclusive: false,
    };
}

/// An open file. Dropping it closes it.
pub trait FsFile: Send {
    fn path(&self) -> &FsPath;

    fn is_writable(&self) -> bool;

    /// Whether the open that produced this file created it.
    fn created(&self) -> bool;

    fn get_attrs(&self) -> FsIoResult<FsAttrs>;

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> FsIoResult<usize>;

    fn write(&mut self, offset: u64, buf: &[u8]) -> FsIoResult<usize>;

    fn truncate(&mut self, size: u64) -> FsIoResult<()>;

    /// Push buffered changes down to the backing store.
    fn flush(&mut self) -> FsIoResult<()>;
}

/// An open directory stream. Dropping it closes it.
pub trait FsDirectory: Send {
    fn read_entry(&mut self) -> FsIoResult<Option<DirEntry>>;
}

pub trait FsIo: Send + Sync {
    /// Validate `path` and wrap it. Every entry point rejects malformed paths
    /// here rather than passing them to the backend.
    fn path_from_string(&self, path: &str) -> FsIoResult<FsPath>;

    fn path_sep(&self) -> &str;

    fn path_is_root(&self, path: &FsPath) -> bool;

    fn path_equals(&self, a: &FsPath, b: &FsPath) -> bool;

    fn path_is_parent(&self, parent: &FsPath, child: &FsPath) -> bool;

    fn open(&self, path: &FsPath, mode: OpenMode) -> FsIoResult<Box<dyn FsFile>>;

    fn opendir(&self, path: &FsPath) -> FsIoResult<Box<dyn FsDirectory>>;

    fn mkdir(&self, path: &FsPath) -> FsIoResult<()>;

    fn unlink(&self, path: &FsPath) -> FsIoResult<()>;

    fn rmdir(&self, path: &FsPath) -> FsIoResult<()>;

    fn rename(&self, from: &FsPath, to: &FsPath) -> FsIoResult<()>;

    fn get_attrs(&self, path: &FsPath) -> FsIoResult<FsAttrs>;

    fn set_times(
        &self,
        path: &FsPath,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> FsIoResult<()>;

    fn join(&self, parent: &FsPath, name: &str) -> FsIoResult<FsPath> {
        let sep = self.path_sep();
        if name.is_empty() || name.contains(sep) {
            return Err(FsIoError::InvalidPath(name.to_owned()));
        }
        let joined = if parent.as_str().ends_with(sep) {
            format!("{parent}{name}")
        } else {
            format!("{parent}{sep}{name}")
        };
        self.path_from_string(&joined)
    }

    /// Final component; the root's basename is empty.
    fn basename<'p>(&self, path: &'p FsPath) -> &'p str {
        if self.path_is_root(path) {
            return "";
        }
        let trimmed = path.as_str().trim_end_matches(self.path_sep());
        trimmed
            .rsplit_once(self.path_sep())
            .map_or(trimmed, |(_, name)| name)
    }

    /// Parent directory; the root is its own parent.
    fn dirname(&self, path: &FsPath) -> FsIoResult<FsPath> {
        if self.path_is_root(path) {
            return Ok(path.clone());
        }
        let sep = self.path_sep();
        let trimmed = path.as_str().trim_end_matches(sep);
        let (head, _) = trimmed
            .rsplit_once(sep)
            .ok_or_else(|| FsIoError::InvalidPath(path.to_string()))?;
        match self.path_from_string(head) {
            Ok(parent) if !head.is_empty() => Ok(parent),
            _ => self.path_from_string(&format!("{head}{sep}")),
        }
    }
}
