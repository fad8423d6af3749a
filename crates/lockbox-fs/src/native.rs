//! Native passthrough backend.
//!
//! Every slot of [`FsOperations`] maps onto the matching host primitive.
//! Paths are absolute host paths.

use std::fs::{self, File, OpenOptions, ReadDir};
use std::io;
use std::path::{Component, Path};
use std::time::SystemTime;

use filetime::FileTime;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{FsErrorCode, OpResult};
use crate::handle_table::HandleTable;
use crate::ops::{DirEntry, DirHandle, FileHandle, FsAttrs, FsOperations, OpenFile};

/// Operation table over the host filesystem.
#[derive(Debug, Default)]
pub struct NativeFs {
    files: HandleTable<File>,
    dirs: HandleTable<Mutex<ReadDir>>,
}

impl NativeFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files and directory streams currently open.
    pub fn open_handles(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    fn with_file<R>(&self, file: FileHandle, f: impl FnOnce(&File) -> io::Result<R>) -> OpResult<R> {
        let entry = self
            .files
            .get(file.into_raw())
            .ok_or(FsErrorCode::BadHandle)?;
        f(entry.value()).map_err(FsErrorCode::from)
    }
}

impl Drop for NativeFs {
    fn drop(&mut self) {
        if self.open_handles() > 0 {
            debug!(
                files = self.files.len(),
                dirs = self.dirs.len(),
                "Native fs dropped with open handles"
            );
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

/// Open an existing file read-write, or read-only when writing is denied.
/// Writes through a read-only handle fail later.
fn open_existing(path: &str) -> OpResult<File> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(File::open(path)?),
        Err(e) => Err(FsErrorCode::from_io(&e)),
    }
}

fn read_full_at(file: &File, buf: &mut [u8], mut offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], offset) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_full_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<usize> {
    let total = buf.len();
    while !buf.is_empty() {
        match write_at(file, buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn components_equal(a: Component<'_>, b: Component<'_>) -> bool {
    if cfg!(windows) {
        a.as_os_str()
            .to_string_lossy()
            .eq_ignore_ascii_case(&b.as_os_str().to_string_lossy())
    } else {
        a == b
    }
}

impl FsOperations for NativeFs {
    fn open(&self, path: &str, create: bool) -> OpResult<OpenFile> {
        trace!(path, create, "native open");
        let fresh = if create {
            match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
                Ok(file) => Some(file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => None,
                Err(e) => return Err(FsErrorCode::from_io(&e)),
            }
        } else {
            None
        };
        let created = fresh.is_some();
        let file = match fresh {
            Some(file) => file,
            None => open_existing(path)?,
        };
        if file.metadata()?.is_dir() {
            return Err(FsErrorCode::IsDir);
        }
        let handle = FileHandle::from_raw(self.files.insert(file));
        Ok(OpenFile { handle, created })
    }

    fn fgetattr(&self, file: FileHandle) -> OpResult<FsAttrs> {
        self.with_file(file, |f| f.metadata().map(|m| FsAttrs::from_metadata(&m)))
    }

    fn ftruncate(&self, file: FileHandle, size: u64) -> OpResult<()> {
        self.with_file(file, |f| f.set_len(size))
    }

    fn read(&self, file: FileHandle, buf: &mut [u8], offset: u64) -> OpResult<usize> {
        self.with_file(file, |f| read_full_at(f, buf, offset))
    }

    fn write(&self, file: FileHandle, buf: &[u8], offset: u64) -> OpResult<usize> {
        self.with_file(file, |f| write_full_at(f, buf, offset))
    }

    fn close(&self, file: FileHandle) -> OpResult<()> {
        self.files
            .remove(file.into_raw())
            .map(drop)
            .ok_or(FsErrorCode::BadHandle)
    }

    fn opendir(&self, path: &str) -> OpResult<DirHandle> {
        let stream = fs::read_dir(path)?;
        Ok(DirHandle::from_raw(self.dirs.insert(Mutex::new(stream))))
    }

    fn readdir(&self, dir: DirHandle) -> OpResult<Option<DirEntry>> {
        let entry = self
            .dirs
            .get(dir.into_raw())
            .ok_or(FsErrorCode::BadHandle)?;
        let mut stream = entry.value().lock();
        loop {
            let Some(next) = stream.next() else {
                return Ok(None);
            };
            let next = next?;
            // Names that are not UTF-8 cannot be expressed at this layer.
            let Ok(name) = next.file_name().into_string() else {
                debug!(name = ?next.file_name(), "Skipping non-UTF-8 entry");
                continue;
            };
            let attrs = next.metadata().ok().map(|m| FsAttrs::from_metadata(&m));
            return Ok(Some(DirEntry { name, attrs }));
        }
    }

    fn closedir(&self, dir: DirHandle) -> OpResult<()> {
        self.dirs
            .remove(dir.into_raw())
            .map(drop)
            .ok_or(FsErrorCode::BadHandle)
    }

    fn remove(&self, path: &str) -> OpResult<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> OpResult<()> {
        fs::create_dir(path).map_err(FsErrorCode::from)
    }

    fn getattr(&self, path: &str) -> OpResult<FsAttrs> {
        let meta = fs::metadata(path)?;
        Ok(FsAttrs::from_metadata(&meta))
    }

    fn rename(&self, src: &str, dst: &str) -> OpResult<()> {
        fs::rename(src, dst).map_err(FsErrorCode::from)
    }

    fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> OpResult<()> {
        match (accessed, modified) {
            (Some(a), Some(m)) => filetime::set_file_times(
                path,
                FileTime::from_system_time(a),
                FileTime::from_system_time(m),
            )?,
            (Some(a), None) => filetime::set_file_atime(path, FileTime::from_system_time(a))?,
            (None, Some(m)) => filetime::set_file_mtime(path, FileTime::from_system_time(m))?,
            (None, None) => {}
        }
        Ok(())
    }

    fn path_is_root(&self, path: &str) -> bool {
        self.path_is_valid(path) && Path::new(path).parent().is_none()
    }

    fn path_sep(&self) -> &str {
        std::path::MAIN_SEPARATOR_STR
    }

    fn path_equals(&self, a: &str, b: &str) -> bool {
        let mut a = Path::new(a).components();
        let mut b = Path::new(b).components();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if components_equal(x, y) => {}
                _ => return false,
            }
        }
    }

    fn path_is_parent(&self, parent: &str, child: &str) -> bool {
        let parent: Vec<_> = Path::new(parent).components().collect();
        let child: Vec<_> = Path::new(child).components().collect();
        child.len() > parent.len()
            && parent
                .iter()
                .zip(&child)
                .all(|(p, c)| components_equal(*p, *c))
    }

    fn path_is_valid(&self, path: &str) -> bool {
        let p = Path::new(path);
        !path.contains('\0')
            && p.is_absolute()
            && p
                .components()
                .all(|c| !matches!(c, Component::CurDir | Component::ParentDir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn path_in(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_open_create_reports_creation() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let path = path_in(&tmp, "a.txt");

        let first = fs.open(&path, true).unwrap();
        assert!(first.created);
        fs.close(first.handle).unwrap();

        let second = fs.open(&path, true).unwrap();
        assert!(!second.created);
        fs.close(second.handle).unwrap();
    }

    #[test]
    fn test_concurrent_create_reports_one_creator() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();

        for round in 0..16 {
            let path = path_in(&tmp, &format!("race-{round}"));
            let opened: Vec<OpenFile> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..8)
                    .map(|_| scope.spawn(|| fs.open(&path, true).unwrap()))
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            assert_eq!(opened.iter().filter(|o| o.created).count(), 1);
            for file in opened {
                fs.close(file.handle).unwrap();
            }
        }
    }

    #[test]
    fn test_open_missing_without_create() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        assert_eq!(
            fs.open(&path_in(&tmp, "nope"), false),
            Err(FsErrorCode::NotFound)
        );
    }

    #[test]
    fn test_open_directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let dir = tmp.path().to_string_lossy().into_owned();
        assert_eq!(fs.open(&dir, false), Err(FsErrorCode::IsDir));
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_positional_read_write_and_truncate() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let opened = fs.open(&path_in(&tmp, "data"), true).unwrap();
        let h = opened.handle;

        assert_eq!(fs.write(h, b"hello world", 0).unwrap(), 11);
        assert_eq!(fs.write(h, b"W", 6).unwrap(), 1);

        let mut buf = [0u8; 32];
        let n = fs.read(h, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello World");

        let n = fs.read(h, &mut buf, 6).unwrap();
        assert_eq!(&buf[..n], b"World");

        fs.ftruncate(h, 5).unwrap();
        assert_eq!(fs.fgetattr(h).unwrap().size, 5);
        assert_eq!(fs.read(h, &mut buf, 5).unwrap(), 0);

        fs.close(h).unwrap();
    }

    #[test]
    fn test_close_twice_is_bad_handle() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let h = fs.open(&path_in(&tmp, "x"), true).unwrap().handle;
        fs.close(h).unwrap();
        assert_eq!(fs.close(h), Err(FsErrorCode::BadHandle));
        let mut buf = [0u8; 1];
        assert_eq!(fs.read(h, &mut buf, 0), Err(FsErrorCode::BadHandle));
    }

    #[test]
    fn test_readdir_lists_entries_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("one"), b"1").unwrap();
        std::fs::create_dir(tmp.path().join("two")).unwrap();
        let fs = NativeFs::new();

        let dir = fs.opendir(&tmp.path().to_string_lossy()).unwrap();
        let mut names = Vec::new();
        while let Some(entry) = fs.readdir(dir).unwrap() {
            if entry.name == "two" {
                assert!(entry.attrs.as_ref().unwrap().is_dir());
            }
            names.push(entry.name);
        }
        fs.closedir(dir).unwrap();

        names.sort();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(fs.closedir(dir), Err(FsErrorCode::BadHandle));
    }

    #[test]
    fn test_remove_file_and_directory() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let dir = path_in(&tmp, "d");
        let file = path_in(&tmp, "d/f");

        fs.mkdir(&dir).unwrap();
        assert_eq!(fs.mkdir(&dir), Err(FsErrorCode::Exists));
        let h = fs.open(&file, true).unwrap().handle;
        fs.close(h).unwrap();

        assert_eq!(fs.remove(&dir), Err(FsErrorCode::NotEmpty));
        fs.remove(&file).unwrap();
        fs.remove(&dir).unwrap();
        assert_eq!(fs.getattr(&dir), Err(FsErrorCode::NotFound));
    }

    #[test]
    fn test_rename_replaces_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a"), b"A").unwrap();
        std::fs::write(tmp.path().join("b"), b"B").unwrap();
        let fs = NativeFs::new();

        fs.rename(&path_in(&tmp, "a"), &path_in(&tmp, "b")).unwrap();
        assert_eq!(std::fs::read(tmp.path().join("b")).unwrap(), b"A");
        assert!(!tmp.path().join("a").exists());
    }

    #[test]
    fn test_set_times_updates_mtime_only() {
        let tmp = TempDir::new().unwrap();
        let path = path_in(&tmp, "t");
        std::fs::write(&path, b"").unwrap();
        let fs = NativeFs::new();

        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        fs.set_times(&path, None, Some(mtime)).unwrap();
        assert_eq!(fs.getattr(&path).unwrap().modified, mtime);
    }

    #[cfg(unix)]
    #[test]
    fn test_path_predicates() {
        let fs = NativeFs::new();
        assert!(fs.path_is_valid("/"));
        assert!(fs.path_is_valid("/a/b"));
        assert!(!fs.path_is_valid("a/b"));
        assert!(!fs.path_is_valid("/a/../b"));
        assert!(!fs.path_is_valid("/a\0b"));

        assert!(fs.path_is_root("/"));
        assert!(!fs.path_is_root("/a"));

        assert!(fs.path_equals("/a/b", "/a/b/"));
        assert!(!fs.path_equals("/a/b", "/a/c"));

        assert!(fs.path_is_parent("/a", "/a/b/c"));
        assert!(!fs.path_is_parent("/a/b", "/a/b"));
        assert!(!fs.path_is_parent("/a/b", "/a/bc"));
        assert_eq!(fs.path_sep(), "/");
    }

    #[test]
    fn test_drop_releases_open_handles() {
        let tmp = TempDir::new().unwrap();
        let fs = NativeFs::new();
        let _h = fs.open(&path_in(&tmp, "held"), true).unwrap();
        let _d = fs.opendir(&tmp.path().to_string_lossy()).unwrap();
        assert_eq!(fs.open_handles(), 2);
        drop(fs);
        // The directory can be removed once nothing holds it open.
        tmp.close().unwrap();
    }
}
