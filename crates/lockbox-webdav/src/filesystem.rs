//! WebDAV storage backend over a dynamic filesystem.
//!
//! [`DavBackend`] only sees the operation table, so it serves a native
//! directory and an encrypted folder the same way. Request paths are
//! resolved below the root the backend was created with.

use std::sync::Arc;
use std::time::SystemTime;

use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;
use lockbox_fs::{DirHandle, DynamicFs, FsErrorCode, FsOperations, join_path};
use tracing::{debug, instrument, trace};

use crate::dir_entry::LockboxDirEntry;
use crate::error::{ServerError, to_dav_error};
use crate::file::LockboxFile;
use crate::metadata::LockboxMetaData;

const COPY_CHUNK: usize = 64 * 1024;

/// The dynamic filesystem and the root requests are resolved against.
pub(crate) struct Storage {
    fs: DynamicFs,
    root: String,
}

impl Storage {
    pub(crate) fn ops(&self) -> &dyn FsOperations {
        &self.fs
    }

    /// Map a request path to a backend path below the root.
    fn resolve(&self, path: &DavPath) -> Result<String, FsError> {
        let relative = std::str::from_utf8(path.as_bytes()).map_err(|_| FsError::NotFound)?;
        let sep = self.fs.path_sep();
        let mut resolved = self.root.clone();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            if component == "." || component == ".." || component.contains(sep) {
                return Err(FsError::Forbidden);
            }
            resolved = join_path(&self.fs, &resolved, component);
        }
        if !self.fs.path_is_valid(&resolved) {
            return Err(FsError::GeneralFailure);
        }
        Ok(resolved)
    }

    fn list(&self, dir: DirHandle, dir_path: &str) -> Result<Vec<Box<dyn DavDirEntry>>, FsError> {
        let mut entries: Vec<Box<dyn DavDirEntry>> = Vec::new();
        while let Some(entry) = self.fs.readdir(dir).map_err(to_dav_error)? {
            let attrs = match entry.attrs {
                Some(attrs) => attrs,
                None => match self.fs.getattr(&join_path(&self.fs, dir_path, &entry.name)) {
                    Ok(attrs) => attrs,
                    Err(code) => {
                        trace!(name = %entry.name, error = %code, "Skipping entry without attributes");
                        continue;
                    }
                },
            };
            entries.push(Box::new(LockboxDirEntry::new(
                entry.name,
                LockboxMetaData::new(attrs),
            )));
        }
        Ok(entries)
    }
}

/// `DavFileSystem` implementation handed to the dav-server handler.
#[derive(Clone)]
pub struct DavBackend {
    storage: Arc<Storage>,
}

impl std::fmt::Debug for DavBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavBackend")
            .field("root", &self.storage.root)
            .field("fs", &self.storage.fs)
            .finish()
    }
}

impl DavBackend {
    /// Serve `fs` below `root`, which must be an existing directory.
    ///
    /// `fs` is consumed either way, so a rejected root releases it.
    pub fn new(fs: DynamicFs, root: &str) -> Result<Self, ServerError> {
        let invalid = |reason: String| ServerError::InvalidRoot {
            path: root.to_string(),
            reason,
        };
        if !fs.path_is_valid(root) {
            return Err(invalid("not a valid path".to_string()));
        }
        let attrs = fs.getattr(root).map_err(|code| invalid(code.to_string()))?;
        if !attrs.is_dir() {
            return Err(invalid(FsErrorCode::NotDir.to_string()));
        }
        debug!(root, "Storage backend ready");
        Ok(Self {
            storage: Arc::new(Storage {
                fs,
                root: root.to_string(),
            }),
        })
    }

    pub fn root(&self) -> &str {
        &self.storage.root
    }

    fn ops(&self) -> &dyn FsOperations {
        self.storage.ops()
    }

    fn open_file(&self, path: String, create: bool) -> Result<(LockboxFile, bool), FsError> {
        let opened = self.ops().open(&path, create).map_err(to_dav_error)?;
        let file = LockboxFile::new(Arc::clone(&self.storage), opened.handle, path);
        Ok((file, opened.created))
    }

    async fn copy_file(&self, from: String, to: String) -> Result<(), FsError> {
        let (mut source, _) = self.open_file(from, false)?;
        let (mut target, created) = self.open_file(to, true)?;
        if !created {
            target.truncate()?;
        }
        loop {
            let chunk = source.read_bytes(COPY_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            target.write_bytes(chunk).await?;
        }
        source.close()?;
        target.close()
    }
}

impl DavFileSystem for DavBackend {
    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            if options.create_new && self.ops().getattr(&path).is_ok() {
                return Err(FsError::Exists);
            }
            let (mut file, created) =
                self.open_file(path, options.create || options.create_new)?;
            if options.truncate && !created {
                file.truncate()?;
            }
            if options.append {
                file.seek_to_end()?;
            }
            Ok(Box::new(file) as Box<dyn DavFile>)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let dir_path = self.storage.resolve(path)?;
            let dir = self.ops().opendir(&dir_path).map_err(to_dav_error)?;
            let listed = self.storage.list(dir, &dir_path);
            let closed = self.ops().closedir(dir).map_err(to_dav_error);
            let entries = listed?;
            closed?;

            trace!(count = entries.len(), "Directory entries found");
            Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))) as FsStream<_>)
        })
    }

    #[instrument(level = "trace", skip(self), fields(path = %path.as_url_string()))]
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            let attrs = self.ops().getattr(&path).map_err(to_dav_error)?;
            Ok(Box::new(LockboxMetaData::new(attrs)) as Box<dyn DavMetaData>)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            self.ops().mkdir(&path).map_err(to_dav_error)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            if self.ops().path_is_root(&path) || path == self.storage.root {
                return Err(FsError::Forbidden);
            }
            let attrs = self.ops().getattr(&path).map_err(to_dav_error)?;
            if !attrs.is_dir() {
                return Err(FsError::Forbidden);
            }
            self.ops().remove(&path).map_err(to_dav_error)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            let attrs = self.ops().getattr(&path).map_err(to_dav_error)?;
            if attrs.is_dir() {
                return Err(FsError::Forbidden);
            }
            self.ops().remove(&path).map_err(to_dav_error)
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from = self.storage.resolve(from)?;
            let to = self.storage.resolve(to)?;
            self.ops().rename(&from, &to).map_err(to_dav_error)
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from = self.storage.resolve(from)?;
            let to = self.storage.resolve(to)?;
            let attrs = self.ops().getattr(&from).map_err(to_dav_error)?;
            if attrs.is_dir() {
                // dav-server walks collections itself; only the directory is made here.
                return match self.ops().mkdir(&to) {
                    Ok(()) | Err(FsErrorCode::Exists) => Ok(()),
                    Err(code) => Err(to_dav_error(code)),
                };
            }
            self.copy_file(from, to).await
        })
    }

    fn set_modified<'a>(&'a self, path: &'a DavPath, tm: SystemTime) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let path = self.storage.resolve(path)?;
            self.ops()
                .set_times(&path, None, Some(tm))
                .map_err(to_dav_error)
        })
    }

    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async { false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use lockbox_core::{KdfParams, Passphrase, init_enc_folder};
    use lockbox_fs::{FsIo, FsIoOps, MAX_FILE_SIZE, NativeFs, create_native_fs};
    use lockbox_fs::testing::{CountingFs, ResourceLedger};
    use std::io::SeekFrom;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> DavBackend {
        let root = dir.path().to_string_lossy().into_owned();
        DavBackend::new(DynamicFs::owned(NativeFs::new()), &root).unwrap()
    }

    fn dav(path: &str) -> DavPath {
        DavPath::new(path).unwrap()
    }

    fn write_options() -> OpenOptions {
        OpenOptions {
            write: true,
            create: true,
            truncate: true,
            ..OpenOptions::default()
        }
    }

    async fn put(backend: &DavBackend, path: &str, data: &[u8]) {
        let mut file = backend.open(&dav(path), write_options()).await.unwrap();
        file.write_bytes(Bytes::copy_from_slice(data)).await.unwrap();
        file.flush().await.unwrap();
    }

    async fn get(backend: &DavBackend, path: &str) -> Vec<u8> {
        let mut file = backend
            .open(&dav(path), OpenOptions::default())
            .await
            .unwrap();
        let mut out = Vec::new();
        loop {
            let chunk = file.read_bytes(7).await.unwrap();
            if chunk.is_empty() {
                return out;
            }
            out.extend_from_slice(&chunk);
        }
    }

    async fn names(backend: &DavBackend, path: &str) -> Vec<String> {
        let mut stream = backend
            .read_dir(&dav(path), ReadDirMeta::Data)
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(entry) = stream.next().await {
            names.push(String::from_utf8(entry.unwrap().name()).unwrap());
        }
        names.sort();
        names
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let err = DavBackend::new(
            DynamicFs::owned(NativeFs::new()),
            &file.to_string_lossy(),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoot { .. }));

        let missing = dir.path().join("missing");
        let err = DavBackend::new(
            DynamicFs::owned(NativeFs::new()),
            &missing.to_string_lossy(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no such file or directory"));
    }

    #[test]
    fn test_rejected_root_releases_filesystem() {
        let ledger = ResourceLedger::new();
        let fs = DynamicFs::owned(CountingFs::new(NativeFs::new(), &ledger));
        assert!(DavBackend::new(fs, "relative/path").is_err());
        assert!(ledger.is_destroyed());
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        put(&backend, "/hello.txt", b"hello, lockbox").await;
        assert_eq!(get(&backend, "/hello.txt").await, b"hello, lockbox");
        assert_eq!(std::fs::read(dir.path().join("hello.txt")).unwrap(), b"hello, lockbox");

        let meta = backend.metadata(&dav("/hello.txt")).await.unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.len(), 14);
    }

    #[tokio::test]
    async fn test_create_new_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        put(&backend, "/a", b"1").await;

        let options = OpenOptions {
            write: true,
            create_new: true,
            ..OpenOptions::default()
        };
        assert_eq!(
            backend.open(&dav("/a"), options).await.unwrap_err(),
            FsError::Exists
        );
    }

    #[tokio::test]
    async fn test_seek_and_append() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        put(&backend, "/log", b"one").await;

        let options = OpenOptions {
            write: true,
            append: true,
            ..OpenOptions::default()
        };
        let mut file = backend.open(&dav("/log"), options).await.unwrap();
        file.write_bytes(Bytes::from_static(b" two")).await.unwrap();
        assert_eq!(file.seek(SeekFrom::End(-3)).await.unwrap(), 4);
        assert_eq!(&file.read_bytes(10).await.unwrap()[..], b"two");
        assert!(file.seek(SeekFrom::Current(-100)).await.is_err());
        drop(file);

        assert_eq!(get(&backend, "/log").await, b"one two");
    }

    #[tokio::test]
    async fn test_seek_past_size_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        put(&backend, "/f", b"abc").await;

        let mut file = backend.open(&dav("/f"), write_options()).await.unwrap();
        assert!(file.seek(SeekFrom::Start(u64::MAX)).await.is_err());
        assert!(file.seek(SeekFrom::Start(MAX_FILE_SIZE + 1)).await.is_err());
        assert!(file.seek(SeekFrom::Current(i64::MAX)).await.is_err());
        assert_eq!(file.seek(SeekFrom::Current(0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_write_to_encrypted_file_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().to_string_lossy().into_owned();
        let params = KdfParams {
            log_n: 10,
            ..KdfParams::default()
        };
        let enc: Arc<dyn FsIo> = Arc::new(
            init_enc_folder(create_native_fs().unwrap(), &folder, Passphrase::new("pw"), params)
                .unwrap(),
        );
        let backend = DavBackend::new(DynamicFs::owned(FsIoOps::new(Arc::clone(&enc))), "/").unwrap();

        let mut file = backend.open(&dav("/big"), write_options()).await.unwrap();
        assert_eq!(file.seek(SeekFrom::Start(MAX_FILE_SIZE)).await.unwrap(), MAX_FILE_SIZE);
        assert!(matches!(
            file.write_bytes(Bytes::from_static(b"x")).await,
            Err(FsError::InsufficientStorage)
        ));
        file.seek(SeekFrom::Start(0)).await.unwrap();
        file.write_bytes(Bytes::from_static(b"small")).await.unwrap();
        drop(file);

        assert_eq!(get(&backend, "/big").await, b"small");
    }

    #[tokio::test]
    async fn test_directories() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        backend.create_dir(&dav("/docs")).await.unwrap();
        put(&backend, "/docs/a.md", b"a").await;
        put(&backend, "/top.md", b"t").await;
        assert_eq!(names(&backend, "/").await, vec!["docs", "top.md"]);
        assert_eq!(names(&backend, "/docs/").await, vec!["a.md"]);

        assert_eq!(
            backend.remove_dir(&dav("/top.md")).await.unwrap_err(),
            FsError::Forbidden
        );
        assert_eq!(
            backend.remove_file(&dav("/docs")).await.unwrap_err(),
            FsError::Forbidden
        );
        assert_eq!(
            backend.remove_dir(&dav("/docs")).await.unwrap_err(),
            FsError::Forbidden
        );
        backend.remove_file(&dav("/docs/a.md")).await.unwrap();
        backend.remove_dir(&dav("/docs")).await.unwrap();
        assert_eq!(
            backend.metadata(&dav("/docs")).await.unwrap_err(),
            FsError::NotFound
        );
        assert_eq!(
            backend.remove_dir(&dav("/")).await.unwrap_err(),
            FsError::Forbidden
        );
    }

    #[tokio::test]
    async fn test_rename_and_copy() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        put(&backend, "/src", b"payload").await;

        backend.copy(&dav("/src"), &dav("/copy")).await.unwrap();
        backend.rename(&dav("/src"), &dav("/moved")).await.unwrap();

        assert_eq!(get(&backend, "/copy").await, b"payload");
        assert_eq!(get(&backend, "/moved").await, b"payload");
        assert_eq!(
            backend.metadata(&dav("/src")).await.unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn test_set_modified() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        put(&backend, "/t", b"x").await;

        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        backend.set_modified(&dav("/t"), when).await.unwrap();
        let meta = backend.metadata(&dav("/t")).await.unwrap();
        assert_eq!(meta.modified().unwrap(), when);
    }

    #[tokio::test]
    async fn test_handles_are_closed() {
        let dir = TempDir::new().unwrap();
        let ledger = ResourceLedger::new();
        let root = dir.path().to_string_lossy().into_owned();
        let backend = DavBackend::new(
            DynamicFs::owned(CountingFs::new(NativeFs::new(), &ledger)),
            &root,
        )
        .unwrap();

        put(&backend, "/f", b"data").await;
        get(&backend, "/f").await;
        names(&backend, "/").await;
        backend.copy(&dav("/f"), &dav("/g")).await.unwrap();
        assert_eq!(ledger.outstanding(), 0);
        assert_eq!(ledger.double_closes(), 0);

        drop(backend);
        assert!(ledger.is_destroyed());
    }
}
