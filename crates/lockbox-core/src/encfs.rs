//! The encrypted filesystem.
//!
//! [`EncryptedFs`] presents a virtual `/`-separated tree. Each virtual path
//! maps onto the base filesystem by encrypting every component and joining
//! the results below the folder root. File contents are decrypted into a
//! [`WriteBuffer`] on open and written back, re-encrypted, on flush or drop.
//!
//! Errors coming back from the base are relabeled with the virtual path so
//! that encrypted names never leak to clients.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use lockbox_fs::{
    DirEntry, FsAttrs, FsDirectory, FsErrorCode, FsFile, FsIo, FsIoError, FsIoResult, FsPath,
    OpenMode,
};
use tracing::{debug, instrument, trace, warn};

use crate::config::EncfsConfig;
use crate::content::{self, ContentError};
use crate::error::EncFsError;
use crate::keys::VolumeKey;
use crate::names::{self, NameError};
use crate::secret::PasswordReader;
use crate::write_buffer::WriteBuffer;

const SEP: &str = "/";
const ROOT: &str = "/";

/// Everything [`EncryptedFs::init`] needs besides the configuration.
pub struct EncFsOptions {
    pub base: Arc<dyn FsIo>,
    /// Folder on `base` that holds the encrypted tree.
    pub root: FsPath,
    pub password_reader: Box<dyn PasswordReader>,
}

impl fmt::Debug for EncFsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncFsOptions")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

struct EncInner {
    base: Arc<dyn FsIo>,
    root: FsPath,
    key: VolumeKey,
}

impl EncInner {
    fn name_error(path: &FsPath, err: NameError) -> FsIoError {
        match err {
            NameError::TooLong { .. } => FsIoError::fs(FsErrorCode::InvalidPath, path.as_str()),
            other => FsIoError::Integrity {
                path: path.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Base path of a virtual path.
    fn to_base(&self, path: &FsPath) -> FsIoResult<FsPath> {
        let mut current = self.root.clone();
        for component in components(path) {
            let stored =
                names::encrypt_name(component, &self.key).map_err(|e| Self::name_error(path, e))?;
            current = self.base.join(&current, &stored)?;
        }
        Ok(current)
    }

    /// Attributes as clients see them: file sizes are cleartext sizes.
    fn cleartext_attrs(mut attrs: FsAttrs) -> FsAttrs {
        if attrs.is_file() {
            attrs.size = content::plaintext_size(attrs.size);
        }
        attrs
    }
}

fn components(path: &FsPath) -> impl Iterator<Item = &str> {
    path.as_str().split(SEP).filter(|c| !c.is_empty())
}

/// Replace the base path in `err` with the virtual one.
fn relabel(err: FsIoError, path: &FsPath) -> FsIoError {
    let path = path.to_string();
    match err {
        FsIoError::Fs { code, .. } => FsIoError::Fs { code, path },
        FsIoError::InvalidPath(_) => FsIoError::InvalidPath(path),
        FsIoError::Io { source, .. } => FsIoError::Io { path, source },
        FsIoError::Integrity { reason, .. } => FsIoError::Integrity { path, reason },
        FsIoError::ReadOnly { .. } => FsIoError::ReadOnly { path },
        FsIoError::Closed => FsIoError::Closed,
    }
}

fn integrity(path: &FsPath, err: &ContentError) -> FsIoError {
    FsIoError::Integrity {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// Filesystem that encrypts names and contents on top of a base [`FsIo`].
#[derive(Clone)]
pub struct EncryptedFs {
    inner: Arc<EncInner>,
}

impl fmt::Debug for EncryptedFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFs")
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}

impl EncryptedFs {
    /// Unlock the folder described by `options` with `config`.
    ///
    /// The password reader is consumed; whatever secret it still holds is
    /// dropped before this returns, on success and on failure.
    #[instrument(level = "debug", skip_all, fields(root = %options.root))]
    pub fn init(options: EncFsOptions, config: &EncfsConfig) -> Result<Self, EncFsError> {
        let EncFsOptions {
            base,
            root,
            mut password_reader,
        } = options;

        let attrs = base.get_attrs(&root).map_err(EncFsError::Folder)?;
        if !attrs.is_dir() {
            return Err(EncFsError::Folder(FsIoError::fs(
                FsErrorCode::NotDir,
                root.as_str(),
            )));
        }

        let key = config.unlock(password_reader.as_mut())?;
        drop(password_reader);
        debug!("Encrypted filesystem unlocked");

        Ok(Self {
            inner: Arc::new(EncInner { base, root, key }),
        })
    }

    /// Folder on the base filesystem holding this tree.
    pub fn root(&self) -> &FsPath {
        &self.inner.root
    }
}

impl FsIo for EncryptedFs {
    fn path_from_string(&self, path: &str) -> FsIoResult<FsPath> {
        if path == ROOT {
            return Ok(FsPath::new_unchecked(ROOT));
        }
        let valid = path.starts_with(SEP)
            && !path.contains('\0')
            && path[1..]
                .split(SEP)
                .all(|c| !c.is_empty() && c != "." && c != "..");
        if valid {
            Ok(FsPath::new_unchecked(path))
        } else {
            Err(FsIoError::InvalidPath(path.to_owned()))
        }
    }

    fn path_sep(&self) -> &str {
        SEP
    }

    fn path_is_root(&self, path: &FsPath) -> bool {
        path.as_str() == ROOT
    }

    fn path_equals(&self, a: &FsPath, b: &FsPath) -> bool {
        a == b
    }

    fn path_is_parent(&self, parent: &FsPath, child: &FsPath) -> bool {
        let (parent, child) = (parent.as_str(), child.as_str());
        if parent == child {
            return false;
        }
        if parent == ROOT {
            return child.starts_with(SEP);
        }
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with(SEP))
    }

    #[instrument(level = "trace", skip(self), fields(path = %path))]
    fn open(&self, path: &FsPath, mode: OpenMode) -> FsIoResult<Box<dyn FsFile>> {
        if self.path_is_root(path) {
            return Err(FsIoError::fs(FsErrorCode::IsDir, path.as_str()));
        }
        let base_path = self.inner.to_base(path)?;
        let mut base_file = self
            .inner
            .base
            .open(&base_path, mode)
            .map_err(|e| relabel(e, path))?;

        let buffer = if base_file.created() {
            WriteBuffer::for_create()
        } else {
            let ciphertext = read_all(base_file.as_mut()).map_err(|e| relabel(e, path))?;
            let plaintext =
                content::decrypt_file(&ciphertext, &self.inner.key).map_err(|e| integrity(path, &e))?;
            WriteBuffer::new(plaintext)
        };

        trace!(created = base_file.created(), size = buffer.len(), "Opened encrypted file");
        Ok(Box::new(EncFile {
            fs: Arc::clone(&self.inner),
            path: path.clone(),
            writable: mode.write || mode.create,
            created: base_file.created(),
            base: base_file,
            buffer,
        }))
    }

    #[instrument(level = "trace", skip(self), fields(path = %path))]
    fn opendir(&self, path: &FsPath) -> FsIoResult<Box<dyn FsDirectory>> {
        let base_path = self.inner.to_base(path)?;
        let base_dir = self
            .inner
            .base
            .opendir(&base_path)
            .map_err(|e| relabel(e, path))?;
        Ok(Box::new(EncDirectory {
            fs: Arc::clone(&self.inner),
            path: path.clone(),
            base: base_dir,
        }))
    }

    fn mkdir(&self, path: &FsPath) -> FsIoResult<()> {
        let base_path = self.inner.to_base(path)?;
        self.inner
            .base
            .mkdir(&base_path)
            .map_err(|e| relabel(e, path))
    }

    fn unlink(&self, path: &FsPath) -> FsIoResult<()> {
        let base_path = self.inner.to_base(path)?;
        self.inner
            .base
            .unlink(&base_path)
            .map_err(|e| relabel(e, path))
    }

    fn rmdir(&self, path: &FsPath) -> FsIoResult<()> {
        if self.path_is_root(path) {
            return Err(FsIoError::fs(FsErrorCode::Access, path.as_str()));
        }
        let base_path = self.inner.to_base(path)?;
        self.inner
            .base
            .rmdir(&base_path)
            .map_err(|e| relabel(e, path))
    }

    fn rename(&self, from: &FsPath, to: &FsPath) -> FsIoResult<()> {
        if self.path_is_root(from) || self.path_is_root(to) {
            return Err(FsIoError::fs(FsErrorCode::Access, from.as_str()));
        }
        let base_from = self.inner.to_base(from)?;
        let base_to = self.inner.to_base(to)?;
        self.inner
            .base
            .rename(&base_from, &base_to)
            .map_err(|e| relabel(e, from))
    }

    fn get_attrs(&self, path: &FsPath) -> FsIoResult<FsAttrs> {
        let base_path = self.inner.to_base(path)?;
        self.inner
            .base
            .get_attrs(&base_path)
            .map(EncInner::cleartext_attrs)
            .map_err(|e| relabel(e, path))
    }

    fn set_times(
        &self,
        path: &FsPath,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> FsIoResult<()> {
        let base_path = self.inner.to_base(path)?;
        self.inner
            .base
            .set_times(&base_path, accessed, modified)
            .map_err(|e| relabel(e, path))
    }
}

fn read_all(file: &mut dyn FsFile) -> FsIoResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; content::CHUNK_PLAINTEXT_LEN + content::CHUNK_OVERHEAD];
    loop {
        let n = file.read(out.len() as u64, &mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

struct EncFile {
    fs: Arc<EncInner>,
    path: FsPath,
    base: Box<dyn FsFile>,
    buffer: WriteBuffer,
    writable: bool,
    created: bool,
}

impl EncFile {
    fn ensure_writable(&self) -> FsIoResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(FsIoError::ReadOnly {
                path: self.path.to_string(),
            })
        }
    }

    fn write_back(&mut self) -> FsIoResult<()> {
        let ciphertext = content::encrypt_file(self.buffer.content(), &self.fs.key)
            .map_err(|e| integrity(&self.path, &e))?;
        let mut written = 0;
        while written < ciphertext.len() {
            written += self
                .base
                .write(written as u64, &ciphertext[written..])
                .map_err(|e| relabel(e, &self.path))?;
        }
        self.base
            .truncate(ciphertext.len() as u64)
            .and_then(|()| self.base.flush())
            .map_err(|e| relabel(e, &self.path))?;
        self.buffer.mark_clean();
        trace!(path = %self.path, bytes = ciphertext.len(), "Wrote back encrypted file");
        Ok(())
    }
}

impl FsFile for EncFile {
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
        let mut attrs = self
            .base
            .get_attrs()
            .map_err(|e| relabel(e, &self.path))?;
        attrs.size = self.buffer.len();
        Ok(attrs)
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> FsIoResult<usize> {
        Ok(self.buffer.read(offset, buf))
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> FsIoResult<usize> {
        self.ensure_writable()?;
        self.buffer
            .write(offset, buf)
            .map_err(|code| FsIoError::fs(code, self.path.as_str()))
    }

    fn truncate(&mut self, size: u64) -> FsIoResult<()> {
        self.ensure_writable()?;
        self.buffer
            .truncate(size)
            .map_err(|code| FsIoError::fs(code, self.path.as_str()))
    }

    fn flush(&mut self) -> FsIoResult<()> {
        if self.buffer.is_dirty() {
            self.write_back()?;
        }
        Ok(())
    }
}

impl Drop for EncFile {
    fn drop(&mut self) {
        if self.buffer.is_dirty()
            && let Err(e) = self.write_back()
        {
            warn!(path = %self.path, error = %e, "Failed to write back file on close");
        }
    }
}

struct EncDirectory {
    fs: Arc<EncInner>,
    path: FsPath,
    base: Box<dyn FsDirectory>,
}

impl FsDirectory for EncDirectory {
    fn read_entry(&mut self) -> FsIoResult<Option<DirEntry>> {
        loop {
            let Some(entry) = self
                .base
                .read_entry()
                .map_err(|e| relabel(e, &self.path))?
            else {
                return Ok(None);
            };
            match names::decrypt_name(&entry.name, &self.fs.key) {
                Ok(name) => {
                    return Ok(Some(DirEntry {
                        name,
                        attrs: entry.attrs.map(EncInner::cleartext_attrs),
                    }));
                }
                Err(e) => {
                    trace!(dir = %self.path, stored = %entry.name, error = %e, "Skipping entry");
                }
            }
        }
    }
}
