//! WebDAV metadata over backend attributes.

use std::time::SystemTime;

use dav_server::fs::{DavMetaData, FsError};
use lockbox_fs::FsAttrs;

#[derive(Debug, Clone)]
pub struct LockboxMetaData {
    attrs: FsAttrs,
}

impl LockboxMetaData {
    pub fn new(attrs: FsAttrs) -> Self {
        Self { attrs }
    }

    pub fn attrs(&self) -> &FsAttrs {
        &self.attrs
    }
}

impl DavMetaData for LockboxMetaData {
    fn len(&self) -> u64 {
        if self.attrs.is_dir() { 0 } else { self.attrs.size }
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.attrs.modified)
    }

    fn is_dir(&self) -> bool {
        self.attrs.is_dir()
    }

    fn is_file(&self) -> bool {
        self.attrs.is_file()
    }

    fn is_symlink(&self) -> bool {
        false
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.attrs.created.unwrap_or(self.attrs.modified))
    }

    fn accessed(&self) -> Result<SystemTime, FsError> {
        Ok(self.attrs.accessed)
    }

    // No separate ctime at this layer.
    fn status_changed(&self) -> Result<SystemTime, FsError> {
        self.modified()
    }

    fn executable(&self) -> Result<bool, FsError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_fs::FileKind;
    use std::time::{Duration, UNIX_EPOCH};

    fn attrs(kind: FileKind, size: u64) -> FsAttrs {
        FsAttrs {
            kind,
            size,
            modified: UNIX_EPOCH + Duration::from_secs(100),
            accessed: UNIX_EPOCH + Duration::from_secs(200),
            created: None,
            file_id: 0,
        }
    }

    #[test]
    fn test_file_metadata() {
        let meta = LockboxMetaData::new(attrs(FileKind::File, 1024));
        assert!(meta.is_file());
        assert!(!meta.is_dir());
        assert_eq!(meta.len(), 1024);
        assert_eq!(meta.created().unwrap(), meta.modified().unwrap());
        assert!(meta.etag().is_some());
    }

    #[test]
    fn test_directory_reports_zero_length() {
        let meta = LockboxMetaData::new(attrs(FileKind::Directory, 4096));
        assert!(meta.is_dir());
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.accessed().unwrap(), UNIX_EPOCH + Duration::from_secs(200));
    }
}
