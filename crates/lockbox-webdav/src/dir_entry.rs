//! WebDAV directory entries.

use dav_server::fs::{DavDirEntry, DavMetaData, FsFuture};

use crate::metadata::LockboxMetaData;

#[derive(Debug, Clone)]
pub struct LockboxDirEntry {
    name: String,
    meta: LockboxMetaData,
}

impl LockboxDirEntry {
    pub fn new(name: String, meta: LockboxMetaData) -> Self {
        Self { name, meta }
    }
}

impl DavDirEntry for LockboxDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn is_dir(&self) -> FsFuture<'_, bool> {
        let is_dir = self.meta.attrs().is_dir();
        Box::pin(async move { Ok(is_dir) })
    }

    fn is_file(&self) -> FsFuture<'_, bool> {
        let is_file = self.meta.attrs().is_file();
        Box::pin(async move { Ok(is_file) })
    }

    fn is_symlink(&self) -> FsFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_fs::{FileKind, FsAttrs};
    use std::time::UNIX_EPOCH;

    fn entry(name: &str, kind: FileKind) -> LockboxDirEntry {
        let attrs = FsAttrs {
            kind,
            size: 3,
            modified: UNIX_EPOCH,
            accessed: UNIX_EPOCH,
            created: None,
            file_id: 0,
        };
        LockboxDirEntry::new(name.to_string(), LockboxMetaData::new(attrs))
    }

    #[tokio::test]
    async fn test_file_entry() {
        let entry = entry("notes.txt", FileKind::File);
        assert_eq!(entry.name(), b"notes.txt");
        assert!(entry.is_file().await.unwrap());
        assert!(!entry.is_dir().await.unwrap());
        assert_eq!(entry.metadata().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dir_entry() {
        let entry = entry("sub", FileKind::Directory);
        assert!(entry.is_dir().await.unwrap());
        assert!(!entry.is_symlink().await.unwrap());
    }
}
