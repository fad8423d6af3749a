pub mod config_path;
pub mod init;
pub mod serve;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Absolute, UTF-8 form of a host folder, as the native filesystem expects.
///
/// A missing folder is reported as an [`io::ErrorKind::NotFound`] error so the
/// exit code says "not found".
pub fn host_folder(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Folder does not exist: {}", path.display()),
        )
        .into());
    }
    if !path.is_dir() {
        anyhow::bail!("Folder is not a directory: {}", path.display());
    }
    let canonical = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve folder: {}", path.display()))?;
    canonical
        .into_os_string()
        .into_string()
        .map_err(|p| anyhow::anyhow!("Folder path is not valid UTF-8: {}", p.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_folder_is_absolute() {
        let dir = tempfile::TempDir::new().unwrap();
        let folder = host_folder(dir.path()).unwrap();
        assert!(Path::new(&folder).is_absolute());
    }

    #[test]
    fn test_host_folder_rejects_files_and_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();

        assert!(host_folder(&file).unwrap_err().to_string().contains("not a directory"));
        assert!(
            host_folder(&dir.path().join("nope"))
                .unwrap_err()
                .to_string()
                .contains("does not exist")
        );
    }

    #[test]
    fn test_missing_folder_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = host_folder(&dir.path().join("gone")).unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }
}
