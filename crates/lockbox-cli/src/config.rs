//! Configuration file support for the lockbox CLI.
//!
//! Configuration is stored at `~/.config/lockbox/config.toml` (XDG standard)
//! or the platform equivalent. `LOCKBOX_CONFIG_DIR` overrides the directory.
//!
//! # Example configuration
//!
//! ```toml
//! [defaults]
//! port = 8080
//! verbosity = 1
//!
//! [folders.work]
//! path = "/home/user/work-encrypted"
//! port = 8181
//!
//! [folders.public]
//! path = "/srv/public"
//! plain = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Named folders (aliases)
    #[serde(default)]
    pub folders: BTreeMap<String, FolderConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Defaults {
    /// Default listening port
    pub port: Option<u16>,

    /// Default verbosity level (0-3)
    pub verbosity: Option<u8>,
}

/// Configuration for a named folder
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolderConfig {
    pub path: PathBuf,

    /// Port override for this folder
    pub port: Option<u16>,

    /// Serve without encryption
    #[serde(default)]
    pub plain: bool,
}

/// A command-line folder argument after alias lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolder {
    pub path: PathBuf,
    pub port: Option<u16>,
    pub plain: bool,
}

impl Config {
    /// Load configuration from the default path, or return empty config if not found.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve a folder argument, handling `@alias` syntax.
    pub fn resolve_folder(&self, path_or_alias: &str) -> Result<ResolvedFolder> {
        let Some(alias) = path_or_alias.strip_prefix('@') else {
            return Ok(ResolvedFolder {
                path: PathBuf::from(path_or_alias),
                port: None,
                plain: false,
            });
        };

        let folder = self.folders.get(alias).ok_or_else(|| {
            let available: Vec<String> = self.folders.keys().map(|a| format!("@{a}")).collect();
            let hint = if available.is_empty() {
                "No folder aliases are configured.".to_string()
            } else {
                format!("Available aliases: {}", available.join(", "))
            };
            anyhow::anyhow!(
                "Unknown folder alias '@{alias}'.\n{hint}\n\n\
                 Add to your config file:\n\n\
                 [folders.{alias}]\n\
                 path = \"/path/to/folder\""
            )
        })?;

        Ok(ResolvedFolder {
            path: folder.path.clone(),
            port: folder.port,
            plain: folder.plain,
        })
    }
}

/// Get the path to the configuration file.
pub fn config_path() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("LOCKBOX_CONFIG_DIR") {
        return Ok(PathBuf::from(dir).join("config.toml"));
    }

    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(base_dirs.config_dir().join("lockbox").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.folders.is_empty());
        assert!(config.defaults.port.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [defaults]
            port = 8080
            verbosity = 2

            [folders.work]
            path = "/home/user/work"
            port = 8181

            [folders.public]
            path = "/srv/public"
            plain = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.defaults.port, Some(8080));
        assert_eq!(config.defaults.verbosity, Some(2));

        let work = config.resolve_folder("@work").unwrap();
        assert_eq!(work.path, PathBuf::from("/home/user/work"));
        assert_eq!(work.port, Some(8181));
        assert!(!work.plain);

        let public = config.resolve_folder("@public").unwrap();
        assert!(public.plain);
        assert_eq!(public.port, None);
    }

    #[test]
    fn test_plain_path_passes_through() {
        let config = Config::default();
        let resolved = config.resolve_folder("/data/folder").unwrap();
        assert_eq!(resolved.path, PathBuf::from("/data/folder"));
        assert!(!resolved.plain);
    }

    #[test]
    fn test_unknown_alias_lists_available() {
        let config: Config = toml::from_str(
            r#"
            [folders.a]
            path = "/a"
            [folders.b]
            path = "/b"
            "#,
        )
        .unwrap();

        let msg = config.resolve_folder("@c").unwrap_err().to_string();
        assert!(msg.contains("Unknown folder alias '@c'"));
        assert!(msg.contains("@a, @b"));
        assert!(
            Config::default()
                .resolve_folder("@c")
                .unwrap_err()
                .to_string()
                .contains("No folder aliases")
        );
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.folders.is_empty());
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults\nport = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}
