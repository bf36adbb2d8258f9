//! Config-path helpers and first-run default config creation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::loader::CONFIG_FILE_NAME;
use crate::error::ConfigError;

/// Commented default config written on first run.
pub(super) const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/turnwise.toml");

/// Return the per-user config path (`~/.config/turnwise/turnwise.toml`).
pub fn default_global_config_path() -> Option<PathBuf> {
    config_root_dir().map(|dir| dir.join("turnwise").join(CONFIG_FILE_NAME))
}

/// Ensure the per-user config file exists.
///
/// Returns the path when one could be resolved on this platform.
pub fn ensure_default_global_config() -> Result<Option<PathBuf>, ConfigError> {
    let Some(path) = default_global_config_path() else {
        return Ok(None);
    };
    ensure_default_config_at_path(&path)?;
    Ok(Some(path))
}

pub(super) fn ensure_default_config_at_path(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // create_new keeps a concurrently created file intact.
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(DEFAULT_CONFIG_TEMPLATE.as_bytes())?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

/// Resolve the base config directory from env/home conventions.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}
