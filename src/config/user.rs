//! User configuration loading for workbridge.
//!
//! User config location: $XDG_CONFIG_HOME/workbridge/workbridge.toml
//! Fallback: the platform config directory reported by `dirs`.

use std::path::{Path, PathBuf};

use super::ConfigError;

const APP_DIR: &str = "workbridge";
const CONFIG_FILE: &str = "workbridge.toml";

/// Returns the path to the user configuration file.
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return Some(PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE));
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load the user config file as a raw TOML table.
///
/// A missing file is not an error (zero-config experience).
pub fn load_user_config() -> Result<Option<toml::Table>, ConfigError> {
    match user_config_path() {
        Some(path) if path.exists() => read_toml_table(&path).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn read_toml_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
