//! Well-known locations under the pybi home directory.

use dirs::home_dir;
use std::path::PathBuf;

/// Returns the pybi home directory, or None if the user's home cannot be resolved.
pub fn try_pybi_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("PYBI_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".pybi"))
}

/// Config file path: ~/.pybi/config.toml
pub fn config_path() -> Option<PathBuf> {
    try_pybi_home().map(|h| h.join("config.toml"))
}

/// Cache path: ~/.pybi/cache
pub fn cache_path() -> Option<PathBuf> {
    try_pybi_home().map(|h| h.join("cache"))
}

/// Where the probe's helper library is installed when not configured: ~/.pybi/cache/packaging
pub fn packaging_cache_path() -> Option<PathBuf> {
    cache_path().map(|c| c.join("packaging"))
}
