//! Tool configuration.
//!
//! Values come from `$PYBI_HOME/config.toml` (all keys optional); the CLI
//! overrides individual fields from flags and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid {field} in {}: {reason}", path.display())]
    Invalid {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },
}

/// Effective settings for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory archives are written to.
    pub out_dir: PathBuf,
    /// Tree-relative directory vendored libraries are copied into.
    pub lib_sdir: String,
    /// `Generator` line of the `PYBI` descriptor.
    pub generator: String,
    /// SPDX identifier written to `METADATA`.
    pub license: String,
    /// Appended to the implementation name to mark unofficial builds.
    pub name_suffix: String,
    /// Host interpreter used to install the probe's helper library.
    pub host_python: String,
    /// Directory already containing the `packaging` library.
    pub packaging_dir: Option<PathBuf>,
    /// `patchelf` executable.
    pub patchelf: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("built"),
            lib_sdir: ".libs".to_string(),
            generator: crate::GENERATOR.to_string(),
            license: "Python-2.0".to_string(),
            name_suffix: "_unofficial".to_string(),
            host_python: "python3".to_string(),
            packaging_dir: None,
            patchelf: "patchelf".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Check values that parse but cannot be used.
    ///
    /// `lib_sdir` must stay inside the tree: relative, non-empty, no `..`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming `source` for the first bad field.
    pub fn validate(&self, source: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            path: source.to_path_buf(),
            field: "lib_sdir",
            reason,
        };
        if self.lib_sdir.is_empty() {
            return Err(invalid("must not be empty".to_string()));
        }
        for component in Path::new(&self.lib_sdir).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid(format!("{} leaves the tree", self.lib_sdir)));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid(format!("{} is not relative", self.lib_sdir)));
                }
            }
        }
        Ok(())
    }

    /// Load the config from `$PYBI_HOME/config.toml`, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        match crate::config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn partial_override() {
        let config = Config::parse("out_dir = \"/srv/pybi\"\nlib_sdir = \"_libs\"\n").unwrap();
        assert_eq!(config.out_dir, PathBuf::from("/srv/pybi"));
        assert_eq!(config.lib_sdir, "_libs");
        assert_eq!(config.license, "Python-2.0");
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Config::parse("colour = \"blue\"\n").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn lib_sdir_must_stay_inside_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        for value in ["/usr/lib", "../x", "libs/../../x", ""] {
            std::fs::write(&path, format!("lib_sdir = \"{value}\"\n")).unwrap();
            let err = Config::load(&path).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: "lib_sdir", .. }),
                "{value}: {err}"
            );
        }

        std::fs::write(&path, "lib_sdir = \"vendor/libs\"\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().lib_sdir, "vendor/libs");
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "out_dir = [").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
