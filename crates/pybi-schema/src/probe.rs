//! The `pybi.json` capability document produced by the metadata probe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FormatError;

/// Uppercase stand-in for the platform component of compatibility tags.
///
/// Installers substitute the archive's real platform tag for it.
pub const PLATFORM_PLACEHOLDER: &str = "PLATFORM";

/// Structured probe output: `{markers_env, tags, paths}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PybiJson {
    /// Environment markers, without installation-dependent keys.
    pub markers_env: BTreeMap<String, String>,
    /// Compatibility tags, most specific first, platform replaced by [`PLATFORM_PLACEHOLDER`].
    pub tags: Vec<String>,
    /// Install locations relative to the tree root (`scripts`, `purelib`, ...).
    pub paths: BTreeMap<String, String>,
}

impl PybiJson {
    /// Parse probe output.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if the bytes are not a valid document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// `implementation_name` marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker is absent.
    pub fn implementation_name(&self) -> Result<&str, FormatError> {
        self.marker("implementation_name")
    }

    /// `implementation_version` marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker is absent.
    pub fn implementation_version(&self) -> Result<&str, FormatError> {
        self.marker("implementation_version")
    }

    /// Relative path of the scripts directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `paths.scripts` is absent.
    pub fn scripts_dir(&self) -> Result<&str, FormatError> {
        self.paths
            .get("scripts")
            .map(String::as_str)
            .ok_or(FormatError::MissingField("paths.scripts"))
    }

    /// Tags with the placeholder replaced by a concrete platform tag.
    pub fn tags_for(&self, platform_tag: &str) -> Vec<String> {
        self.tags
            .iter()
            .map(|t| t.replace(PLATFORM_PLACEHOLDER, platform_tag))
            .collect()
    }

    fn marker(&self, key: &'static str) -> Result<&str, FormatError> {
        self.markers_env
            .get(key)
            .map(String::as_str)
            .ok_or(FormatError::MissingField(key))
    }
}
