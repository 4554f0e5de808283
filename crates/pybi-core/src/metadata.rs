//! Materializes the `.pybi-info` directory and picks the output filename.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use pybi_schema::{
    ArchiveName, FormatError, METADATA_FILE, PYBI_FILE, PYBI_JSON_FILE, PackageMetadata,
    PybiDescriptor, PybiJson,
};

use crate::config::Config;
use crate::error::ErrorKind;
use crate::probe::ProbeResult;

/// Errors writing metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The probe document lacks a required marker.
    #[error("Invalid probe output: {0}")]
    Format(#[from] FormatError),

    /// The metadata directory or one of its documents could not be written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Validation,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Where the metadata went and what the archive will be called.
#[derive(Debug, Clone)]
pub struct PreparedMetadata {
    /// Chosen archive name, including build number.
    pub archive_name: ArchiveName,
    /// `<out_dir>/<archive_name>`.
    pub archive_path: PathBuf,
    /// `<tree>/<name>-<version>.pybi-info`.
    pub info_dir: PathBuf,
}

/// Distribution name and version for a probed interpreter.
///
/// The name is the implementation name with `suffix` appended.
///
/// # Errors
///
/// Returns an error if the implementation markers are missing.
pub fn distribution_name(json: &PybiJson, suffix: &str) -> Result<(String, String), FormatError> {
    let name = format!("{}{suffix}", json.implementation_name()?);
    let version = json.implementation_version()?.to_string();
    Ok((name, version))
}

/// First archive name under `out_dir` that does not already exist.
///
/// Build `0` is tried first and the number only increases on collision, so
/// an existing archive is never overwritten.
pub fn next_archive_name(out_dir: &Path, name: &str, version: &str, platform_tag: &str) -> ArchiveName {
    let base = ArchiveName::new(name, version, platform_tag);
    let mut build = 0;
    loop {
        let candidate = base.clone().with_build(build);
        if !out_dir.join(candidate.to_string()).exists() {
            if build > 0 {
                debug!("Using build number {build} for {candidate}");
            }
            return candidate;
        }
        build += 1;
    }
}

/// Write `PYBI`, `METADATA` and `pybi.json` into the tree's metadata directory.
///
/// `pybi.json` receives the probe's stdout byte for byte.
///
/// # Errors
///
/// Returns an error if the probe output lacks implementation markers or the
/// files cannot be written.
pub fn write_metadata(
    tree: &Path,
    out_dir: &Path,
    probe: &ProbeResult,
    platform_tag: &str,
    config: &Config,
) -> Result<PreparedMetadata, MetadataError> {
    let (name, version) = distribution_name(&probe.json, &config.name_suffix)?;
    let archive_name = next_archive_name(out_dir, &name, &version, platform_tag);

    let info_dir = tree.join(archive_name.info_dir());
    std::fs::create_dir_all(&info_dir)?;

    let descriptor = PybiDescriptor::new(&config.generator, platform_tag, archive_name.build);
    std::fs::write(info_dir.join(PYBI_FILE), descriptor.to_text())?;

    let metadata = PackageMetadata::new(&name, &version, &config.license);
    std::fs::write(info_dir.join(METADATA_FILE), metadata.to_text())?;

    std::fs::write(info_dir.join(PYBI_JSON_FILE), &probe.raw)?;

    info!("Wrote metadata to {}", info_dir.display());
    Ok(PreparedMetadata {
        archive_path: out_dir.join(archive_name.to_string()),
        archive_name,
        info_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_result() -> ProbeResult {
        let raw = br#"{"markers_env":{"implementation_name":"cpython","implementation_version":"3.9.6"},"tags":["py3-none-any"],"paths":{"scripts":"bin"}}"#.to_vec();
        ProbeResult {
            json: PybiJson::from_slice(&raw).unwrap(),
            raw,
        }
    }

    #[test]
    fn build_numbers_skip_existing_archives() {
        let out = tempfile::tempdir().unwrap();
        let first = next_archive_name(out.path(), "name", "1.0.0", "tag");
        assert_eq!(first.to_string(), "name-1.0.0-tag.pybi");

        std::fs::write(out.path().join("name-1.0.0-tag.pybi"), b"").unwrap();
        let second = next_archive_name(out.path(), "name", "1.0.0", "tag");
        assert_eq!(second.to_string(), "name-1.0.0-1-tag.pybi");

        std::fs::write(out.path().join("name-1.0.0-1-tag.pybi"), b"").unwrap();
        let third = next_archive_name(out.path(), "name", "1.0.0", "tag");
        assert_eq!(third.to_string(), "name-1.0.0-2-tag.pybi");
    }

    #[test]
    fn writes_all_three_documents() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = Config::default();

        let prepared =
            write_metadata(tree.path(), out.path(), &probe_result(), "manylinux_2_17_x86_64", &config)
                .unwrap();

        assert_eq!(
            prepared.info_dir,
            tree.path().join("cpython_unofficial-3.9.6.pybi-info")
        );
        assert_eq!(
            prepared.archive_path,
            out.path().join("cpython_unofficial-3.9.6-manylinux_2_17_x86_64.pybi")
        );

        let pybi = std::fs::read_to_string(prepared.info_dir.join("PYBI")).unwrap();
        let descriptor = PybiDescriptor::parse(&pybi).unwrap();
        assert_eq!(descriptor.tag, "manylinux_2_17_x86_64");
        assert_eq!(descriptor.build, 0);
        assert!(!pybi.contains("Build:"));

        let metadata = std::fs::read_to_string(prepared.info_dir.join("METADATA")).unwrap();
        assert_eq!(
            metadata,
            "Metadata-Version: 2.2\nName: cpython_unofficial\nVersion: 3.9.6\nLicense: Python-2.0\n"
        );

        let json = std::fs::read(prepared.info_dir.join("pybi.json")).unwrap();
        assert_eq!(json, probe_result().raw);
    }

    #[test]
    fn build_line_present_when_renumbered() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("cpython_unofficial-3.9.6-t.pybi"), b"").unwrap();

        let prepared =
            write_metadata(tree.path(), out.path(), &probe_result(), "t", &Config::default()).unwrap();
        assert_eq!(prepared.archive_name.build, 1);
        let pybi = std::fs::read_to_string(prepared.info_dir.join("PYBI")).unwrap();
        assert!(pybi.ends_with("Build: 1\n"));
    }

    #[test]
    fn missing_markers_is_format_error() {
        let raw = br#"{"markers_env":{},"tags":[],"paths":{}}"#.to_vec();
        let probe = ProbeResult {
            json: PybiJson::from_slice(&raw).unwrap(),
            raw,
        };
        let tree = tempfile::tempdir().unwrap();
        let err = write_metadata(tree.path(), tree.path(), &probe, "t", &Config::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
