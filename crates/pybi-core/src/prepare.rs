//! Per-distribution cleanup applied to a freshly unpacked tree before probing.
//!
//! Upstream installers ship with pip preinstalled and, on some platforms,
//! with a layout the probe does not expect. These steps strip the tree down
//! to the bare interpreter.

use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;

/// Entry kept when emptying site-packages.
const SITE_PACKAGES_KEEP: &str = "README.txt";

/// Errors raised while preparing a tree.
#[derive(Error, Debug)]
pub enum PrepareError {
    /// A directory the flavor relies on was not found exactly once.
    #[error("Expected exactly one match for {pattern}, found {found}")]
    Layout {
        /// Glob that was searched.
        pattern: String,
        /// Number of matches.
        found: usize,
    },

    /// A path could not be turned into a glob pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrepareError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Layout { .. } | Self::Pattern(_) => ErrorKind::Validation,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Which upstream distribution a tree came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Relocatable framework build: pip, its scripts and the stdlib tests are removed.
    Macos,
    /// NuGet package: binaries are moved into the scripts directory and site-packages emptied.
    Windows,
    /// Source build already installed bare; nothing to do.
    #[default]
    Linux,
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Linux => "linux",
        })
    }
}

impl std::str::FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "macos" | "macosx" => Ok(Self::Macos),
            "windows" | "win" => Ok(Self::Windows),
            "linux" | "manylinux" => Ok(Self::Linux),
            other => Err(format!("unknown flavor '{other}' (expected macos, windows or linux)")),
        }
    }
}

/// Apply the cleanup for `flavor`. `scripts` is relative to `tree`.
///
/// # Errors
///
/// Returns an error if an expected directory is missing or a removal fails.
pub fn prepare(tree: &Path, scripts: &Path, flavor: Flavor) -> Result<(), PrepareError> {
    let scripts_dir = tree.join(scripts);
    match flavor {
        Flavor::Macos => {
            remove_pip_scripts(&scripts_dir)?;
            let prefix = scripts_dir.parent().unwrap_or(tree);
            let site_packages = find_site_packages(prefix)?;
            strip_site_packages(&site_packages)?;
            if let Some(stdlib) = site_packages.parent() {
                remove_stdlib_tests(stdlib)?;
            }
        }
        Flavor::Windows => {
            hoist_windows_binaries(tree, &scripts_dir)?;
            let site_packages = find_site_packages(tree)?;
            strip_site_packages(&site_packages)?;
        }
        Flavor::Linux => debug!("Nothing to prepare for {}", tree.display()),
    }
    Ok(())
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>, PrepareError> {
    Ok(glob(pattern)?.filter_map(Result::ok).collect())
}

/// Locate the single site-packages directory under an install prefix.
///
/// Both the POSIX (`lib/python3.X/site-packages`) and Windows
/// (`Lib/site-packages`) layouts are recognized.
///
/// # Errors
///
/// Returns [`PrepareError::Layout`] unless exactly one directory matches.
pub fn find_site_packages(prefix: &Path) -> Result<PathBuf, PrepareError> {
    let escaped = glob::Pattern::escape(&prefix.to_string_lossy());
    let posix = format!("{escaped}/lib/python*/site-packages");
    let windows = format!("{escaped}/Lib/site-packages");
    let mut found = glob_paths(&posix)?;
    found.extend(glob_paths(&windows)?);
    found.retain(|p| p.is_dir());
    found.sort();
    found.dedup();

    match <[PathBuf; 1]>::try_from(found) {
        Ok([dir]) => Ok(dir),
        Err(found) => Err(PrepareError::Layout {
            pattern: format!("{posix} | {windows}"),
            found: found.len(),
        }),
    }
}

/// Remove everything in `site_packages` except its README.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or an entry removed.
pub fn strip_site_packages(site_packages: &Path) -> Result<(), PrepareError> {
    for entry in std::fs::read_dir(site_packages)? {
        let path = entry?.path();
        if path.file_name().is_some_and(|n| n == SITE_PACKAGES_KEEP) {
            continue;
        }
        info!("Removing {}", path.display());
        remove_entry(&path)?;
    }
    Ok(())
}

/// Delete `pip*` launchers from the scripts directory.
///
/// # Errors
///
/// Returns an error if a launcher cannot be removed.
pub fn remove_pip_scripts(scripts_dir: &Path) -> Result<(), PrepareError> {
    let pattern = format!("{}/pip*", glob::Pattern::escape(&scripts_dir.to_string_lossy()));
    for path in glob_paths(&pattern)? {
        info!("Removing {}", path.display());
        remove_entry(&path)?;
    }
    Ok(())
}

/// Delete the standard library's own `test` package.
///
/// # Errors
///
/// Returns an error if the package exists but cannot be removed.
pub fn remove_stdlib_tests(stdlib: &Path) -> Result<(), PrepareError> {
    let tests = stdlib.join("test");
    if tests.is_dir() {
        info!("Removing stdlib test package {}", tests.display());
        std::fs::remove_dir_all(&tests)?;
    } else {
        warn!("No stdlib test package at {}", tests.display());
    }
    Ok(())
}

/// Move top-level `.exe` and `.dll` files of `base` into `scripts_dir`.
///
/// # Errors
///
/// Returns an error if the scripts directory cannot be created or a file
/// cannot be moved.
pub fn hoist_windows_binaries(base: &Path, scripts_dir: &Path) -> Result<(), PrepareError> {
    std::fs::create_dir_all(scripts_dir)?;
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_binary = path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("exe") || ext.eq_ignore_ascii_case("dll")
        });
        if is_binary {
            let dest = scripts_dir.join(entry.file_name());
            debug!("Moving {} -> {}", path.display(), dest.display());
            std::fs::rename(&path, &dest)?;
        }
    }
    Ok(())
}
