//! Installer-side operations: extracting an archive and checking it against
//! its RECORD.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

use pybi_schema::{EntryHash, FormatError, INFO_DIR_SUFFIX, RECORD_FILE, Record, RecordRow};

use crate::error::{ErrorKind, ValidationError};
use crate::fsutil::is_within;

const FILE_TYPE_MASK: u32 = 0o170_000;
const SYMLINK_TYPE: u32 = 0o120_000;

/// Errors reading or extracting an archive.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// A member would be written outside the destination.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No `<name>.pybi-info/RECORD` member.
    #[error("Archive has no RECORD")]
    MissingRecord,

    /// RECORD could not be parsed.
    #[error("Invalid RECORD: {0}")]
    Format(#[from] FormatError),

    /// The zip container is damaged.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl UnpackError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::MissingRecord | Self::Format(_) => ErrorKind::Integrity,
            Self::Zip(_) | Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// A disagreement between an archive and its RECORD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// Member content does not hash to the recorded digest (or the recorded
    /// symlink target differs).
    HashMismatch {
        /// Member name.
        path: String,
        /// Hash spec in RECORD.
        expected: String,
        /// Hash spec of the member.
        actual: String,
    },
    /// Member length differs from the recorded size.
    SizeMismatch {
        /// Member name.
        path: String,
        /// Recorded size.
        expected: Option<u64>,
        /// Actual size.
        actual: Option<u64>,
    },
    /// Member without a RECORD row.
    Unrecorded(String),
    /// RECORD row without a member.
    MissingMember(String),
    /// Path listed in more than one RECORD row.
    DuplicateRow(String),
    /// RECORD does not list itself with empty hash and size columns.
    BadOwnRow(String),
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashMismatch {
                path,
                expected,
                actual,
            } => write!(f, "{path}: hash mismatch (expected {expected}, got {actual})"),
            Self::SizeMismatch {
                path,
                expected,
                actual,
            } => write!(f, "{path}: size mismatch (expected {expected:?}, got {actual:?})"),
            Self::Unrecorded(path) => write!(f, "{path}: not listed in RECORD"),
            Self::MissingMember(path) => write!(f, "{path}: listed in RECORD but missing"),
            Self::DuplicateRow(path) => write!(f, "{path}: listed more than once in RECORD"),
            Self::BadOwnRow(path) => {
                write!(f, "{path}: must list itself with empty hash and size")
            }
        }
    }
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Members compared against RECORD.
    pub checked: usize,
    /// Everything that did not match.
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    /// True when every member matched its row.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

fn is_symlink_mode(mode: Option<u32>) -> bool {
    mode.is_some_and(|mode| mode & FILE_TYPE_MASK == SYMLINK_TYPE)
}

fn is_record_name(name: &str) -> bool {
    match name.split_once('/') {
        Some((dir, file)) => file == RECORD_FILE && dir.ends_with(&format!(".{INFO_DIR_SUFFIX}")),
        None => false,
    }
}

/// Extract `archive` into `dest`, restoring modes and symlinks.
///
/// Returns the number of members written.
///
/// # Errors
///
/// Returns [`ValidationError::UnsafeMember`] for member names or symlink
/// targets that escape `dest`, and IO or zip errors otherwise.
pub fn unpack(archive: &Path, dest: &Path) -> Result<usize, UnpackError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    fs::create_dir_all(dest)?;
    let dest = dest.canonicalize()?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(ValidationError::UnsafeMember(file.name().to_string()).into());
        };
        let target_path = dest.join(&relative_path);

        if file.is_dir() {
            fs::create_dir_all(&target_path)?;
            continue;
        }
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if is_symlink_mode(file.unix_mode()) {
            let mut link = String::new();
            file.read_to_string(&mut link)?;
            let parent = target_path.parent().unwrap_or(dest.as_path());
            if Path::new(&link).is_absolute() || !is_within(&dest, &parent.join(&link)) {
                return Err(ValidationError::UnsafeMember(format!("{} -> {link}", file.name())).into());
            }
            create_symlink(&link, &target_path)?;
        } else {
            let mut outfile = File::create(&target_path)?;
            io::copy(&mut file, &mut outfile)?;
            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target_path, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
        written += 1;
    }

    debug!("Unpacked {written} members into {}", dest.display());
    Ok(written)
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    warn!("Symlinks unsupported here; writing {} as a plain file", link.display());
    fs::write(link, target)
}

/// Recompute every member's digest and compare against RECORD.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or has no parseable
/// RECORD. Content mismatches are reported in the [`VerifyReport`].
pub fn verify(archive: &Path) -> Result<VerifyReport, UnpackError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    let record_name = zip
        .file_names()
        .find(|name| is_record_name(name))
        .map(str::to_string)
        .ok_or(UnpackError::MissingRecord)?;
    let record = {
        let mut text = String::new();
        zip.by_name(&record_name)?.read_to_string(&mut text)?;
        Record::parse(&text)?
    };

    let mut report = VerifyReport::default();
    let mut listed = HashSet::new();
    for row in record.rows() {
        if !listed.insert(row.path.as_str()) {
            report.problems.push(Problem::DuplicateRow(row.path.clone()));
        }
    }
    if !record
        .get(&record_name)
        .is_some_and(|row| row.hash == EntryHash::None && row.size.is_none())
    {
        report.problems.push(Problem::BadOwnRow(record_name.clone()));
    }

    let mut seen = HashSet::new();

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if name == record_name {
            seen.insert(name);
            continue;
        }

        let actual = if is_symlink_mode(file.unix_mode()) {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            RecordRow::symlink(&name, target)
        } else {
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            RecordRow::file(&name, &data)
        };
        report.checked += 1;

        let Some(expected) = record.get(&name) else {
            report.problems.push(Problem::Unrecorded(name));
            continue;
        };
        if expected.hash != actual.hash {
            report.problems.push(Problem::HashMismatch {
                path: name.clone(),
                expected: expected.hash.to_string(),
                actual: actual.hash.to_string(),
            });
        } else if expected.size != actual.size && !matches!(expected.hash, EntryHash::Symlink(_)) {
            report.problems.push(Problem::SizeMismatch {
                path: name.clone(),
                expected: expected.size,
                actual: actual.size,
            });
        }
        seen.insert(name);
    }

    for row in record.rows() {
        if row.path != record_name && !seen.contains(&row.path) {
            report.problems.push(Problem::MissingMember(row.path.clone()));
            seen.insert(row.path.clone());
        }
    }

    if !report.is_ok() {
        warn!("{} problems in {}", report.problems.len(), archive.display());
    }
    Ok(report)
}
