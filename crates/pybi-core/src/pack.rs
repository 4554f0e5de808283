//! Archive packer.
//!
//! The tree is walked and validated in full before the archive is opened,
//! so an unsafe symlink or a bad metadata directory never leaves a partial
//! archive behind. Members are then written in sorted order: payload first,
//! RECORD next, and the remaining `.pybi-info` documents last so a reader can
//! find metadata near the end of the file.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use pybi_schema::{
    FormatError, INFO_DIR_SUFFIX, PYBI_JSON_FILE, PybiJson, RECORD_FILE, Record, RecordRow,
};

use crate::error::{ErrorKind, ValidationError};
use crate::fsutil::{is_owner_executable, is_within, member_name, normalize, relative_path};

/// Errors raised while packing a tree.
#[derive(Error, Debug)]
pub enum PackError {
    /// The tree violates a packing invariant.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A member's content could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Integrity {
        /// Source file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// `pybi.json` is missing or unusable.
    #[error("Invalid {}: {reason}", path.display())]
    InvalidMetadata {
        /// The document.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A path that cannot be expressed as a UTF-8 member name.
    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// The zip writer failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem failure outside member reads.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidMetadata { .. } | Self::NonUtf8Path(_) => {
                ErrorKind::Validation
            }
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Zip(_) | Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// A finished archive.
#[derive(Debug, Clone)]
pub struct PackedArchive {
    /// Where it was written.
    pub path: PathBuf,
    /// The manifest stored in it.
    pub record: Record,
}

#[derive(Debug)]
enum EntryKind {
    File { source: PathBuf, executable: bool },
    Symlink { target: String },
}

#[derive(Debug)]
struct PlannedEntry {
    name: String,
    kind: EntryKind,
    in_info_dir: bool,
}

/// Header that re-executes the script with an interpreter found relative to it.
///
/// The first line is a shell shebang; the second is a shell `exec` that
/// Python parses as a string literal, so the same file runs either way.
fn relative_shebang(interpreter: &Path, args: &str) -> String {
    let interpreter = interpreter.to_string_lossy();
    let args = if args.is_empty() {
        String::new()
    } else {
        format!(" {args}")
    };
    format!(
        "#!/bin/sh\n'''exec' \"$(dirname \"$0\")/{interpreter}\"{args} \"$0\" \"$@\"\n' '''\n# The above is magic to invoke an interpreter relative to this script\n"
    )
}

/// Rewrite an in-tree `#!` line to a relocatable header.
///
/// Files without a shebang, or whose interpreter lives outside `root`
/// (`#!/bin/sh`, say), are returned unchanged.
pub fn fixup_shebang(root: &Path, script: &Path, data: Vec<u8>) -> Vec<u8> {
    if !data.starts_with(b"#!") {
        return data;
    }
    let split = data.iter().position(|&b| b == b'\n').map_or(data.len(), |i| i + 1);
    let Ok(line) = std::str::from_utf8(&data[2..split]) else {
        return data;
    };
    let line = line.trim();
    let (interpreter, args) = match line.split_once(char::is_whitespace) {
        Some((interpreter, args)) => (interpreter, args.trim()),
        None => (line, ""),
    };
    if interpreter.is_empty() {
        return data;
    }

    let Some(script_dir) = script.parent() else {
        return data;
    };
    let Some(resolved) = resolve_in_tree(root, &script_dir.join(interpreter)) else {
        return data;
    };

    let rel = relative_path(script_dir, &resolved);
    debug!("Rewriting shebang of {} -> {}", script.display(), rel.display());
    let mut out = relative_shebang(&rel, args).into_bytes();
    out.extend_from_slice(&data[split..]);
    out
}

/// Lexically normalize `candidate` and return it if it lies under `root`.
///
/// The parent directory is canonicalized when the lexical form is outside,
/// which catches shebangs written through a symlinked prefix of the root.
fn resolve_in_tree(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let normalized = normalize(candidate);
    if is_within(root, &normalized) {
        return Some(normalized);
    }
    let parent = normalized.parent()?.canonicalize().ok()?;
    let resolved = parent.join(normalized.file_name()?);
    is_within(root, &resolved).then_some(resolved)
}

/// Find the single `*.pybi-info` directory at the tree root.
///
/// # Errors
///
/// Returns [`ValidationError::MetadataDirCount`] unless exactly one exists.
pub fn find_info_dir(root: &Path) -> Result<PathBuf, PackError> {
    let suffix = format!(".{INFO_DIR_SUFFIX}");
    let mut found = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.file_name().to_string_lossy().ends_with(&suffix) {
            found.push(entry.path());
        }
    }
    match <[PathBuf; 1]>::try_from(found) {
        Ok([dir]) => Ok(dir),
        Err(found) => Err(ValidationError::MetadataDirCount {
            root: root.to_path_buf(),
            found: found.len(),
        }
        .into()),
    }
}

fn read_scripts_dir(info_dir: &Path) -> Result<String, PackError> {
    let path = info_dir.join(PYBI_JSON_FILE);
    let invalid = |reason: String| PackError::InvalidMetadata {
        path: path.clone(),
        reason,
    };
    let bytes = std::fs::read(&path).map_err(|e| invalid(e.to_string()))?;
    let json = PybiJson::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
    json.scripts_dir()
        .map(str::to_string)
        .map_err(|e: FormatError| invalid(e.to_string()))
}

fn plan(root: &Path, info_dir: &Path) -> Result<Vec<PlannedEntry>, PackError> {
    let record_path = info_dir.join(RECORD_FILE);
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| PackError::Io(e.into()))?;
        let path = entry.path();
        let file_type = entry.file_type();

        if path == record_path {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "pyc") {
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path);
        let in_info_dir = path.starts_with(info_dir);

        let kind = if file_type.is_symlink() {
            if in_info_dir {
                return Err(ValidationError::SymlinkInMetadataDir(path.to_path_buf()).into());
            }
            let target = std::fs::read_link(path)?;
            if target.is_absolute() {
                return Err(ValidationError::AbsoluteSymlink {
                    path: path.to_path_buf(),
                    target,
                }
                .into());
            }
            let parent = path.parent().unwrap_or(root);
            if !is_within(root, &parent.join(&target)) {
                return Err(ValidationError::SymlinkEscapesTree {
                    path: path.to_path_buf(),
                    target,
                }
                .into());
            }
            let target = target
                .to_str()
                .ok_or_else(|| PackError::NonUtf8Path(target.clone()))?
                .to_string();
            EntryKind::Symlink { target }
        } else if file_type.is_file() {
            let executable = is_owner_executable(&entry.metadata().map_err(|e| PackError::Io(e.into()))?);
            EntryKind::File {
                source: path.to_path_buf(),
                executable,
            }
        } else {
            continue;
        };

        let name = member_name(rel).ok_or_else(|| PackError::NonUtf8Path(rel.to_path_buf()))?;
        entries.push(PlannedEntry {
            name,
            kind,
            in_info_dir,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Pack `tree` into a new archive at `archive_path`.
///
/// The tree must already contain its `.pybi-info` directory with a
/// `pybi.json`. The archive is assembled in a temporary file next to
/// `archive_path` and only moved into place once complete; an existing file
/// at `archive_path` is never replaced.
///
/// # Errors
///
/// Returns [`PackError::Validation`] for unsafe symlinks or a missing or
/// duplicated metadata directory, [`PackError::Integrity`] when a file cannot
/// be read, and IO or zip errors otherwise.
pub fn pack(tree: &Path, archive_path: &Path) -> Result<PackedArchive, PackError> {
    let root = tree.canonicalize()?;
    let info_dir = find_info_dir(&root)?;
    let info_name = member_name(info_dir.strip_prefix(&root).unwrap_or(info_dir.as_path()))
        .ok_or_else(|| PackError::NonUtf8Path(info_dir.clone()))?;
    let scripts_dir = normalize(&root.join(read_scripts_dir(&info_dir)?));

    let entries = plan(&root, &info_dir)?;
    debug!("Packing {} entries from {}", entries.len(), root.display());

    let out_dir = match archive_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(out_dir)?;
    let mut tmp = NamedTempFile::new_in(out_dir)?;

    let record_name = format!("{info_name}/{RECORD_FILE}");
    let mut record = Record::new();
    record.push(RecordRow::own(&record_name));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let mut deferred = Vec::new();

        for entry in &entries {
            match &entry.kind {
                EntryKind::Symlink { target } => {
                    record.push(RecordRow::symlink(&entry.name, target));
                    zip.add_symlink(entry.name.as_str(), target.as_str(), options.unix_permissions(0o777))?;
                }
                EntryKind::File { source, executable } => {
                    let mut data = std::fs::read(source).map_err(|e| PackError::Integrity {
                        path: source.clone(),
                        source: e,
                    })?;
                    if source.starts_with(&scripts_dir) {
                        data = fixup_shebang(&root, source, data);
                    }
                    record.push(RecordRow::file(&entry.name, &data));

                    let mode = if *executable { 0o755 } else { 0o644 };
                    let member_options = options
                        .unix_permissions(mode)
                        .large_file(data.len() as u64 >= u64::from(u32::MAX));
                    if entry.in_info_dir {
                        deferred.push((entry.name.as_str(), member_options, data));
                    } else {
                        zip.start_file(entry.name.as_str(), member_options)?;
                        zip.write_all(&data)?;
                    }
                }
            }
        }

        zip.start_file(record_name.as_str(), options.unix_permissions(0o644))?;
        zip.write_all(record.to_csv().as_bytes())?;

        for (name, member_options, data) in deferred {
            zip.start_file(name, member_options)?;
            zip.write_all(&data)?;
        }
        zip.finish()?;
    }

    tmp.persist_noclobber(archive_path).map_err(|e| e.error)?;
    info!(
        "Packed {} members into {}",
        record.len(),
        archive_path.display()
    );
    Ok(PackedArchive {
        path: archive_path.to_path_buf(),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pybi_schema::EntryHash;
    use std::io::Read;

    const INFO: &str = "cpython_unofficial-3.9.6.pybi-info";

    fn write(path: &Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[cfg(unix)]
    fn chmod(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn sample_tree(root: &Path) {
        write(&root.join("bin/python3"), b"\x7fELF fake interpreter");
        write(&root.join("lib/python3.9/os.py"), b"import sys\n");
        write(&root.join("lib/python3.9/__pycache__/os.cpython-39.pyc"), b"junk");
        write(&root.join(INFO).join("PYBI"), b"Pybi-Version: 1.0\n");
        write(&root.join(INFO).join("METADATA"), b"Metadata-Version: 2.2\n");
        write(
            &root.join(INFO).join("pybi.json"),
            br#"{"markers_env":{},"tags":[],"paths":{"scripts":"bin"}}"#,
        );
        #[cfg(unix)]
        chmod(&root.join("bin/python3"), 0o755);
    }

    fn member_names(archive: &Path) -> Vec<String> {
        let file = std::fs::File::open(archive).unwrap();
        let zip = zip::ZipArchive::new(file).unwrap();
        zip.file_names().map(str::to_string).collect::<Vec<_>>()
    }

    fn ordered_member_names(archive: &Path) -> Vec<String> {
        let file = std::fs::File::open(archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn read_member(archive: &Path, name: &str) -> Vec<u8> {
        let file = std::fs::File::open(archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut member = zip.by_name(name).unwrap();
        let mut data = Vec::new();
        member.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn metadata_members_come_last() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_tree(tree.path());
        let archive = out.path().join("x.pybi");

        pack(tree.path(), &archive).unwrap();

        let names = ordered_member_names(&archive);
        assert_eq!(
            names,
            vec![
                "bin/python3".to_string(),
                "lib/python3.9/os.py".to_string(),
                format!("{INFO}/RECORD"),
                format!("{INFO}/METADATA"),
                format!("{INFO}/PYBI"),
                format!("{INFO}/pybi.json"),
            ]
        );
    }

    #[test]
    fn record_covers_every_member() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_tree(tree.path());
        let archive = out.path().join("x.pybi");

        let packed = pack(tree.path(), &archive).unwrap();
        let rows = packed.record.rows();
        assert_eq!(rows[0].path, format!("{INFO}/RECORD"));
        assert_eq!(rows[0].hash, EntryHash::None);
        assert_eq!(rows.len(), member_names(&archive).len());

        let text = String::from_utf8(read_member(&archive, &format!("{INFO}/RECORD"))).unwrap();
        assert_eq!(Record::parse(&text).unwrap(), packed.record);

        let os_py = packed.record.get("lib/python3.9/os.py").unwrap();
        assert_eq!(os_py, &RecordRow::file("lib/python3.9/os.py", b"import sys\n"));
        assert!(packed.record.get("lib/python3.9/__pycache__/os.cpython-39.pyc").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn modes_follow_owner_exec_bit() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_tree(tree.path());
        chmod(&tree.path().join("lib/python3.9/os.py"), 0o600);
        let archive = out.path().join("x.pybi");
        pack(tree.path(), &archive).unwrap();

        let file = std::fs::File::open(&archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.by_name("bin/python3").unwrap().unix_mode().unwrap() & 0o777, 0o755);
        assert_eq!(zip.by_name("lib/python3.9/os.py").unwrap().unix_mode().unwrap() & 0o777, 0o644);
    }

    #[test]
    fn packing_is_deterministic() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_tree(tree.path());

        let first = pack(tree.path(), &out.path().join("a.pybi")).unwrap();
        let second = pack(tree.path(), &out.path().join("b.pybi")).unwrap();
        assert_eq!(first.record.to_csv(), second.record.to_csv());
        assert_eq!(
            std::fs::read(out.path().join("a.pybi")).unwrap(),
            std::fs::read(out.path().join("b.pybi")).unwrap()
        );
    }

    #[test]
    fn existing_archive_is_not_replaced() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_tree(tree.path());
        let archive = out.path().join("x.pybi");
        std::fs::write(&archive, b"keep me").unwrap();

        assert!(pack(tree.path(), &archive).is_err());
        assert_eq!(std::fs::read(&archive).unwrap(), b"keep me");
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[test]
    fn metadata_dir_must_be_unique() {
        let tree = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(&tree.path().join("bin/python3"), b"");
        let err = pack(tree.path(), &out.path().join("x.pybi")).unwrap_err();
        assert!(matches!(
            err,
            PackError::Validation(ValidationError::MetadataDirCount { found: 0, .. })
        ));

        sample_tree(tree.path());
        std::fs::create_dir(tree.path().join("other-1.0.pybi-info")).unwrap();
        let err = pack(tree.path(), &out.path().join("x.pybi")).unwrap_err();
        assert!(matches!(
            err,
            PackError::Validation(ValidationError::MetadataDirCount { found: 2, .. })
        ));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        #[test]
        fn relative_symlink_is_stored_as_link() {
            let tree = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            sample_tree(tree.path());
            symlink("python3", tree.path().join("bin/python")).unwrap();
            let archive = out.path().join("x.pybi");

            let packed = pack(tree.path(), &archive).unwrap();
            assert_eq!(
                packed.record.get("bin/python").unwrap().hash,
                EntryHash::Symlink("python3".to_string())
            );

            let file = std::fs::File::open(&archive).unwrap();
            let mut zip = zip::ZipArchive::new(file).unwrap();
            let mut member = zip.by_name("bin/python").unwrap();
            assert_eq!(member.unix_mode().unwrap() & 0o170_000, 0o120_000);
            let mut target = String::new();
            member.read_to_string(&mut target).unwrap();
            assert_eq!(target, "python3");
        }

        #[test]
        fn absolute_symlink_is_rejected() {
            let tree = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            sample_tree(tree.path());
            symlink("/usr/bin/python3", tree.path().join("bin/python")).unwrap();

            let err = pack(tree.path(), &out.path().join("x.pybi")).unwrap_err();
            assert!(matches!(
                err,
                PackError::Validation(ValidationError::AbsoluteSymlink { .. })
            ));
            assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        }

        #[test]
        fn escaping_symlink_is_rejected() {
            let tree = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            sample_tree(tree.path());
            symlink("../../etc/passwd", tree.path().join("bin/passwd")).unwrap();

            let err = pack(tree.path(), &out.path().join("x.pybi")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(matches!(
                err,
                PackError::Validation(ValidationError::SymlinkEscapesTree { .. })
            ));
            assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        }

        #[test]
        fn symlink_in_metadata_dir_is_rejected() {
            let tree = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            sample_tree(tree.path());
            symlink("PYBI", tree.path().join(INFO).join("ALIAS")).unwrap();

            let err = pack(tree.path(), &out.path().join("x.pybi")).unwrap_err();
            assert!(matches!(
                err,
                PackError::Validation(ValidationError::SymlinkInMetadataDir(_))
            ));
        }
    }

    mod shebang {
        use super::*;

        const HEADER_TAIL: &str =
            "\"$0\" \"$@\"\n' '''\n# The above is magic to invoke an interpreter relative to this script\n";

        #[test]
        fn in_tree_interpreter_becomes_relative() {
            let root = Path::new("/t");
            let out = fixup_shebang(
                root,
                Path::new("/t/bin/pip"),
                b"#!/t/bin/python3\nimport pip\n".to_vec(),
            );
            let expected = format!(
                "#!/bin/sh\n'''exec' \"$(dirname \"$0\")/python3\" {HEADER_TAIL}import pip\n"
            );
            assert_eq!(String::from_utf8(out).unwrap(), expected);
        }

        #[test]
        fn relative_reference_resolves_to_original() {
            let root = Path::new("/t");
            let out = fixup_shebang(
                root,
                Path::new("/t/Scripts/tools/idle"),
                b"#!/t/bin/python3.9\n".to_vec(),
            );
            let text = String::from_utf8(out).unwrap();
            let start = text.find("$(dirname \"$0\")/").unwrap() + "$(dirname \"$0\")/".len();
            let end = start + text[start..].find('"').unwrap();
            let rel = &text[start..end];
            assert_eq!(rel, "../../bin/python3.9");
            assert_eq!(
                normalize(&Path::new("/t/Scripts/tools").join(rel)),
                PathBuf::from("/t/bin/python3.9")
            );
        }

        #[test]
        fn interpreter_arguments_are_kept() {
            let out = fixup_shebang(
                Path::new("/t"),
                Path::new("/t/bin/tool"),
                b"#!/t/bin/python3 -E -s\nbody\n".to_vec(),
            );
            let text = String::from_utf8(out).unwrap();
            assert!(text.contains("\"$(dirname \"$0\")/python3\" -E -s \"$0\" \"$@\""), "{text}");
            assert!(text.ends_with("body\n"));
        }

        #[test]
        fn system_interpreter_is_untouched() {
            let data = b"#!/bin/sh\necho hi\n".to_vec();
            let out = fixup_shebang(Path::new("/t"), Path::new("/t/bin/x"), data.clone());
            assert_eq!(out, data);
        }

        #[test]
        fn non_script_is_untouched() {
            let data = b"\x7fELF\x02\x01".to_vec();
            let out = fixup_shebang(Path::new("/t"), Path::new("/t/bin/x"), data.clone());
            assert_eq!(out, data);
        }

        #[test]
        fn scripts_are_rewritten_when_packed() {
            let tree = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            sample_tree(tree.path());
            let shebang = format!("#!{}/bin/python3\nimport pip\n", tree.path().display());
            write(&tree.path().join("bin/pip"), shebang.as_bytes());
            write(&tree.path().join("lib/tool.py"), shebang.as_bytes());
            let archive = out.path().join("x.pybi");

            let packed = pack(tree.path(), &archive).unwrap();
            let pip = read_member(&archive, "bin/pip");
            assert!(pip.starts_with(b"#!/bin/sh\n'''exec' \"$(dirname \"$0\")/python3\""));
            assert_eq!(packed.record.get("bin/pip").unwrap(), &RecordRow::file("bin/pip", &pip));
            // Only the scripts directory is rewritten.
            assert_eq!(read_member(&archive, "lib/tool.py"), shebang.as_bytes());
        }
    }
}
