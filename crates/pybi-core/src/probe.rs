//! Metadata probe.
//!
//! Runs the target interpreter with a short script on stdin and parses the
//! `{markers_env, tags, paths}` document it prints. The script depends on
//! the `packaging` library, which is installed once into a cache directory
//! with the host interpreter's pip and handed to the target through
//! `PYBI_PACKAGING_PATH`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

use pybi_schema::PybiJson;

use crate::config::Config;
use crate::error::{ErrorKind, ToolInvocationError, ValidationError};
use crate::fsutil::normalize;

/// Environment variable carrying the helper library location to the probe script.
pub const PACKAGING_PATH_ENV: &str = "PYBI_PACKAGING_PATH";

/// Script fed to the target interpreter on stdin.
pub const PROBE_SCRIPT: &str = r#"
import json
import os
import os.path
import sys
import sysconfig

packaging_path = os.environ.get("PYBI_PACKAGING_PATH")
if packaging_path:
    sys.path.insert(0, packaging_path)

import packaging.markers
import packaging.tags

markers_env = packaging.markers.default_environment()
del markers_env["platform_release"]
del markers_env["platform_version"]

tags = []
if packaging.tags.interpreter_name() == "cp":
    tags += list(packaging.tags.cpython_tags(platforms=["xyzzy"]))
else:
    tags += list(packaging.tags.generic_tags(platforms=["xyzzy"]))
tags += list(packaging.tags.compatible_tags(platforms=["xyzzy"]))

# packaging lowercases platforms, so generate with a sentinel and swap it
# for the uppercase placeholder afterwards.
str_tags = [str(t).replace("xyzzy", "PLATFORM") for t in tags]

(base_path,) = sysconfig.get_config_vars("installed_base")
paths = {key: os.path.relpath(path, base_path) for (key, path) in sysconfig.get_paths().items()}

json.dump({"markers_env": markers_env, "tags": str_tags, "paths": paths}, sys.stdout)
"#;

/// Errors raised while preparing or running the probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The tree lacks an interpreter or reports an unexpected layout.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// pip or the target interpreter failed.
    #[error(transparent)]
    Tool(#[from] ToolInvocationError),

    /// Filesystem failure while aliasing the interpreter or creating the cache.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Tool(_) => ErrorKind::ToolInvocation,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Probe output: the parsed document and the exact bytes printed.
///
/// The raw bytes are what gets written to `pybi.json`.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Parsed document.
    pub json: PybiJson,
    /// Interpreter stdout, verbatim.
    pub raw: Vec<u8>,
}

/// Capability to extract metadata from an interpreter.
pub trait MetadataProbe {
    /// Run `interpreter` and return its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ToolInvocationError`] if the interpreter cannot be run,
    /// exits non-zero or prints something that is not a probe document.
    fn probe(&self, interpreter: &Path) -> Result<ProbeResult, ToolInvocationError>;
}

/// Probe backed by running the interpreter as a subprocess.
#[derive(Debug, Clone)]
pub struct InterpreterProbe {
    packaging_dir: PathBuf,
}

impl InterpreterProbe {
    /// Probe using a directory that already contains the `packaging` library.
    pub fn new(packaging_dir: impl Into<PathBuf>) -> Self {
        Self {
            packaging_dir: packaging_dir.into(),
        }
    }

    /// Probe using the configured helper directory, installing `packaging`
    /// into the cache with the host interpreter if nothing is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be created or pip fails.
    pub fn from_config(config: &Config) -> Result<Self, ProbeError> {
        if let Some(dir) = &config.packaging_dir {
            return Ok(Self::new(dir));
        }
        let cache = crate::packaging_cache_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot determine home directory (set PYBI_HOME)",
            )
        })?;
        ensure_packaging(&config.host_python, &cache)?;
        Ok(Self::new(cache))
    }

    /// Directory handed to the probe script.
    pub fn packaging_dir(&self) -> &Path {
        &self.packaging_dir
    }
}

impl MetadataProbe for InterpreterProbe {
    fn probe(&self, interpreter: &Path) -> Result<ProbeResult, ToolInvocationError> {
        let tool = interpreter.display().to_string();
        debug!("Probing {tool}");

        let mut child = Command::new(interpreter)
            .env(PACKAGING_PATH_ENV, &self.packaging_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolInvocationError::spawn(&tool, &e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // An interpreter that dies early closes the pipe; its exit status says why.
            match stdin.write_all(PROBE_SCRIPT.as_bytes()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(ToolInvocationError::new(
                        &tool,
                        format!("failed to write probe script: {e}"),
                    ));
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ToolInvocationError::new(&tool, format!("failed to wait: {e}")))?;
        if !output.status.success() {
            return Err(ToolInvocationError::from_output(&tool, &output));
        }

        let json = PybiJson::from_slice(&output.stdout)
            .map_err(|e| ToolInvocationError::new(&tool, format!("malformed probe output: {e}")))?;
        Ok(ProbeResult {
            json,
            raw: output.stdout,
        })
    }
}

/// Install `packaging` into `target` with `host_python -m pip` unless it is already there.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or pip fails.
pub fn ensure_packaging(host_python: &str, target: &Path) -> Result<(), ProbeError> {
    if target.join("packaging").is_dir() {
        debug!("packaging already cached at {}", target.display());
        return Ok(());
    }
    std::fs::create_dir_all(target)?;
    info!("Installing packaging into {}", target.display());

    // --no-user: some pip configurations default to --user, which refuses --target.
    let output = Command::new(host_python)
        .args(["-m", "pip", "install", "packaging", "--no-user", "--target"])
        .arg(target)
        .output()
        .map_err(|e| ToolInvocationError::spawn(host_python, &e))?;
    if !output.status.success() {
        return Err(ToolInvocationError::from_output(format!("{host_python} -m pip"), &output).into());
    }
    Ok(())
}

/// Name of the interpreter executable inside the scripts directory.
#[cfg(windows)]
pub const INTERPRETER_NAME: &str = "python.exe";

/// Name of the interpreter executable inside the scripts directory.
#[cfg(not(windows))]
pub const INTERPRETER_NAME: &str = "python";

/// Find a runnable interpreter in the first of `dirs` that has one,
/// without touching the tree.
///
/// Looks for [`INTERPRETER_NAME`], then `python3` on unix.
///
/// # Errors
///
/// Returns [`ValidationError::MissingInterpreter`] naming the first
/// directory if none of them has an interpreter.
pub fn locate_interpreter(dirs: &[&Path]) -> Result<PathBuf, ProbeError> {
    let names: &[&str] = if cfg!(unix) {
        &[INTERPRETER_NAME, "python3"]
    } else {
        &[INTERPRETER_NAME]
    };
    dirs.iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
        .ok_or_else(|| {
            ValidationError::MissingInterpreter {
                dir: dirs.first().map(|d| d.to_path_buf()).unwrap_or_default(),
                name: INTERPRETER_NAME,
            }
            .into()
        })
}

/// Return the interpreter path inside `scripts_dir`, aliasing `python` to
/// `python3` when only the latter exists.
///
/// # Errors
///
/// Returns [`ValidationError::MissingInterpreter`] if neither name exists,
/// or an IO error if the alias cannot be created.
pub fn ensure_interpreter(scripts_dir: &Path) -> Result<PathBuf, ProbeError> {
    let interpreter = scripts_dir.join(INTERPRETER_NAME);
    if interpreter.symlink_metadata().is_ok() {
        return Ok(interpreter);
    }

    #[cfg(unix)]
    if scripts_dir.join("python3").exists() {
        std::os::unix::fs::symlink("python3", &interpreter)?;
        info!("Linked {} -> python3", interpreter.display());
        return Ok(interpreter);
    }

    Err(ValidationError::MissingInterpreter {
        dir: scripts_dir.to_path_buf(),
        name: INTERPRETER_NAME,
    }
    .into())
}

/// Check that the interpreter's reported scripts directory is the one we were given.
///
/// # Errors
///
/// Returns [`ValidationError::ScriptsDirMismatch`] when they differ. A
/// document without `paths.scripts` reports the tree root.
pub fn check_scripts_dir(
    tree: &Path,
    scripts_dir: &Path,
    json: &PybiJson,
) -> Result<(), ValidationError> {
    let reported = tree.join(json.scripts_dir().unwrap_or_default());
    let expected = tree.join(scripts_dir);
    if normalize(&reported) == normalize(&expected) {
        Ok(())
    } else {
        Err(ValidationError::ScriptsDirMismatch { reported, expected })
    }
}
