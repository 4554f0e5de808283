//! Error categories shared across the build.

use std::path::PathBuf;
use thiserror::Error;

use pybi_schema::PolicyError;

/// Coarse failure category, used when reporting per-artifact failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input tree or its metadata violates an invariant.
    Validation,
    /// A required shared library could not be located.
    DependencyResolution,
    /// An external program failed or produced garbage.
    ToolInvocation,
    /// An archive member could not be computed.
    Integrity,
    /// Any other filesystem failure.
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::DependencyResolution => "dependency resolution",
            Self::ToolInvocation => "tool invocation",
            Self::Integrity => "integrity",
            Self::Io => "io",
        })
    }
}

/// The input tree is not packable as-is.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A symlink with an absolute target.
    #[error("Absolute symlinks are forbidden: {} -> {}", path.display(), target.display())]
    AbsoluteSymlink {
        /// The link.
        path: PathBuf,
        /// Its target as read.
        target: PathBuf,
    },

    /// A relative symlink whose target normalizes outside the tree root.
    #[error("Symlink points outside the tree: {} -> {}", path.display(), target.display())]
    SymlinkEscapesTree {
        /// The link.
        path: PathBuf,
        /// Its target as read.
        target: PathBuf,
    },

    #[error("Symlinks are not allowed inside the metadata directory: {}", .0.display())]
    SymlinkInMetadataDir(PathBuf),

    /// Zero or several `*.pybi-info` directories at the tree root.
    #[error("Expected exactly one *.pybi-info directory in {}, found {found}", root.display())]
    MetadataDirCount {
        /// Tree root.
        root: PathBuf,
        /// Number of candidates seen.
        found: usize,
    },

    #[error("Can't find {name} in {}", dir.display())]
    MissingInterpreter {
        /// Scripts directory searched.
        dir: PathBuf,
        /// Executable name expected.
        name: &'static str,
    },

    /// The interpreter's own idea of its scripts directory disagrees with the caller's.
    #[error("Interpreter reports scripts directory {}, expected {}", reported.display(), expected.display())]
    ScriptsDirMismatch {
        /// `<tree>/<paths.scripts>`.
        reported: PathBuf,
        /// `<tree>/<scripts>` as supplied.
        expected: PathBuf,
    },

    /// An archive member name would land outside the extraction directory.
    #[error("Archive member escapes the destination: {0}")]
    UnsafeMember(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// An external program could not be run, exited non-zero, or printed
/// output that could not be parsed.
#[derive(Error, Debug)]
#[error("{tool} failed: {detail}")]
pub struct ToolInvocationError {
    /// Program name or path.
    pub tool: String,
    /// What went wrong, including captured stderr where available.
    pub detail: String,
}

impl ToolInvocationError {
    /// Build an error for `tool`.
    pub fn new(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Build an error from a finished process that exited unsuccessfully.
    pub fn from_output(tool: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::new(
            tool,
            format!("exit status {:?}: {}", output.status.code(), stderr.trim()),
        )
    }

    /// Build an error for a spawn failure.
    pub fn spawn(tool: impl Into<String>, err: &std::io::Error) -> Self {
        let tool = tool.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            let detail = format!("'{tool}' not found");
            Self::new(tool, detail)
        } else {
            Self::new(tool, format!("failed to spawn: {err}"))
        }
    }
}
