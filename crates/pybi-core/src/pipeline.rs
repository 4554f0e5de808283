//! Build orchestration: one tree in, one archive out.
//!
//! `prepare → alias interpreter → probe → check layout → (vendor) →
//! metadata → pack`. Batch runs isolate jobs from each other; a failing job
//! is reported with its error category and the run moves on.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use pybi_schema::{ArchiveName, Policy};

use crate::config::Config;
use crate::error::{ErrorKind, ToolInvocationError, ValidationError};
use crate::metadata::{MetadataError, distribution_name, write_metadata};
use crate::pack::{PackError, pack};
use crate::prepare::{Flavor, PrepareError, prepare};
use crate::probe::{
    MetadataProbe, ProbeError, check_scripts_dir, ensure_interpreter, locate_interpreter,
};
use crate::reporter::Reporter;
use crate::vendor::{Linkage, VendorError, vendor};

/// Any failure while building one archive.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Tree cleanup failed.
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    /// Interpreter probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// The tree or tag is unacceptable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Metadata could not be derived.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Library vendoring failed.
    #[error(transparent)]
    Vendor(#[from] VendorError),

    /// Archive writing failed.
    #[error(transparent)]
    Pack(#[from] PackError),

    /// Filesystem failure outside a specific stage.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Prepare(e) => e.kind(),
            Self::Probe(e) => e.kind(),
            Self::Validation(_) => ErrorKind::Validation,
            Self::Metadata(e) => e.kind(),
            Self::Vendor(e) => e.kind(),
            Self::Pack(e) => e.kind(),
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// One archive to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildJob {
    /// Unpacked interpreter tree.
    pub tree: PathBuf,
    /// Scripts directory, relative to `tree`.
    pub scripts: PathBuf,
    /// Platform tag, e.g. `manylinux_2_17_x86_64`.
    pub tag: String,
    /// Vendor external shared libraries (Linux trees).
    #[serde(default)]
    pub vendor: bool,
    /// Cleanup applied before probing.
    #[serde(default)]
    pub flavor: Flavor,
}

/// What a build did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new archive was written.
    Built(PathBuf),
    /// The first-build archive already existed.
    Skipped(PathBuf),
}

/// Collaborators for a build.
pub struct Builder<'a> {
    config: &'a Config,
    probe: &'a dyn MetadataProbe,
    linkage: Option<&'a dyn Linkage>,
    reporter: &'a dyn Reporter,
    skip_existing: bool,
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("config", self.config)
            .field("vendoring", &self.linkage.is_some())
            .field("skip_existing", &self.skip_existing)
            .finish_non_exhaustive()
    }
}

impl<'a> Builder<'a> {
    /// Builder without a linkage backend; jobs that ask for vendoring fail.
    pub fn new(config: &'a Config, probe: &'a dyn MetadataProbe, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            probe,
            linkage: None,
            reporter,
            skip_existing: false,
        }
    }

    /// Use `linkage` for vendoring jobs.
    pub fn with_linkage(mut self, linkage: &'a dyn Linkage) -> Self {
        self.linkage = Some(linkage);
        self
    }

    /// Skip jobs whose build-0 archive already exists.
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Build one archive into the configured output directory.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the output directory never receives a
    /// partial archive.
    pub fn build(&self, job: &BuildJob) -> Result<BuildOutcome, BuildError> {
        let out_dir = &self.config.out_dir;
        std::fs::create_dir_all(out_dir)?;
        self.reporter.building(&job.tree.display().to_string());

        let scripts_dir = job.tree.join(&job.scripts);
        let mut search = vec![scripts_dir.as_path()];
        if job.flavor == Flavor::Windows {
            search.push(job.tree.as_path());
        }
        let interpreter = locate_interpreter(&search)?;
        self.reporter.section("Probing");
        let probed = self.probe.probe(&interpreter).map_err(ProbeError::from)?;
        check_scripts_dir(&job.tree, &job.scripts, &probed.json)?;

        let (name, version) =
            distribution_name(&probed.json, &self.config.name_suffix).map_err(MetadataError::from)?;
        let first = out_dir.join(ArchiveName::new(&name, &version, &job.tag).to_string());
        if self.skip_existing && first.exists() {
            info!("{} already exists, skipping", first.display());
            self.reporter.skipped(&first.display().to_string());
            return Ok(BuildOutcome::Skipped(first));
        }

        prepare(&job.tree, &job.scripts, job.flavor)?;
        ensure_interpreter(&scripts_dir)?;

        if job.vendor {
            let policy = Policy::from_tag(&job.tag).map_err(ValidationError::from)?;
            let linkage = self.linkage.ok_or_else(|| {
                VendorError::Tool(ToolInvocationError::new(
                    &self.config.patchelf,
                    "no linkage backend available",
                ))
            })?;
            self.reporter.section("Vendoring");
            let report = vendor(&job.tree, &policy, linkage, &self.config.lib_sdir)?;
            if !report.vendored.is_empty() {
                self.reporter.info(&format!(
                    "Vendored {} libraries into {}",
                    report.vendored.len(),
                    self.config.lib_sdir
                ));
            }
        }

        let prepared = write_metadata(&job.tree, out_dir, &probed, &job.tag, self.config)?;
        self.reporter.section("Packing");
        let packed = pack(&job.tree, &prepared.archive_path)?;

        let size = std::fs::metadata(&packed.path).ok().map(|m| m.len());
        self.reporter.done(
            &prepared.archive_name.to_string(),
            &format!("{} members", packed.record.len()),
            size,
        );
        Ok(BuildOutcome::Built(packed.path))
    }

    /// Run every job, isolating failures.
    pub fn run_batch(&self, jobs: &[BuildJob]) -> BatchSummary {
        let start = Instant::now();
        let mut summary = BatchSummary::default();
        for job in jobs {
            match self.build(job) {
                Ok(BuildOutcome::Built(path)) => summary.built.push(path),
                Ok(BuildOutcome::Skipped(path)) => summary.skipped.push(path),
                Err(e) => {
                    warn!("Build of {} failed: {e}", job.tree.display());
                    self.reporter.failed(
                        &job.tree.display().to_string(),
                        &e.kind().to_string(),
                        &e.to_string(),
                    );
                    summary.failed.push(JobFailure {
                        tree: job.tree.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }
        self.reporter.summary(
            summary.built.len(),
            summary.skipped.len(),
            summary.failed.len(),
            start.elapsed().as_secs_f64(),
        );
        summary
    }
}

/// A job that did not produce an archive.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Tree of the failed job.
    pub tree: PathBuf,
    /// Error category.
    pub kind: ErrorKind,
    /// Rendered error.
    pub message: String,
}

/// Result of [`Builder::run_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Archives written.
    pub built: Vec<PathBuf>,
    /// Archives that already existed.
    pub skipped: Vec<PathBuf>,
    /// Jobs that failed.
    pub failed: Vec<JobFailure>,
}

impl BatchSummary {
    /// True when no job failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Errors loading a batch file.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// Batch file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a valid batch description.
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// Batch file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// A TOML list of jobs.
///
/// ```toml
/// out_dir = "built"
/// skip_existing = true
///
/// [[job]]
/// tree = "/pyinstall"
/// scripts = "bin"
/// tag = "manylinux_2_17_x86_64"
/// vendor = true
/// ```
///
/// Relative `tree` and `out_dir` paths are resolved against the file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    /// Overrides the configured output directory.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    /// Skip jobs whose archive already exists.
    #[serde(default = "default_skip_existing")]
    pub skip_existing: bool,
    /// Jobs in run order.
    #[serde(default, rename = "job")]
    pub jobs: Vec<BuildJob>,
}

fn default_skip_existing() -> bool {
    true
}

impl BatchFile {
    /// Parse batch text without resolving paths.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a batch file and resolve its relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let text = std::fs::read_to_string(path).map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut batch = Self::parse(&text).map_err(|source| BatchError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or(Path::new("."));
        if let Some(out_dir) = &mut batch.out_dir {
            *out_dir = base.join(&*out_dir);
        }
        for job in &mut batch.jobs {
            job.tree = base.join(&job.tree);
        }
        Ok(batch)
    }
}
