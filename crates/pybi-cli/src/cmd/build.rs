//! Build and batch commands

use anyhow::{Result, bail};
use pybi_core::Reporter;
use pybi_core::elf::ElfLinkage;
use pybi_core::pipeline::{BatchFile, BuildJob, Builder};
use pybi_core::probe::InterpreterProbe;
use std::path::{Path, PathBuf};

use super::Context;

/// Build one archive.
pub fn build(
    mut ctx: Context,
    job: &BuildJob,
    out_dir: Option<PathBuf>,
    skip_existing: bool,
) -> Result<()> {
    if let Some(dir) = out_dir {
        ctx.config.out_dir = dir;
    }
    let probe = InterpreterProbe::from_config(&ctx.config)?;
    let linkage = if job.vendor {
        Some(ElfLinkage::new(&ctx.config.patchelf)?)
    } else {
        None
    };

    let mut builder =
        Builder::new(&ctx.config, &probe, &ctx.reporter).skip_existing(skip_existing);
    if let Some(linkage) = &linkage {
        builder = builder.with_linkage(linkage);
    }

    builder.build(job).map_err(|e| {
        let kind = e.kind();
        anyhow::Error::new(e).context(format!("{kind} error building {}", job.tree.display()))
    })?;
    Ok(())
}

/// Run a batch file; fails if any job failed.
pub fn batch(mut ctx: Context, file: &Path, out_dir: Option<PathBuf>) -> Result<()> {
    let batch = BatchFile::load(file)?;
    if let Some(dir) = out_dir.or_else(|| batch.out_dir.clone()) {
        ctx.config.out_dir = dir;
    }
    if batch.jobs.is_empty() {
        ctx.reporter.warning(&format!("{} has no jobs", file.display()));
        return Ok(());
    }

    let probe = InterpreterProbe::from_config(&ctx.config)?;
    let linkage = if batch.jobs.iter().any(|job| job.vendor) {
        match ElfLinkage::new(&ctx.config.patchelf) {
            Ok(linkage) => Some(linkage),
            Err(e) => {
                ctx.reporter
                    .warning(&format!("{e}; vendoring jobs will fail"));
                None
            }
        }
    } else {
        None
    };

    let mut builder =
        Builder::new(&ctx.config, &probe, &ctx.reporter).skip_existing(batch.skip_existing);
    if let Some(linkage) = &linkage {
        builder = builder.with_linkage(linkage);
    }

    let summary = builder.run_batch(&batch.jobs);
    if !summary.is_success() {
        bail!(
            "{} of {} jobs failed",
            summary.failed.len(),
            batch.jobs.len()
        );
    }
    Ok(())
}
