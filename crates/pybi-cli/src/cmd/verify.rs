//! Verify and unpack commands

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

use super::Context;

/// Check each archive against its RECORD.
pub fn verify(ctx: &Context, archives: &[PathBuf]) -> Result<()> {
    let mut bad = 0;
    for archive in archives {
        match pybi_core::unpack::verify(archive) {
            Ok(report) if report.is_ok() => ctx.reporter.success(&format!(
                "{}: {} members OK",
                archive.display(),
                report.checked
            )),
            Ok(report) => {
                bad += 1;
                ctx.reporter.error(&format!(
                    "{}: {} problems",
                    archive.display(),
                    report.problems.len()
                ));
                for problem in &report.problems {
                    eprintln!("    {problem}");
                }
            }
            Err(e) => {
                bad += 1;
                ctx.reporter
                    .error(&format!("{}: {e} ({})", archive.display(), e.kind()));
            }
        }
    }

    if bad > 0 {
        bail!("{bad} of {} archives failed verification", archives.len());
    }
    Ok(())
}

/// Extract an archive into `dest`.
pub fn unpack(ctx: &Context, archive: &Path, dest: &Path) -> Result<()> {
    let count = pybi_core::unpack::unpack(archive, dest)?;
    ctx.reporter.success(&format!(
        "Extracted {count} members into {}",
        dest.display()
    ));
    Ok(())
}
