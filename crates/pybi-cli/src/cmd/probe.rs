//! Probe command

use anyhow::{Context as _, Result};
use pybi_core::probe::{InterpreterProbe, MetadataProbe};
use std::io::Write;
use std::path::Path;

use super::Context;

/// Print the interpreter's pybi.json to stdout.
pub fn probe(ctx: &Context, interpreter: &Path) -> Result<()> {
    let probe = InterpreterProbe::from_config(&ctx.config)?;
    let result = probe
        .probe(interpreter)
        .with_context(|| format!("Failed to probe {}", interpreter.display()))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&result.raw)?;
    writeln!(stdout)?;
    Ok(())
}
