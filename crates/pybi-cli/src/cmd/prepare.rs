//! Prepare command

use anyhow::Result;
use pybi_core::prepare::Flavor;
use std::path::Path;

use super::Context;

/// Apply the per-flavor cleanup in place.
pub fn prepare(ctx: &Context, tree: &Path, scripts: &Path, flavor: Flavor) -> Result<()> {
    pybi_core::prepare::prepare(tree, scripts, flavor)?;
    ctx.reporter
        .success(&format!("Prepared {} ({flavor})", tree.display()));
    Ok(())
}
