//! Pack command

use anyhow::Result;
use pybi_core::Reporter;
use std::path::Path;

use super::Context;

/// Pack a tree whose `.pybi-info` directory is already in place.
pub fn pack(ctx: &Context, tree: &Path, archive: &Path) -> Result<()> {
    let packed = pybi_core::pack::pack(tree, archive)?;
    let size = std::fs::metadata(&packed.path).ok().map(|m| m.len());
    ctx.reporter.done(
        &packed.path.display().to_string(),
        &format!("{} members", packed.record.len()),
        size,
    );
    Ok(())
}
