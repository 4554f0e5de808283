//! Vendor command

use anyhow::Result;
use pybi_core::Reporter;
use pybi_core::elf::ElfLinkage;
use pybi_core::vendor::{Resolution, scan};
use pybi_schema::Policy;
use std::collections::BTreeMap;
use std::path::Path;

use super::Context;

/// Vendor external libraries into `tree`, or list them with `dry_run`.
pub fn vendor(ctx: &Context, tree: &Path, tag: &str, dry_run: bool) -> Result<()> {
    let policy = Policy::from_tag(tag)?;
    let lib_sdir = &ctx.config.lib_sdir;

    if dry_run {
        // Scanning never invokes patchelf
        let linkage = ElfLinkage::for_host(&ctx.config.patchelf);
        let nodes = scan(tree, &policy, &linkage, lib_sdir)?;

        let mut external = BTreeMap::new();
        for node in &nodes {
            for (name, src) in node.external() {
                external.entry(name).or_insert(src);
            }
            for dep in &node.needed {
                if dep.resolution == Resolution::Unresolved {
                    ctx.reporter.warning(&format!(
                        "{} needs {}, which cannot be located",
                        node.path.display(),
                        dep.name
                    ));
                }
            }
        }

        ctx.reporter.section(&format!("External libraries ({policy})"));
        for (name, src) in &external {
            ctx.reporter.detail(&format!("{name} <- {}", src.display()));
        }
        ctx.reporter.info(&format!(
            "{} dynamic objects scanned, {} libraries would be vendored into {lib_sdir}",
            nodes.len(),
            external.len()
        ));
        return Ok(());
    }

    let linkage = ElfLinkage::new(&ctx.config.patchelf)?;
    let report = pybi_core::vendor::vendor(tree, &policy, &linkage, lib_sdir)?;
    for lib in report.vendored.values() {
        ctx.reporter
            .detail(&format!("{} <- {}", lib.soname, lib.source.display()));
    }
    ctx.reporter.success(&format!(
        "Vendored {} libraries, patched {} of {} objects",
        report.vendored.len(),
        report.patched.len(),
        report.scanned
    ));
    Ok(())
}
