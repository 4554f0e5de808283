//! Config command

use anyhow::Result;

use super::Context;

/// Print the effective configuration as TOML.
pub fn show(ctx: &Context) -> Result<()> {
    match &ctx.config_path {
        Some(path) => println!("# {}", path.display()),
        None => println!("# defaults"),
    }
    print!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}
