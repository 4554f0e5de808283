//! pybi - portable interpreter archives

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pybi_cli::cmd::{self, Context};
use pybi_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::from_cli(&cli)?;

    match cli.command {
        Commands::Probe { interpreter } => cmd::probe::probe(&ctx, &interpreter),
        Commands::Prepare {
            tree,
            scripts,
            flavor,
        } => cmd::prepare::prepare(&ctx, &tree, &scripts, flavor),
        Commands::Vendor { tree, tag, dry_run } => cmd::vendor::vendor(&ctx, &tree, &tag, dry_run),
        Commands::Pack { tree, archive } => cmd::pack::pack(&ctx, &tree, &archive),
        Commands::Build {
            tree,
            tag,
            scripts,
            flavor,
            vendor,
            out_dir,
            skip_existing,
        } => {
            let job = pybi_core::pipeline::BuildJob {
                tree,
                scripts,
                tag,
                vendor,
                flavor,
            };
            cmd::build::build(ctx, &job, out_dir, skip_existing)
        }
        Commands::Batch { file, out_dir } => cmd::build::batch(ctx, &file, out_dir),
        Commands::Verify { archives } => cmd::verify::verify(&ctx, &archives),
        Commands::Unpack { archive, dest } => cmd::verify::unpack(&ctx, &archive, &dest),
        Commands::Config => cmd::config::show(&ctx),
    }
}
