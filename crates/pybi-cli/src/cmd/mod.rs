//! Command implementations

pub mod build;
pub mod config;
pub mod pack;
pub mod prepare;
pub mod probe;
pub mod vendor;
pub mod verify;

use anyhow::{Result, bail};
use pybi_core::Config;
use tracing::debug;

use crate::Cli;
use crate::ui::ConsoleReporter;

/// State shared by every command.
#[derive(Debug)]
pub struct Context {
    /// Effective configuration, after command-line overrides.
    pub config: Config,
    /// Where the file came from, if any.
    pub config_path: Option<std::path::PathBuf>,
    pub reporter: ConsoleReporter,
}

impl Context {
    /// Load configuration and apply global flags.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let (mut config, config_path) = match &cli.config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                (Config::load(path)?, Some(path.clone()))
            }
            None => (
                Config::load_default()?,
                crate::config_path().filter(|p| p.exists()),
            ),
        };
        if let Some(dir) = &cli.packaging_dir {
            config.packaging_dir = Some(dir.clone());
        }
        debug!("Effective config (from {config_path:?}): {config:?}");
        Ok(Self {
            config,
            config_path,
            reporter: ConsoleReporter::new(cli.quiet),
        })
    }
}
