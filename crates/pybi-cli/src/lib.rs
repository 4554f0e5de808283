//! pybi - portable interpreter archives
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Command-line front end for `pybi-core`.
//!
//! # Overview
//!
//! Takes an unpacked interpreter installation (as produced by a relocatable
//! CPython build) and turns it into a `.pybi` archive: a deterministic zip
//! with a `.pybi-info` metadata directory and a RECORD integrity manifest.
//! Linux trees can have their external shared libraries vendored first.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.pybi/
//! ├── config.toml   # Optional settings
//! └── cache/
//!     └── packaging/  # Helper library for the metadata probe
//! ```

pub mod cmd;
pub mod ui;

pub use pybi_core::paths::*;

use clap::{Parser, Subcommand};
use pybi_core::prepare::Flavor;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pybi")]
#[command(author, version, about = "pybi - portable interpreter archives")]
pub struct Cli {
    /// Configuration file (defaults to ~/.pybi/config.toml)
    #[arg(long, global = true, env = "PYBI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory containing the `packaging` library used by the probe
    #[arg(long, global = true, env = "PYBI_PACKAGING_DIR")]
    pub packaging_dir: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print an interpreter's pybi.json document
    Probe {
        /// Interpreter executable
        interpreter: PathBuf,
    },
    /// Apply per-platform cleanup to an interpreter tree
    Prepare {
        /// Interpreter tree
        tree: PathBuf,
        /// Scripts directory, relative to the tree
        #[arg(long, default_value = "bin")]
        scripts: PathBuf,
        /// Cleanup flavor (linux, macos, windows)
        #[arg(long, default_value_t = Flavor::Linux)]
        flavor: Flavor,
    },
    /// Copy external shared libraries into a Linux tree
    Vendor {
        /// Interpreter tree
        tree: PathBuf,
        /// manylinux platform tag
        #[arg(long)]
        tag: String,
        /// List external libraries without copying or patching
        #[arg(long)]
        dry_run: bool,
    },
    /// Pack a tree that already has its .pybi-info directory
    Pack {
        /// Interpreter tree
        tree: PathBuf,
        /// Archive to create (must not exist)
        archive: PathBuf,
    },
    /// Prepare, probe, vendor and pack one tree
    Build {
        /// Interpreter tree
        tree: PathBuf,
        /// Platform tag
        #[arg(long)]
        tag: String,
        /// Scripts directory, relative to the tree
        #[arg(long, default_value = "bin")]
        scripts: PathBuf,
        /// Cleanup flavor (linux, macos, windows)
        #[arg(long, default_value_t = Flavor::Linux)]
        flavor: Flavor,
        /// Vendor external shared libraries first
        #[arg(long)]
        vendor: bool,
        /// Output directory (overrides config)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
        /// Do nothing if the first-build archive already exists
        #[arg(long)]
        skip_existing: bool,
    },
    /// Run every job in a TOML batch file
    Batch {
        /// Batch file
        file: PathBuf,
        /// Output directory (overrides config and batch file)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
    },
    /// Check an archive's members against its RECORD
    Verify {
        /// Archives to check
        #[arg(required = true)]
        archives: Vec<PathBuf>,
    },
    /// Extract an archive
    Unpack {
        /// Archive
        archive: PathBuf,
        /// Destination directory
        dest: PathBuf,
    },
    /// Show the effective configuration
    Config,
}
