//! Core library for pybi.
//!
//! Turns an unpacked interpreter installation into a single relocatable
//! `.pybi` archive:
//!
//! 1. [`probe`] runs the interpreter to learn its markers, tags and layout.
//! 2. [`vendor`] (Linux only) copies external shared libraries into the tree
//!    and rewrites linkage so the tree is self-contained.
//! 3. [`metadata`] writes the `.pybi-info` documents and picks a build number.
//! 4. [`pack`] serializes the tree with a RECORD manifest.
//!
//! [`pipeline`] strings these together for single and batch builds.

pub mod config;
pub mod elf;
pub mod error;
pub mod fsutil;
pub mod metadata;
pub mod pack;
pub mod paths;
pub mod pipeline;
pub mod prepare;
pub mod probe;
pub mod reporter;
pub mod unpack;
pub mod vendor;

pub use config::Config;
pub use error::{ErrorKind, ToolInvocationError, ValidationError};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// Generator identity written into every `PYBI` descriptor.
pub const GENERATOR: &str = concat!("pybi-repack ", env!("CARGO_PKG_VERSION"));
