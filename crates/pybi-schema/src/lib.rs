//! Shared document formats for pybi archives.
//!
//! Everything in this crate is pure: serializers and parsers for the files
//! that live inside an archive's `.pybi-info` directory, the archive filename
//! grammar, and the platform policies consulted when vendoring shared
//! libraries. Nothing here touches the filesystem.

pub mod document;
pub mod error;
pub mod filename;
pub mod hash;
pub mod policy;
pub mod probe;
pub mod record;

// Re-exports
pub use document::{PackageMetadata, PybiDescriptor};
pub use error::FormatError;
pub use filename::ArchiveName;
pub use hash::{EntryHash, RecordHash};
pub use policy::{Policy, PolicyError};
pub use probe::PybiJson;
pub use record::{Record, RecordRow};

/// Suffix of the metadata directory at the root of every archive.
pub const INFO_DIR_SUFFIX: &str = "pybi-info";

/// File extension of produced archives.
pub const ARCHIVE_EXTENSION: &str = "pybi";

/// Name of the manifest file inside the metadata directory.
pub const RECORD_FILE: &str = "RECORD";

/// Name of the format descriptor inside the metadata directory.
pub const PYBI_FILE: &str = "PYBI";

/// Name of the package metadata document inside the metadata directory.
pub const METADATA_FILE: &str = "METADATA";

/// Name of the capability JSON inside the metadata directory.
pub const PYBI_JSON_FILE: &str = "pybi.json";
