//! Error types for document parsing.

use thiserror::Error;

/// Errors raised while parsing pybi documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A `Key: value` line was not in that form.
    #[error("Malformed header line {line}: '{text}'")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// The offending line.
        text: String,
    },

    /// A required field is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A field carried a value that could not be interpreted.
    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A RECORD row did not have exactly three columns.
    #[error("RECORD row {row} has {columns} columns, expected 3")]
    RecordColumns {
        /// 1-based row number.
        row: usize,
        /// Column count seen.
        columns: usize,
    },

    /// A quoted RECORD field was never closed.
    #[error("Unterminated quoted field in RECORD row {0}")]
    UnterminatedQuote(usize),

    /// An archive filename did not follow `<name>-<version>[-<build>]-<tag>.pybi`.
    #[error("Invalid archive filename: '{0}'")]
    InvalidFilename(String),
}
