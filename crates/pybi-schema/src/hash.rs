//! Content digests as written into RECORD.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::FormatError;

/// Algorithm prefix used in RECORD hash specs.
pub const HASH_ALGORITHM: &str = "sha256";

/// Prefix marking a RECORD row that describes a symlink.
pub const SYMLINK_PREFIX: &str = "symlink";

/// A SHA-256 digest encoded as unpadded URL-safe base64.
///
/// This is the encoding used by wheel-style RECORD files, e.g.
/// `sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU` for empty input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordHash(String);

impl RecordHash {
    /// Digest `data`.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Wrap an already-encoded digest.
    ///
    /// # Errors
    ///
    /// Returns an error if `encoded` is not 43 characters of unpadded
    /// URL-safe base64 (the length of an encoded 32-byte digest).
    pub fn from_encoded(encoded: &str) -> Result<Self, FormatError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| FormatError::InvalidValue {
                field: "hash",
                value: encoded.to_string(),
            })?;
        if decoded.len() != 32 {
            return Err(FormatError::InvalidValue {
                field: "hash",
                value: encoded.to_string(),
            });
        }
        Ok(Self(encoded.to_string()))
    }

    /// The encoded digest without the algorithm prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{HASH_ALGORITHM}={}", self.0)
    }
}

/// The second column of a RECORD row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryHash {
    /// Regular file content digest.
    Sha256(RecordHash),
    /// Symlink; the value is the stored link target.
    Symlink(String),
    /// Empty column. Only the RECORD's own row carries this.
    None,
}

impl EntryHash {
    /// Parse a hash-spec column.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown algorithms or malformed digests.
    pub fn parse(spec: &str) -> Result<Self, FormatError> {
        if spec.is_empty() {
            return Ok(Self::None);
        }
        let (algo, value) = spec.split_once('=').ok_or_else(|| FormatError::InvalidValue {
            field: "hash",
            value: spec.to_string(),
        })?;
        match algo {
            HASH_ALGORITHM => Ok(Self::Sha256(RecordHash::from_encoded(value)?)),
            SYMLINK_PREFIX => Ok(Self::Symlink(value.to_string())),
            _ => Err(FormatError::InvalidValue {
                field: "hash",
                value: spec.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EntryHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256(hash) => write!(f, "{hash}"),
            Self::Symlink(target) => write!(f, "{SYMLINK_PREFIX}={target}"),
            Self::None => Ok(()),
        }
    }
}
