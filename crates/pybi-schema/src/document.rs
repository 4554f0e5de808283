//! The `PYBI` and `METADATA` documents.
//!
//! Both are RFC 822 style `Key: value` lines terminated by `\n`.

use crate::error::FormatError;

/// Format version written into every `PYBI` file.
pub const PYBI_VERSION: &str = "1.0";

/// Core metadata version written into every `METADATA` file.
pub const METADATA_VERSION: &str = "2.2";

/// The `PYBI` format descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PybiDescriptor {
    /// Archive format version (`Pybi-Version`).
    pub pybi_version: String,
    /// Identity of the tool that produced the archive (`Generator`).
    pub generator: String,
    /// Platform tag (`Tag`).
    pub tag: String,
    /// Build number; only written when nonzero (`Build`).
    pub build: u32,
}

impl PybiDescriptor {
    /// Descriptor for the current format version.
    pub fn new(generator: impl Into<String>, tag: impl Into<String>, build: u32) -> Self {
        Self {
            pybi_version: PYBI_VERSION.to_string(),
            generator: generator.into(),
            tag: tag.into(),
            build,
        }
    }

    /// Render the document text.
    pub fn to_text(&self) -> String {
        let mut text = format!(
            "Pybi-Version: {}\nGenerator: {}\nTag: {}\n",
            self.pybi_version, self.generator, self.tag
        );
        if self.build > 0 {
            text.push_str(&format!("Build: {}\n", self.build));
        }
        text
    }

    /// Parse document text.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is malformed, a required field is missing,
    /// or `Build` is not a number.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let fields = parse_fields(text)?;
        let build = match lookup(&fields, "Build") {
            Some(value) => value.parse().map_err(|_| FormatError::InvalidValue {
                field: "Build",
                value: value.to_string(),
            })?,
            None => 0,
        };
        Ok(Self {
            pybi_version: required(&fields, "Pybi-Version")?,
            generator: required(&fields, "Generator")?,
            tag: required(&fields, "Tag")?,
            build,
        })
    }
}

/// The `METADATA` package metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    /// `Metadata-Version`.
    pub metadata_version: String,
    /// Distribution name, including the unofficial-build suffix.
    pub name: String,
    /// Interpreter version.
    pub version: String,
    /// SPDX license identifier.
    pub license: String,
}

impl PackageMetadata {
    /// Metadata for the current metadata version.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        license: impl Into<String>,
    ) -> Self {
        Self {
            metadata_version: METADATA_VERSION.to_string(),
            name: name.into(),
            version: version.into(),
            license: license.into(),
        }
    }

    /// Render the document text.
    pub fn to_text(&self) -> String {
        format!(
            "Metadata-Version: {}\nName: {}\nVersion: {}\nLicense: {}\n",
            self.metadata_version, self.name, self.version, self.license
        )
    }

    /// Parse document text.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is malformed or a field is missing.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let fields = parse_fields(text)?;
        Ok(Self {
            metadata_version: required(&fields, "Metadata-Version")?,
            name: required(&fields, "Name")?,
            version: required(&fields, "Version")?,
            license: required(&fields, "License")?,
        })
    }
}

fn parse_fields(text: &str) -> Result<Vec<(String, String)>, FormatError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            line.split_once(": ")
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| FormatError::MalformedLine {
                    line: index + 1,
                    text: line.to_string(),
                })
        })
        .collect()
}

fn lookup<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn required(fields: &[(String, String)], key: &'static str) -> Result<String, FormatError> {
    lookup(fields, key)
        .map(str::to_string)
        .ok_or(FormatError::MissingField(key))
}
