//! Archive and metadata-directory naming.

use crate::error::FormatError;
use crate::{ARCHIVE_EXTENSION, INFO_DIR_SUFFIX};

/// A parsed archive filename: `<name>-<version>[-<build>]-<tag>.pybi`.
///
/// The build component is omitted when zero.
///
/// # Example
///
/// ```
/// use pybi_schema::ArchiveName;
///
/// let name = ArchiveName::new("cpython_unofficial", "3.9.6", "win_amd64").with_build(1);
/// assert_eq!(name.to_string(), "cpython_unofficial-3.9.6-1-win_amd64.pybi");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName {
    /// Distribution name.
    pub name: String,
    /// Interpreter version.
    pub version: String,
    /// Build number, `0` for the first build.
    pub build: u32,
    /// Platform tag.
    pub platform_tag: String,
}

impl ArchiveName {
    /// First-build name for a distribution.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        platform_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build: 0,
            platform_tag: platform_tag.into(),
        }
    }

    /// Same name with a different build number.
    pub fn with_build(mut self, build: u32) -> Self {
        self.build = build;
        self
    }

    /// Name of the metadata directory inside the archive, `<name>-<version>.pybi-info`.
    pub fn info_dir(&self) -> String {
        info_dir_name(&self.name, &self.version)
    }
}

/// Name of the metadata directory for a distribution.
pub fn info_dir_name(name: &str, version: &str) -> String {
    format!("{name}-{version}.{INFO_DIR_SUFFIX}")
}

impl std::fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.build > 0 {
            write!(
                f,
                "{}-{}-{}-{}.{ARCHIVE_EXTENSION}",
                self.name, self.version, self.build, self.platform_tag
            )
        } else {
            write!(
                f,
                "{}-{}-{}.{ARCHIVE_EXTENSION}",
                self.name, self.version, self.platform_tag
            )
        }
    }
}

impl std::str::FromStr for ArchiveName {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FormatError::InvalidFilename(s.to_string());
        let stem = s
            .strip_suffix(ARCHIVE_EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(invalid)?;

        let parts: Vec<&str> = stem.split('-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [name, version, tag] => Ok(Self::new(*name, *version, *tag)),
            [name, version, build, tag] => {
                let build = build.parse().map_err(|_| invalid())?;
                Ok(Self::new(*name, *version, *tag).with_build(build))
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_build_has_no_number() {
        let name = ArchiveName::new("cpython_unofficial", "3.10.0", "manylinux_2_17_x86_64");
        assert_eq!(
            name.to_string(),
            "cpython_unofficial-3.10.0-manylinux_2_17_x86_64.pybi"
        );
    }

    #[test]
    fn parse_with_and_without_build() {
        let plain: ArchiveName = "name-1.0.0-tag.pybi".parse().unwrap();
        assert_eq!(plain, ArchiveName::new("name", "1.0.0", "tag"));

        let numbered: ArchiveName = "name-1.0.0-2-tag.pybi".parse().unwrap();
        assert_eq!(numbered.build, 2);
        assert_eq!(numbered.to_string(), "name-1.0.0-2-tag.pybi");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("name-1.0.0-tag.zip".parse::<ArchiveName>().is_err());
        assert!("name-1.0.0-x-tag.pybi".parse::<ArchiveName>().is_err());
        assert!("name.pybi".parse::<ArchiveName>().is_err());
        assert!("name--tag.pybi".parse::<ArchiveName>().is_err());
    }

    #[test]
    fn info_dir_uses_name_and_version() {
        let name = ArchiveName::new("cpython_unofficial", "3.9.6", "win32").with_build(3);
        assert_eq!(name.info_dir(), "cpython_unofficial-3.9.6.pybi-info");
    }
}
