//! Linux platform policies.
//!
//! A policy names the shared libraries a target platform guarantees to
//! provide. Anything a binary needs beyond that set has to travel inside the
//! archive. The sets follow the manylinux definitions.

use thiserror::Error;

/// Errors raised when a platform tag does not map onto a known policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The tag is not a manylinux tag.
    #[error("Not a manylinux platform tag: '{0}'")]
    NotManylinux(String),

    /// The tag names an architecture no policy covers.
    #[error("Unsupported architecture '{arch}' in platform tag '{tag}'")]
    UnsupportedArch {
        /// Architecture component.
        arch: String,
        /// Full tag.
        tag: String,
    },
}

/// Sonames every manylinux platform provides.
const BASE_LIBRARIES: &[&str] = &[
    "libgcc_s.so.1",
    "libstdc++.so.6",
    "libm.so.6",
    "libdl.so.2",
    "librt.so.1",
    "libc.so.6",
    "libnsl.so.1",
    "libutil.so.1",
    "libpthread.so.0",
    "libresolv.so.2",
    "libX11.so.6",
    "libXext.so.6",
    "libXrender.so.1",
    "libICE.so.6",
    "libSM.so.6",
    "libGL.so.1",
    "libgobject-2.0.so.0",
    "libgthread-2.0.so.0",
    "libglib-2.0.so.0",
];

/// Additional sonames guaranteed only by the oldest (glibc 2.5) baseline.
const LEGACY_LIBRARIES: &[&str] = &["libpanelw.so.5", "libncursesw.so.5", "libcrypt.so.1"];

/// Dynamic loaders; never vendored.
const LOADERS: &[&str] = &[
    "ld-linux.so.2",
    "ld-linux-x86-64.so.2",
    "ld-linux-aarch64.so.1",
    "ld-linux-armhf.so.3",
    "ld64.so.1",
    "ld64.so.2",
];

const ARCHES: &[&str] = &["x86_64", "i686", "aarch64", "armv7l", "ppc64le", "s390x"];

/// A resolved platform policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Canonical name, e.g. `manylinux_2_17_x86_64`.
    pub name: String,
    /// Minimum glibc `(major, minor)` the platform guarantees.
    pub glibc: (u32, u32),
    /// Target architecture.
    pub arch: String,
}

impl Policy {
    /// Resolve the policy for a platform tag.
    ///
    /// Accepts `manylinux_<major>_<minor>_<arch>` and the legacy aliases
    /// `manylinux1_<arch>`, `manylinux2010_<arch>`, `manylinux2014_<arch>`.
    /// Compressed tag sets (`a.b`) resolve using their first component.
    ///
    /// # Errors
    ///
    /// Returns an error for non-manylinux tags or unknown architectures.
    pub fn from_tag(tag: &str) -> Result<Self, PolicyError> {
        let first = tag.split('.').next().unwrap_or(tag);
        let not_manylinux = || PolicyError::NotManylinux(tag.to_string());

        let (glibc, arch) = if let Some(rest) = first.strip_prefix("manylinux_") {
            let mut parts = rest.splitn(3, '_');
            let major = parts.next().and_then(|p| p.parse().ok());
            let minor = parts.next().and_then(|p| p.parse().ok());
            let arch = parts.next();
            match (major, minor, arch) {
                (Some(major), Some(minor), Some(arch)) => ((major, minor), arch),
                _ => return Err(not_manylinux()),
            }
        } else if let Some(arch) = first.strip_prefix("manylinux1_") {
            ((2, 5), arch)
        } else if let Some(arch) = first.strip_prefix("manylinux2010_") {
            ((2, 12), arch)
        } else if let Some(arch) = first.strip_prefix("manylinux2014_") {
            ((2, 17), arch)
        } else {
            return Err(not_manylinux());
        };

        if !ARCHES.contains(&arch) {
            return Err(PolicyError::UnsupportedArch {
                arch: arch.to_string(),
                tag: tag.to_string(),
            });
        }

        Ok(Self {
            name: format!("manylinux_{}_{}_{arch}", glibc.0, glibc.1),
            glibc,
            arch: arch.to_string(),
        })
    }

    /// Whether the platform itself provides `soname`.
    pub fn provides(&self, soname: &str) -> bool {
        BASE_LIBRARIES.contains(&soname)
            || LOADERS.contains(&soname)
            || (self.glibc <= (2, 5) && LEGACY_LIBRARIES.contains(&soname))
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
