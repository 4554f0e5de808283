//! ELF backend for [`Linkage`].
//!
//! Reading uses `goblin`; patching shells out to `patchelf`.
//!
//! Library resolution follows the glibc loader's order:
//! 1. `DT_RPATH` of the consumer, only when it has no `DT_RUNPATH`
//! 2. `LD_LIBRARY_PATH`
//! 3. `DT_RUNPATH`
//! 4. directories from `/etc/ld.so.conf` (and its `include`s)
//! 5. the default system directories
//!
//! `$ORIGIN` expands to the consumer's directory. A candidate is only
//! accepted when its ELF class and machine match the consumer's, so a
//! 32-bit `libz.so.1` in `/usr/lib` does not satisfy a 64-bit binary.

use goblin::elf::Elf;
use goblin::elf::header::{EI_CLASS, ELFCLASS64, ET_DYN, ET_EXEC, header64};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

use crate::error::ToolInvocationError;
use crate::vendor::{Linkage, VendorError, expand_origin};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const LD_SO_CONF: &str = "/etc/ld.so.conf";
const MAX_INCLUDE_DEPTH: usize = 8;

/// Linkage facts the resolver needs from one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ElfInfo {
    is_64: bool,
    machine: u16,
    dynamic: bool,
    needed: Vec<String>,
    rpath: Vec<String>,
    runpath: Vec<String>,
}

fn split_path_list(entries: &[&str]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|e| e.split(':'))
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_info(path: &Path) -> Result<ElfInfo, VendorError> {
    let bytes = std::fs::read(path)?;
    let elf = Elf::parse(&bytes).map_err(|e| VendorError::Elf {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(ElfInfo {
        is_64: elf.is_64,
        machine: elf.header.e_machine,
        dynamic: elf.dynamic.is_some() && matches!(elf.header.e_type, ET_EXEC | ET_DYN),
        needed: elf.libraries.iter().map(|s| (*s).to_string()).collect(),
        rpath: split_path_list(&elf.rpaths),
        runpath: split_path_list(&elf.runpaths),
    })
}

/// Class and machine from the file header alone.
fn read_header(path: &Path) -> Option<(bool, u16)> {
    let mut bytes = Vec::with_capacity(header64::SIZEOF_EHDR);
    std::fs::File::open(path)
        .ok()?
        .take(header64::SIZEOF_EHDR as u64)
        .read_to_end(&mut bytes)
        .ok()?;
    let header = Elf::parse_header(&bytes).ok()?;
    Some((header.e_ident[EI_CLASS] == ELFCLASS64, header.e_machine))
}

fn has_elf_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok_and(|()| &magic == ELF_MAGIC)
}

/// Directories listed in an `ld.so.conf`-style file, following `include`
/// directives (glob patterns, relative to the including file).
pub fn parse_ld_so_conf(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    collect_ld_so_conf(path, 0, &mut dirs);
    dirs
}

fn collect_ld_so_conf(path: &Path, depth: usize, dirs: &mut Vec<PathBuf>) {
    if depth > MAX_INCLUDE_DEPTH {
        return;
    }
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };
    let base = path.parent().unwrap_or(Path::new("/"));

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some(pattern) = line.strip_prefix("include") {
            let pattern = pattern.trim();
            let pattern = if Path::new(pattern).is_absolute() {
                pattern.to_string()
            } else {
                format!(
                    "{}/{pattern}",
                    glob::Pattern::escape(&base.to_string_lossy())
                )
            };
            let Ok(matches) = glob::glob(&pattern) else {
                continue;
            };
            let mut included: Vec<PathBuf> = matches.filter_map(Result::ok).collect();
            included.sort();
            for file in included {
                collect_ld_so_conf(&file, depth + 1, dirs);
            }
        } else if line.starts_with("hwcap") {
            continue;
        } else {
            // Legacy `dir=TYPE` entries.
            let dir = PathBuf::from(line.split('=').next().unwrap_or(line).trim());
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
}

/// Default directories searched after `ld.so.conf`.
fn default_dirs() -> Vec<PathBuf> {
    ["/lib64", "/usr/lib64", "/lib", "/usr/lib"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

/// [`Linkage`] over real ELF files.
#[derive(Debug, Clone)]
pub struct ElfLinkage {
    patchelf: PathBuf,
    ld_library_path: Vec<PathBuf>,
    system_dirs: Vec<PathBuf>,
}

impl ElfLinkage {
    /// Backend using the host's loader configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `patchelf` cannot be found on `PATH`.
    pub fn new(patchelf: &str) -> Result<Self, ToolInvocationError> {
        let patchelf = which::which(patchelf).map_err(|_| {
            ToolInvocationError::new(
                patchelf,
                format!("'{patchelf}' not found. Install patchelf to vendor Linux trees"),
            )
        })?;
        Ok(Self::for_host(patchelf))
    }

    /// Host loader configuration without checking for `patchelf`.
    ///
    /// Enough for scanning; patching fails at the first invocation if the
    /// tool is missing.
    pub fn for_host(patchelf: impl Into<PathBuf>) -> Self {
        let ld_library_path = std::env::var_os("LD_LIBRARY_PATH")
            .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        let mut system_dirs = parse_ld_so_conf(Path::new(LD_SO_CONF));
        for dir in default_dirs() {
            if !system_dirs.contains(&dir) {
                system_dirs.push(dir);
            }
        }
        debug!("Library search dirs: {system_dirs:?}");
        Self {
            patchelf: patchelf.into(),
            ld_library_path,
            system_dirs,
        }
    }

    /// Backend with an explicit search configuration.
    pub fn with_search_dirs(
        patchelf: impl Into<PathBuf>,
        ld_library_path: Vec<PathBuf>,
        system_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            patchelf: patchelf.into(),
            ld_library_path,
            system_dirs,
        }
    }

    /// Candidate directories for `consumer`, in loader order.
    fn search_dirs(&self, consumer: &Path, info: &ElfInfo) -> Vec<PathBuf> {
        let origin = consumer.parent().unwrap_or(Path::new("/"));
        let expand = |entries: &[String]| -> Vec<PathBuf> {
            entries
                .iter()
                .filter_map(|e| expand_origin(e, origin))
                .collect()
        };

        let mut dirs = Vec::new();
        if info.runpath.is_empty() {
            dirs.extend(expand(&info.rpath));
        }
        dirs.extend(self.ld_library_path.iter().cloned());
        dirs.extend(expand(&info.runpath));
        dirs.extend(self.system_dirs.iter().cloned());
        dirs
    }

    /// Executes `patchelf` and handles errors.
    fn run_patchelf(&self, path: &Path, args: &[&str]) -> Result<(), VendorError> {
        let tool = self.patchelf.display().to_string();
        trace!("{tool} {} {}", args.join(" "), path.display());
        let output = Command::new(&self.patchelf)
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| ToolInvocationError::spawn(&tool, &e))?;
        if !output.status.success() {
            return Err(ToolInvocationError::from_output(tool, &output).into());
        }
        Ok(())
    }
}

impl Linkage for ElfLinkage {
    fn is_dynamic_object(&self, path: &Path) -> bool {
        has_elf_magic(path) && read_info(path).is_ok_and(|info| info.dynamic)
    }

    fn list_required(&self, path: &Path) -> Result<Vec<String>, VendorError> {
        Ok(read_info(path)?.needed)
    }

    fn search_path(&self, path: &Path) -> Result<Vec<String>, VendorError> {
        let info = read_info(path)?;
        let mut entries = info.rpath;
        entries.extend(info.runpath);
        Ok(entries)
    }

    fn resolve_sources(&self, consumer: &Path, names: &[String]) -> Vec<Option<PathBuf>> {
        let Ok(info) = read_info(consumer) else {
            return vec![None; names.len()];
        };
        let dirs = self.search_dirs(consumer, &info);
        names
            .iter()
            .map(|name| {
                dirs.iter().map(|dir| dir.join(name)).find(|candidate| {
                    match read_header(candidate) {
                        Some(header) if header == (info.is_64, info.machine) => {
                            trace!("Resolved {name} for {} at {}", consumer.display(), candidate.display());
                            true
                        }
                        Some(_) => {
                            trace!("Skipping incompatible {}", candidate.display());
                            false
                        }
                        None => false,
                    }
                })
            })
            .collect()
    }

    fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> Result<(), VendorError> {
        self.run_patchelf(path, &["--replace-needed", old, new])
    }

    fn set_soname(&self, path: &Path, soname: &str) -> Result<(), VendorError> {
        self.run_patchelf(path, &["--set-soname", soname])
    }

    fn set_search_path(&self, path: &Path, entries: &[String]) -> Result<(), VendorError> {
        if entries.is_empty() {
            return self.run_patchelf(path, &["--remove-rpath"]);
        }
        let joined = entries.join(":");
        self.run_patchelf(path, &["--force-rpath", "--set-rpath", &joined])
    }
}
