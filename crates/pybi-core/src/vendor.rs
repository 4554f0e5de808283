//! Shared-library vendoring for Linux trees.
//!
//! Every dynamically linked object in the tree is scanned for the libraries
//! it needs. Anything the target platform does not provide and the tree does
//! not already bundle is copied into `<tree>/<lib_sdir>` under a
//! hash-suffixed name, and the consumers are relinked to the copies through
//! an `$ORIGIN`-relative search path. A second pass fixes references between
//! the vendored libraries themselves; it runs after every copy exists, so
//! dependency cycles among them are rewritten as well.
//!
//! Binary inspection and patching go through the [`Linkage`] trait; see
//! [`crate::elf::ElfLinkage`] for the real backend.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use pybi_schema::Policy;

use crate::error::{ErrorKind, ToolInvocationError};
use crate::fsutil::{is_within, make_writable, normalize, relative_path};

/// Search-path token the loader expands to the object's own directory.
pub const ORIGIN: &str = "$ORIGIN";

/// Errors raised while vendoring.
#[derive(Error, Debug)]
pub enum VendorError {
    /// A required library has no source and is not bundled.
    #[error("Cannot vendor {}: required library \"{library}\" could not be located", consumer.display())]
    DependencyResolution {
        /// Soname that could not be found.
        library: String,
        /// Object that needs it.
        consumer: PathBuf,
    },

    /// The patching tool failed.
    #[error(transparent)]
    Tool(#[from] ToolInvocationError),

    /// An object could not be parsed.
    #[error("Failed to read {}: {reason}", path.display())]
    Elf {
        /// The object.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VendorError {
    /// Coarse category for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DependencyResolution { .. } => ErrorKind::DependencyResolution,
            Self::Tool(_) => ErrorKind::ToolInvocation,
            Self::Elf { .. } => ErrorKind::Validation,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Binary linkage inspection and patching.
///
/// The vendoring algorithm only talks to binaries through this interface.
pub trait Linkage {
    /// Whether `path` is a dynamically linked executable or shared library.
    fn is_dynamic_object(&self, path: &Path) -> bool;

    /// Sonames `path` declares as required, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be read.
    fn list_required(&self, path: &Path) -> Result<Vec<String>, VendorError>;

    /// Runtime search-path entries of `path` (RPATH and RUNPATH, unexpanded).
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be read.
    fn search_path(&self, path: &Path) -> Result<Vec<String>, VendorError>;

    /// Where the loader would find each of `names` when loading them for
    /// `consumer`, index for index.
    fn resolve_sources(&self, consumer: &Path, names: &[String]) -> Vec<Option<PathBuf>>;

    /// Replace the required entry `old` with `new`.
    ///
    /// # Errors
    ///
    /// Returns an error if patching fails.
    fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> Result<(), VendorError>;

    /// Set the object's own soname.
    ///
    /// # Errors
    ///
    /// Returns an error if patching fails.
    fn set_soname(&self, path: &Path, soname: &str) -> Result<(), VendorError>;

    /// Replace the object's search path. An empty slice removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if patching fails.
    fn set_search_path(&self, path: &Path, entries: &[String]) -> Result<(), VendorError>;
}

/// How one required library was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The platform policy guarantees it.
    Provided,
    /// Found inside the tree.
    Bundled,
    /// Found outside the tree; needs vendoring.
    External(PathBuf),
    /// Not found anywhere.
    Unresolved,
}

/// One required library of a scanned object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Soname as declared.
    pub name: String,
    /// Where it comes from.
    pub resolution: Resolution,
}

/// A scanned object and its requirements.
#[derive(Debug, Clone)]
pub struct ElfNode {
    /// Path inside the tree.
    pub path: PathBuf,
    /// Declared requirements.
    pub needed: Vec<Dependency>,
}

impl ElfNode {
    /// Requirements that must be copied into the tree.
    pub fn external(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.needed.iter().filter_map(|dep| match &dep.resolution {
            Resolution::External(src) => Some((dep.name.as_str(), src.as_path())),
            _ => None,
        })
    }
}

/// A library copied into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendoredLib {
    /// Hash-suffixed soname.
    pub soname: String,
    /// Location of the copy.
    pub path: PathBuf,
    /// Where it was copied from.
    pub source: PathBuf,
}

/// Original soname → vendored copy.
pub type SonameMap = BTreeMap<String, VendoredLib>;

/// Outcome of [`vendor`].
#[derive(Debug, Clone, Default)]
pub struct VendorReport {
    /// Dynamic objects found in the tree.
    pub scanned: usize,
    /// Libraries copied in.
    pub vendored: SonameMap,
    /// Tree objects whose linkage was rewritten.
    pub patched: Vec<PathBuf>,
}

/// Classify the requirements of one object.
///
/// `origin` is the location used to resolve `$ORIGIN`-relative search
/// paths, normally the object itself.
fn classify<L: Linkage + ?Sized>(
    tree: &Path,
    lib_dir: &Path,
    policy: &Policy,
    linkage: &L,
    object: &Path,
    origin: &Path,
) -> Result<ElfNode, VendorError> {
    let names = linkage.list_required(object)?;
    let unprovided: Vec<String> = names
        .iter()
        .filter(|name| !policy.provides(name))
        .cloned()
        .collect();
    let mut sources = if unprovided.is_empty() {
        Vec::new()
    } else {
        linkage.resolve_sources(origin, &unprovided)
    }
    .into_iter();

    let mut needed = Vec::new();
    for name in names {
        let resolution = if policy.provides(&name) {
            Resolution::Provided
        } else {
            match sources.next().flatten() {
                Some(src) if is_within(tree, &src) => Resolution::Bundled,
                Some(src) => Resolution::External(src),
                None if lib_dir.join(&name).exists() => Resolution::Bundled,
                None => Resolution::Unresolved,
            }
        };
        needed.push(Dependency { name, resolution });
    }
    Ok(ElfNode {
        path: object.to_path_buf(),
        needed,
    })
}

/// Scan the tree and classify every dynamic object's requirements.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or an object cannot be read.
pub fn scan<L: Linkage + ?Sized>(
    tree: &Path,
    policy: &Policy,
    linkage: &L,
    lib_sdir: &str,
) -> Result<Vec<ElfNode>, VendorError> {
    let tree = tree.canonicalize()?;
    let lib_dir = tree.join(lib_sdir);
    let mut nodes = Vec::new();
    for entry in WalkDir::new(&tree).sort_by_file_name() {
        let entry = entry.map_err(|e| VendorError::Io(e.into()))?;
        if !entry.file_type().is_file() || !linkage.is_dynamic_object(entry.path()) {
            continue;
        }
        nodes.push(classify(&tree, &lib_dir, policy, linkage, entry.path(), entry.path())?);
    }
    Ok(nodes)
}

/// Name for a vendored copy: `<stem>-<hash8>.<rest>`.
///
/// `libfoo.so.1` with digest `0123abcd…` becomes `libfoo-0123abcd.so.1`.
/// Names that already carry the suffix are kept.
pub fn hashed_soname(soname: &str, shorthash: &str) -> String {
    let (base, ext) = match soname.split_once('.') {
        Some((base, ext)) => (base, Some(ext)),
        None => (soname, None),
    };
    if base.ends_with(&format!("-{shorthash}")) {
        return soname.to_string();
    }
    match ext {
        Some(ext) => format!("{base}-{shorthash}.{ext}"),
        None => format!("{base}-{shorthash}"),
    }
}

/// Copy `src` into `lib_dir` under a hash-suffixed soname.
///
/// The copy is made writable, its soname set to the new name, and an
/// existing search path replaced by `$ORIGIN`. An identical copy already in
/// place is reused.
///
/// # Errors
///
/// Returns an error if the copy or patching fails.
pub fn copylib<L: Linkage + ?Sized>(
    src: &Path,
    soname: &str,
    lib_dir: &Path,
    linkage: &L,
) -> Result<VendoredLib, VendorError> {
    let digest = hex::encode(Sha256::digest(std::fs::read(src)?));
    let new_soname = hashed_soname(soname, &digest[..8]);
    let dest = lib_dir.join(&new_soname);

    let lib = VendoredLib {
        soname: new_soname,
        path: dest.clone(),
        source: src.to_path_buf(),
    };
    if dest.exists() {
        debug!("{} already vendored", lib.soname);
        return Ok(lib);
    }

    info!("Vendoring {} -> {}", src.display(), dest.display());
    std::fs::copy(src, &dest)?;
    make_writable(&dest)?;
    linkage.set_soname(&dest, &lib.soname)?;
    if !linkage.search_path(&dest)?.is_empty() {
        linkage.set_search_path(&dest, &[ORIGIN.to_string()])?;
    }
    Ok(lib)
}

/// `$ORIGIN`-relative search-path entry from `object` to `dir`.
fn origin_entry(object: &Path, dir: &Path) -> String {
    let from = object.parent().unwrap_or(object);
    let rel = relative_path(from, dir);
    if rel == Path::new(".") {
        ORIGIN.to_string()
    } else {
        format!("{ORIGIN}/{}", rel.to_string_lossy())
    }
}

/// Add `lib_dir` to `object`'s search path as an `$ORIGIN`-relative entry.
///
/// Existing entries are kept when they are `$ORIGIN`-relative and stay
/// inside the tree. Absolute entries inside the tree are rewritten relative
/// to the object; anything else is dropped.
///
/// # Errors
///
/// Returns an error if the search path cannot be read or written.
pub fn set_relative_search_path<L: Linkage + ?Sized>(
    linkage: &L,
    object: &Path,
    lib_dir: &Path,
    tree: &Path,
) -> Result<(), VendorError> {
    let object_dir = object.parent().unwrap_or(tree);
    let mut entries: Vec<String> = Vec::new();

    for entry in linkage.search_path(object)? {
        let expanded = expand_origin(&entry, object_dir);
        let kept = match expanded {
            Some(path) if is_within(tree, &path) => {
                if entry.starts_with(ORIGIN) || entry.starts_with("${ORIGIN}") {
                    Some(entry.clone())
                } else {
                    Some(origin_entry(object, &normalize(&path)))
                }
            }
            _ => None,
        };
        match kept {
            Some(kept) if !entries.contains(&kept) => entries.push(kept),
            Some(_) => {}
            None => warn!("Dropping search path entry {entry} from {}", object.display()),
        }
    }

    let new_entry = origin_entry(object, lib_dir);
    if !entries.contains(&new_entry) {
        entries.push(new_entry);
    }
    linkage.set_search_path(object, &entries)
}

/// Expand `$ORIGIN`/`${ORIGIN}` against `origin_dir`. Relative entries
/// without the token are meaningless to the loader and yield `None`.
pub fn expand_origin(entry: &str, origin_dir: &Path) -> Option<PathBuf> {
    for token in [ORIGIN, "${ORIGIN}"] {
        if let Some(rest) = entry.strip_prefix(token) {
            let rest = rest.trim_start_matches('/');
            return Some(normalize(&origin_dir.join(rest)));
        }
    }
    let path = Path::new(entry);
    path.is_absolute().then(|| normalize(path))
}

/// Make `tree` self-contained under `policy`.
///
/// The tree is modified in place. On failure whatever was vendored before
/// the error stays in the tree.
///
/// # Errors
///
/// Returns [`VendorError::DependencyResolution`] naming the first library
/// that cannot be located, or a tool, parse or IO error.
pub fn vendor<L: Linkage + ?Sized>(
    tree: &Path,
    policy: &Policy,
    linkage: &L,
    lib_sdir: &str,
) -> Result<VendorReport, VendorError> {
    let tree = tree.canonicalize()?;
    let lib_dir = tree.join(lib_sdir);
    std::fs::create_dir_all(&lib_dir)?;

    let nodes = scan(&tree, policy, linkage, lib_sdir)?;
    let mut report = VendorReport {
        scanned: nodes.len(),
        ..VendorReport::default()
    };
    info!(
        "Scanned {} dynamic objects in {} against {policy}",
        nodes.len(),
        tree.display()
    );

    // Vendored copies whose own requirements still need classifying.
    let mut pending: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();

    for node in &nodes {
        check_resolved(node)?;
        let mut relinked = false;
        for (name, src) in node.external() {
            let lib = vendor_one(&mut report.vendored, &mut pending, name, src, &lib_dir, linkage)?;
            linkage.rewrite_dependency(&node.path, name, &lib.soname)?;
            relinked = true;
        }
        if relinked {
            set_relative_search_path(linkage, &node.path, &lib_dir, &tree)?;
            report.patched.push(node.path.clone());
        }
    }

    // Requirements of the copies, classified against their original
    // location, are pulled in too.
    while let Some((copy, source)) = pending.pop_front() {
        let node = classify(&tree, &lib_dir, policy, linkage, &copy, &source)?;
        check_resolved(&node)?;
        for (name, src) in node.external() {
            vendor_one(&mut report.vendored, &mut pending, name, src, &lib_dir, linkage)?;
        }
    }

    // Copies were made in scan order, not dependency order; now that all of
    // them exist, point their requirements at each other's new names.
    for lib in report.vendored.values() {
        let mut relinked = false;
        for name in linkage.list_required(&lib.path)? {
            if let Some(target) = report.vendored.get(&name) {
                linkage.rewrite_dependency(&lib.path, &name, &target.soname)?;
                relinked = true;
            }
        }
        if relinked {
            let mut entries = linkage.search_path(&lib.path)?;
            if !entries.iter().any(|e| e == ORIGIN) {
                entries.push(ORIGIN.to_string());
                linkage.set_search_path(&lib.path, &entries)?;
            }
        }
    }

    info!(
        "Vendored {} libraries, relinked {} objects",
        report.vendored.len(),
        report.patched.len()
    );
    Ok(report)
}

fn check_resolved(node: &ElfNode) -> Result<(), VendorError> {
    match node
        .needed
        .iter()
        .find(|dep| dep.resolution == Resolution::Unresolved)
    {
        Some(dep) => Err(VendorError::DependencyResolution {
            library: dep.name.clone(),
            consumer: node.path.clone(),
        }),
        None => Ok(()),
    }
}

fn vendor_one<L: Linkage + ?Sized>(
    vendored: &mut SonameMap,
    pending: &mut VecDeque<(PathBuf, PathBuf)>,
    name: &str,
    src: &Path,
    lib_dir: &Path,
    linkage: &L,
) -> Result<VendoredLib, VendorError> {
    if let Some(lib) = vendored.get(name) {
        return Ok(lib.clone());
    }
    let lib = copylib(src, name, lib_dir, linkage)?;
    pending.push_back((lib.path.clone(), src.to_path_buf()));
    vendored.insert(name.to_string(), lib.clone());
    Ok(lib)
}

#[cfg(test)]
pub(crate) mod fake {
    //! Text-file stand-in for ELF objects.
    //!
    //! ```text
    //! FAKEELF
    //! SONAME libfoo.so.1
    //! NEEDED libbar.so.2
    //! RPATH $ORIGIN/../lib
    //! ```

    use super::*;

    const MAGIC: &str = "FAKEELF";

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub(crate) struct FakeObject {
        pub(crate) soname: Option<String>,
        pub(crate) needed: Vec<String>,
        pub(crate) rpath: Vec<String>,
    }

    impl FakeObject {
        pub(crate) fn needing(needed: &[&str]) -> Self {
            Self {
                needed: needed.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        pub(crate) fn read(path: &Path) -> Self {
            let text = std::fs::read_to_string(path).unwrap();
            let mut object = Self::default();
            for line in text.lines().skip(1) {
                match line.split_once(' ') {
                    Some(("SONAME", v)) => object.soname = Some(v.to_string()),
                    Some(("NEEDED", v)) => object.needed.push(v.to_string()),
                    Some(("RPATH", v)) => {
                        object.rpath = v.split(':').map(ToString::to_string).collect();
                    }
                    _ => {}
                }
            }
            object
        }

        pub(crate) fn write(&self, path: &Path) {
            let mut text = format!("{MAGIC}\n");
            if let Some(soname) = &self.soname {
                text.push_str(&format!("SONAME {soname}\n"));
            }
            for needed in &self.needed {
                text.push_str(&format!("NEEDED {needed}\n"));
            }
            if !self.rpath.is_empty() {
                text.push_str(&format!("RPATH {}\n", self.rpath.join(":")));
            }
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }
    }

    /// Resolves through the consumer's search path, then `system`.
    #[derive(Debug)]
    pub(crate) struct FakeLinkage {
        pub(crate) system: PathBuf,
    }

    impl Linkage for FakeLinkage {
        fn is_dynamic_object(&self, path: &Path) -> bool {
            std::fs::read(path).is_ok_and(|d| d.starts_with(MAGIC.as_bytes()))
        }

        fn list_required(&self, path: &Path) -> Result<Vec<String>, VendorError> {
            Ok(FakeObject::read(path).needed)
        }

        fn search_path(&self, path: &Path) -> Result<Vec<String>, VendorError> {
            Ok(FakeObject::read(path).rpath)
        }

        fn resolve_sources(&self, consumer: &Path, names: &[String]) -> Vec<Option<PathBuf>> {
            let Some(origin) = consumer.parent() else {
                return vec![None; names.len()];
            };
            let dirs: Vec<PathBuf> = FakeObject::read(consumer)
                .rpath
                .iter()
                .filter_map(|e| expand_origin(e, origin))
                .chain(std::iter::once(self.system.clone()))
                .collect();
            names
                .iter()
                .map(|name| dirs.iter().map(|dir| dir.join(name)).find(|p| p.exists()))
                .collect()
        }

        fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> Result<(), VendorError> {
            let mut object = FakeObject::read(path);
            for needed in &mut object.needed {
                if needed == old {
                    *needed = new.to_string();
                }
            }
            object.write(path);
            Ok(())
        }

        fn set_soname(&self, path: &Path, soname: &str) -> Result<(), VendorError> {
            let mut object = FakeObject::read(path);
            object.soname = Some(soname.to_string());
            object.write(path);
            Ok(())
        }

        fn set_search_path(&self, path: &Path, entries: &[String]) -> Result<(), VendorError> {
            let mut object = FakeObject::read(path);
            object.rpath = entries.to_vec();
            object.write(path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeLinkage, FakeObject};
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        tree: PathBuf,
        system: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let tree = root.join("tree");
            let system = root.join("system");
            std::fs::create_dir_all(&tree).unwrap();
            std::fs::create_dir_all(&system).unwrap();
            Self {
                _dir: dir,
                tree,
                system,
            }
        }

        fn linkage(&self) -> FakeLinkage {
            FakeLinkage {
                system: self.system.clone(),
            }
        }

        fn system_lib(&self, soname: &str, needed: &[&str]) {
            let mut object = FakeObject::needing(needed);
            object.soname = Some(soname.to_string());
            object.write(&self.system.join(soname));
        }

        fn vendored_name(&self, soname: &str) -> String {
            let digest = hex::encode(Sha256::digest(std::fs::read(self.system.join(soname)).unwrap()));
            hashed_soname(soname, &digest[..8])
        }
    }

    fn policy() -> Policy {
        Policy::from_tag("manylinux_2_17_x86_64").unwrap()
    }

    #[test]
    fn hashed_names() {
        assert_eq!(hashed_soname("libfoo.so.1", "0123abcd"), "libfoo-0123abcd.so.1");
        assert_eq!(hashed_soname("libz.so.1.2.11", "deadbeef"), "libz-deadbeef.so.1.2.11");
        assert_eq!(hashed_soname("libodd", "deadbeef"), "libodd-deadbeef");
        assert_eq!(
            hashed_soname("libfoo-0123abcd.so.1", "0123abcd"),
            "libfoo-0123abcd.so.1"
        );
    }

    #[test]
    fn external_library_is_vendored_and_relinked() {
        let fx = Fixture::new();
        fx.system_lib("libfoo.so.1", &["libc.so.6"]);
        FakeObject::needing(&["libfoo.so.1", "libc.so.6"]).write(&fx.tree.join("bin/python3"));

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        assert_eq!(report.scanned, 1);

        let new_name = fx.vendored_name("libfoo.so.1");
        let copy = fx.tree.join(".libs").join(&new_name);
        assert_eq!(report.vendored["libfoo.so.1"].path, copy);

        let python = FakeObject::read(&fx.tree.join("bin/python3"));
        assert_eq!(python.needed, vec![new_name.clone(), "libc.so.6".to_string()]);
        assert_eq!(python.rpath, vec!["$ORIGIN/../.libs".to_string()]);

        let vendored = FakeObject::read(&copy);
        assert_eq!(vendored.soname.as_deref(), Some(new_name.as_str()));
        assert_eq!(vendored.needed, vec!["libc.so.6".to_string()]);
        // The system copy is untouched.
        assert_eq!(
            FakeObject::read(&fx.system.join("libfoo.so.1")).soname.as_deref(),
            Some("libfoo.so.1")
        );
    }

    #[test]
    fn transitive_dependency_is_renamed_in_vendored_library() {
        let fx = Fixture::new();
        fx.system_lib("libbar.so.2", &[]);
        fx.system_lib("libfoo.so.1", &["libbar.so.2"]);
        FakeObject::needing(&["libfoo.so.1"]).write(&fx.tree.join("bin/python3"));

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        assert_eq!(report.vendored.len(), 2);

        let foo = FakeObject::read(&report.vendored["libfoo.so.1"].path);
        assert_eq!(foo.needed, vec![fx.vendored_name("libbar.so.2")]);
        assert_eq!(foo.rpath, vec![ORIGIN.to_string()]);
        assert_eq!(report.patched, vec![fx.tree.join("bin/python3")]);
    }

    #[test]
    fn dependency_cycle_is_fully_rewritten() {
        let fx = Fixture::new();
        fx.system_lib("liba.so.1", &["libb.so.1"]);
        fx.system_lib("libb.so.1", &["liba.so.1"]);
        FakeObject::needing(&["liba.so.1"]).write(&fx.tree.join("lib/ext.so"));

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        let a = FakeObject::read(&report.vendored["liba.so.1"].path);
        let b = FakeObject::read(&report.vendored["libb.so.1"].path);
        assert_eq!(a.needed, vec![fx.vendored_name("libb.so.1")]);
        assert_eq!(b.needed, vec![fx.vendored_name("liba.so.1")]);

        let ext = FakeObject::read(&fx.tree.join("lib/ext.so"));
        assert_eq!(ext.rpath, vec!["$ORIGIN/../.libs".to_string()]);
    }

    #[test]
    fn shared_dependency_is_copied_once() {
        let fx = Fixture::new();
        fx.system_lib("libssl.so.1.1", &[]);
        FakeObject::needing(&["libssl.so.1.1"]).write(&fx.tree.join("lib/_ssl.so"));
        FakeObject::needing(&["libssl.so.1.1"]).write(&fx.tree.join("lib/_hashlib.so"));

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        assert_eq!(report.vendored.len(), 1);
        assert_eq!(report.patched.len(), 2);
        let entries = std::fs::read_dir(fx.tree.join(".libs")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn unresolvable_library_fails_with_its_name() {
        let fx = Fixture::new();
        FakeObject::needing(&["libmissing.so.3"]).write(&fx.tree.join("bin/python3"));

        let err = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyResolution);
        match err {
            VendorError::DependencyResolution { library, consumer } => {
                assert_eq!(library, "libmissing.so.3");
                assert_eq!(consumer, fx.tree.join("bin/python3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn already_bundled_library_is_left_alone() {
        let fx = Fixture::new();
        FakeObject::needing(&[]).write(&fx.tree.join(".libs/libgone.so.1"));
        FakeObject::needing(&["libgone.so.1"]).write(&fx.tree.join("bin/python3"));
        let before = std::fs::read(fx.tree.join("bin/python3")).unwrap();

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        assert!(report.vendored.is_empty());
        assert!(report.patched.is_empty());
        assert_eq!(std::fs::read(fx.tree.join("bin/python3")).unwrap(), before);
    }

    #[test]
    fn in_tree_resolution_counts_as_bundled() {
        let fx = Fixture::new();
        // Also present on the system, but the in-tree copy wins via RPATH.
        fx.system_lib("libpython3.9.so.1.0", &[]);
        FakeObject::needing(&[]).write(&fx.tree.join("lib/libpython3.9.so.1.0"));
        let mut python = FakeObject::needing(&["libpython3.9.so.1.0"]);
        python.rpath = vec!["$ORIGIN/../lib".to_string()];
        python.write(&fx.tree.join("bin/python3"));

        let nodes = scan(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        let python = nodes.iter().find(|n| n.path.ends_with("bin/python3")).unwrap();
        assert_eq!(python.needed[0].resolution, Resolution::Bundled);
    }

    #[test]
    fn search_path_entries_are_filtered() {
        let fx = Fixture::new();
        fx.system_lib("libfoo.so.1", &[]);
        let mut ext = FakeObject::needing(&["libfoo.so.1"]);
        ext.rpath = vec![
            "$ORIGIN".to_string(),
            format!("{}/lib", fx.tree.display()),
            "/usr/local/lib".to_string(),
            "$ORIGIN/../../../../outside".to_string(),
            "relative/dir".to_string(),
        ];
        ext.write(&fx.tree.join("lib/python3.9/lib-dynload/_ext.so"));

        vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        let ext = FakeObject::read(&fx.tree.join("lib/python3.9/lib-dynload/_ext.so"));
        assert_eq!(
            ext.rpath,
            vec![
                "$ORIGIN".to_string(),
                "$ORIGIN/../..".to_string(),
                "$ORIGIN/../../../.libs".to_string(),
            ]
        );
    }

    #[test]
    fn provided_libraries_are_not_vendored() {
        let fx = Fixture::new();
        fx.system_lib("libm.so.6", &[]);
        fx.system_lib("libcrypt.so.1", &[]);
        FakeObject::needing(&["libm.so.6", "libcrypt.so.1"]).write(&fx.tree.join("bin/python3"));

        let legacy = Policy::from_tag("manylinux1_x86_64").unwrap();
        let report = vendor(&fx.tree, &legacy, &fx.linkage(), ".libs").unwrap();
        assert!(report.vendored.is_empty());

        let report = vendor(&fx.tree, &policy(), &fx.linkage(), ".libs").unwrap();
        assert_eq!(report.vendored.keys().collect::<Vec<_>>(), vec!["libcrypt.so.1"]);
    }

    #[test]
    fn origin_expansion() {
        let dir = Path::new("/t/lib");
        assert_eq!(expand_origin("$ORIGIN/../x", dir), Some(PathBuf::from("/t/x")));
        assert_eq!(expand_origin("${ORIGIN}", dir), Some(PathBuf::from("/t/lib")));
        assert_eq!(expand_origin("/opt/lib", dir), Some(PathBuf::from("/opt/lib")));
        assert_eq!(expand_origin("rel", dir), None);
    }

    /// Counts how often each object is asked to resolve its requirements.
    struct CountingLinkage {
        inner: FakeLinkage,
        calls: std::cell::RefCell<Vec<(PathBuf, usize)>>,
    }

    impl Linkage for CountingLinkage {
        fn is_dynamic_object(&self, path: &Path) -> bool {
            self.inner.is_dynamic_object(path)
        }
        fn list_required(&self, path: &Path) -> Result<Vec<String>, VendorError> {
            self.inner.list_required(path)
        }
        fn search_path(&self, path: &Path) -> Result<Vec<String>, VendorError> {
            self.inner.search_path(path)
        }
        fn resolve_sources(&self, consumer: &Path, names: &[String]) -> Vec<Option<PathBuf>> {
            self.calls
                .borrow_mut()
                .push((consumer.to_path_buf(), names.len()));
            self.inner.resolve_sources(consumer, names)
        }
        fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> Result<(), VendorError> {
            self.inner.rewrite_dependency(path, old, new)
        }
        fn set_soname(&self, path: &Path, soname: &str) -> Result<(), VendorError> {
            self.inner.set_soname(path, soname)
        }
        fn set_search_path(&self, path: &Path, entries: &[String]) -> Result<(), VendorError> {
            self.inner.set_search_path(path, entries)
        }
    }

    #[test]
    fn requirements_resolved_in_one_batch_per_object() {
        let fx = Fixture::new();
        fx.system_lib("liba.so.1", &[]);
        fx.system_lib("libb.so.1", &[]);
        fx.system_lib("libc2.so.1", &[]);
        FakeObject::needing(&["liba.so.1", "libc.so.6", "libb.so.1", "libc2.so.1"])
            .write(&fx.tree.join("bin/python3"));

        let linkage = CountingLinkage {
            inner: fx.linkage(),
            calls: std::cell::RefCell::default(),
        };
        let nodes = scan(&fx.tree, &policy(), &linkage, ".libs").unwrap();

        assert_eq!(
            *linkage.calls.borrow(),
            vec![(fx.tree.join("bin/python3"), 3)]
        );
        let resolutions: Vec<_> = nodes[0].needed.iter().map(|d| &d.resolution).collect();
        assert_eq!(
            resolutions,
            vec![
                &Resolution::External(fx.system.join("liba.so.1")),
                &Resolution::Provided,
                &Resolution::External(fx.system.join("libb.so.1")),
                &Resolution::External(fx.system.join("libc2.so.1")),
            ]
        );
    }
}
