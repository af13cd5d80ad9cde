//! The reference database facade.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use grix_hash::Oid;
use grix_utils::wildmatch::wildmatch;

use crate::loose::read_loose_ref;
use crate::packed::{PackedRefCache, PeelMode};
use crate::{RefError, RefName, Reference};

/// Symbolic chains longer than this fail by default.
const RESOLVE_DEPTH_DEFAULT: usize = 5;
/// Hard ceiling a caller-supplied depth is clamped to.
const RESOLVE_DEPTH_MAX: usize = 10;

/// Shorthand expansion patterns, tried in order.
const DWIM_PATTERNS: [&str; 6] = [
    "{}",
    "refs/{}",
    "refs/tags/{}",
    "refs/heads/{}",
    "refs/remotes/{}",
    "refs/remotes/{}/HEAD",
];

/// Loose refs plus the packed-refs cache for one git directory.
pub struct RefDb {
    git_dir: PathBuf,
    packed: PackedRefCache,
}

impl RefDb {
    pub fn open(git_dir: impl AsRef<Path>) -> Self {
        let git_dir = git_dir.as_ref().to_path_buf();
        let packed = PackedRefCache::new(&git_dir);
        Self { git_dir, packed }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Look up one reference by full name. The loose file wins over a
    /// packed entry of the same name.
    pub fn lookup(&self, name: &str) -> Result<Reference, RefError> {
        let name = RefName::new(name)?;
        self.lookup_name(&name)
    }

    fn lookup_name(&self, name: &RefName) -> Result<Reference, RefError> {
        if let Some(reference) = read_loose_ref(&self.git_dir, name)? {
            return Ok(reference);
        }
        if let Some(packed) = self.packed.find(name)? {
            return Ok(Reference::Direct {
                name: packed.name,
                target: packed.oid,
            });
        }
        Err(RefError::NotFound(name.to_string()))
    }

    /// Follow symbolic refs to a direct reference, with the default chain
    /// limit.
    pub fn resolve(&self, name: &str) -> Result<Reference, RefError> {
        self.resolve_with_depth(name, RESOLVE_DEPTH_DEFAULT)
    }

    /// Follow symbolic refs with a caller-chosen limit (clamped to 10).
    pub fn resolve_with_depth(&self, name: &str, max_depth: usize) -> Result<Reference, RefError> {
        let max_depth = max_depth.min(RESOLVE_DEPTH_MAX);
        let mut current = RefName::new(name)?;

        for _ in 0..=max_depth {
            match self.lookup_name(&current)? {
                direct @ Reference::Direct { .. } => return Ok(direct),
                Reference::Symbolic { target, .. } => current = target,
            }
        }
        Err(RefError::TooDeep(name.to_string()))
    }

    /// Resolve a name all the way to its OID.
    pub fn resolve_oid(&self, name: &str) -> Result<Oid, RefError> {
        Ok(self
            .resolve(name)?
            .target()
            .expect("resolve returns a direct reference"))
    }

    /// Expand a shorthand the way revision syntax does: verbatim, then
    /// under `refs/`, `refs/tags/`, `refs/heads/`, `refs/remotes/`, and
    /// finally `refs/remotes/<name>/HEAD`.
    pub fn dwim(&self, shorthand: &str) -> Result<Reference, RefError> {
        for pattern in DWIM_PATTERNS {
            let candidate = pattern.replace("{}", shorthand);
            let Ok(name) = RefName::new(&candidate) else {
                continue;
            };
            match self.lookup_name(&name) {
                Ok(reference) => return Ok(reference),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RefError::NotFound(shorthand.to_string()))
    }

    /// The peeled target recorded for a packed ref, when the file's traits
    /// make peel lines trustworthy.
    pub fn packed_peel(&self, name: &str) -> Result<Option<Oid>, RefError> {
        let name = RefName::new(name)?;
        if self.packed.peel_mode()? == PeelMode::None {
            return Ok(None);
        }
        Ok(self.packed.find(&name)?.and_then(|p| p.peeled))
    }

    /// Visit every reference under `refs/`: loose first (sorted walk),
    /// then packed entries not shadowed by a loose file.
    pub fn for_each<F>(&self, mut callback: F) -> Result<(), RefError>
    where
        F: FnMut(Reference) -> Result<(), RefError>,
    {
        self.for_each_filtered(None, &mut callback)
    }

    /// As [`RefDb::for_each`], limited to names matching a wildcard
    /// pattern.
    pub fn for_each_glob<F>(&self, pattern: &str, mut callback: F) -> Result<(), RefError>
    where
        F: FnMut(Reference) -> Result<(), RefError>,
    {
        self.for_each_filtered(Some(pattern), &mut callback)
    }

    fn for_each_filtered(
        &self,
        pattern: Option<&str>,
        callback: &mut dyn FnMut(Reference) -> Result<(), RefError>,
    ) -> Result<(), RefError> {
        let mut seen: HashSet<String> = HashSet::new();

        let mut loose_names = Vec::new();
        collect_loose_names(&self.git_dir, Path::new("refs"), &mut loose_names)?;
        loose_names.sort();

        for name_str in loose_names {
            if pattern.is_some_and(|p| !wildmatch(p, &name_str)) {
                continue;
            }
            let Ok(name) = RefName::new(&name_str) else {
                continue;
            };
            if let Some(reference) = read_loose_ref(&self.git_dir, &name)? {
                seen.insert(name_str);
                callback(reference)?;
            }
        }

        for packed in self.packed.all()? {
            if seen.contains(packed.name.as_str()) {
                continue;
            }
            if pattern.is_some_and(|p| !wildmatch(p, packed.name.as_str())) {
                continue;
            }
            callback(Reference::Direct {
                name: packed.name,
                target: packed.oid,
            })?;
        }

        Ok(())
    }
}

/// Walk the loose refs tree depth-first, accumulating slash-joined names.
fn collect_loose_names(
    git_dir: &Path,
    relative: &Path,
    out: &mut Vec<String>,
) -> Result<(), RefError> {
    let dir = git_dir.join(relative);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RefError::Io(e)),
    };

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') || file_name.ends_with(".lock") {
            continue;
        }
        let child = relative.join(file_name);
        if entry.file_type()?.is_dir() {
            collect_loose_names(git_dir, &child, out)?;
        } else {
            // refs paths use '/' regardless of platform.
            out.push(child.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
