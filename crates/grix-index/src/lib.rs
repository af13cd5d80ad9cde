//! The staged-tree file (`.git/index`, magic `DIRC`).
//!
//! Versions 2 and 3 are understood. Entries are kept sorted by path then
//! stage; stages 1/2/3 record the three sides of an unresolved merge.
//! Three extensions are decoded: `TREE` (cached tree), `REUC` (resolved
//! undo), and `NAME` (conflict name triples); other uppercase-signature
//! extensions are carried opaquely for round-trip.

pub mod entry;
pub mod extensions;
mod read;
mod write;

use std::cmp::Ordering;
use std::path::Path;

use bstr::BStr;

pub use entry::IndexEntry;
pub use extensions::{ConflictName, RawExtension, ReucEntry, TreeCache};

/// Errors from index-file operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid index header: {0}")]
    InvalidHeader(String),

    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("index checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid index entry at offset {offset}: {reason}")]
    InvalidEntry { offset: usize, reason: String },

    #[error("invalid index extension {sig}: {reason}")]
    InvalidExtension { sig: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The three sides of one conflicted path. Any side may be absent (e.g.
/// no ancestor for an add/add conflict).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConflict {
    pub ancestor: Option<IndexEntry>,
    pub ours: Option<IndexEntry>,
    pub theirs: Option<IndexEntry>,
}

impl IndexConflict {
    /// The conflicted path, taken from whichever side is present.
    pub fn path(&self) -> &BStr {
        self.ancestor
            .as_ref()
            .or(self.ours.as_ref())
            .or(self.theirs.as_ref())
            .map(|e| e.path.as_ref())
            .expect("a conflict has at least one side")
    }
}

/// An in-memory index.
pub struct Index {
    version: u32,
    /// Sorted by (path, stage); see [`Index::set_ignore_case`].
    entries: Vec<IndexEntry>,
    tree_cache: Option<TreeCache>,
    reuc: Vec<ReucEntry>,
    conflict_names: Vec<ConflictName>,
    /// Unknown optional extensions, preserved verbatim.
    unknown_extensions: Vec<RawExtension>,
    ignore_case: bool,
}

impl Index {
    /// A fresh, empty version-2 index.
    pub fn new() -> Self {
        Self {
            version: 2,
            entries: Vec::new(),
            tree_cache: None,
            reuc: Vec::new(),
            conflict_names: Vec::new(),
            unknown_extensions: Vec::new(),
            ignore_case: false,
        }
    }

    /// Read and verify an index file. A missing file is an empty index.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let file = match std::fs::File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(IndexError::Io(e)),
        };
        let data = unsafe { memmap2::Mmap::map(&file)? };
        Self::parse(&data)
    }

    /// Parse index bytes, verifying the trailing checksum.
    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        read::parse_index(data)
    }

    /// Serialize and write atomically (temp file + rename).
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();
        let bytes = self.serialize();
        let tmp = path.with_extension("lock");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Serialize to the on-disk format including the trailing checksum.
    pub fn serialize(&self) -> Vec<u8> {
        write::serialize_index(self)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Case handling for the sort order; re-sorts existing entries.
    pub fn set_ignore_case(&mut self, ignore_case: bool) {
        if self.ignore_case != ignore_case {
            self.ignore_case = ignore_case;
            let ic = ignore_case;
            self.entries.sort_by(|a, b| cmp_entries(a, b, ic));
        }
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Find the entry for `(path, stage)`.
    pub fn get(&self, path: &BStr, stage: u8) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| self.paths_equal(e.path.as_ref(), path) && e.stage() == stage)
    }

    /// Insert or replace the entry for its `(path, stage)` slot, keeping
    /// the sort order.
    pub fn add(&mut self, entry: IndexEntry) {
        let ic = self.ignore_case;
        self.entries
            .retain(|e| !(cmp_paths(e.path.as_ref(), entry.path.as_ref(), ic) == Ordering::Equal
                && e.stage() == entry.stage()));
        if let Some(ref mut tree) = self.tree_cache {
            tree.invalidate(entry.path.as_ref());
        }
        let at = self
            .entries
            .partition_point(|e| cmp_entries(e, &entry, ic) == Ordering::Less);
        self.entries.insert(at, entry);
    }

    /// Remove the entry for `(path, stage)`; true when something went.
    pub fn remove(&mut self, path: &BStr, stage: u8) -> bool {
        let before = self.entries.len();
        let ic = self.ignore_case;
        self.entries
            .retain(|e| !(cmp_paths(e.path.as_ref(), path, ic) == Ordering::Equal && e.stage() == stage));
        let removed = self.entries.len() < before;
        if removed {
            if let Some(ref mut tree) = self.tree_cache {
                tree.invalidate(path);
            }
        }
        removed
    }

    /// Any entry staged above zero means the index records a conflict.
    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage() > 0)
    }

    /// Group conflicted entries into per-path ancestor/ours/theirs records,
    /// in index order.
    pub fn conflicts(&self) -> Vec<IndexConflict> {
        let mut out: Vec<IndexConflict> = Vec::new();
        let mut current_path: Option<&BStr> = None;

        for entry in self.entries.iter().filter(|e| e.stage() > 0) {
            let path: &BStr = entry.path.as_ref();
            if current_path != Some(path) {
                out.push(IndexConflict {
                    ancestor: None,
                    ours: None,
                    theirs: None,
                });
                current_path = Some(path);
            }
            let conflict = out.last_mut().expect("pushed above");
            match entry.stage() {
                1 => conflict.ancestor = Some(entry.clone()),
                2 => conflict.ours = Some(entry.clone()),
                3 => conflict.theirs = Some(entry.clone()),
                _ => unreachable!("stage is two bits"),
            }
        }
        out
    }

    pub fn tree_cache(&self) -> Option<&TreeCache> {
        self.tree_cache.as_ref()
    }

    pub fn set_tree_cache(&mut self, cache: Option<TreeCache>) {
        self.tree_cache = cache;
    }

    pub fn reuc(&self) -> &[ReucEntry] {
        &self.reuc
    }

    /// Record the pre-resolution sides of a path (REUC extension).
    pub fn add_reuc(&mut self, entry: ReucEntry) {
        self.reuc.retain(|e| e.path != entry.path);
        self.reuc.push(entry);
        self.reuc.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn conflict_names(&self) -> &[ConflictName] {
        &self.conflict_names
    }

    /// Record a rename triple for a conflict (NAME extension).
    pub fn add_conflict_name(&mut self, name: ConflictName) {
        self.conflict_names.push(name);
    }

    fn paths_equal(&self, a: &BStr, b: &BStr) -> bool {
        cmp_paths(a, b, self.ignore_case) == Ordering::Equal
    }

    pub(crate) fn from_parts(
        version: u32,
        entries: Vec<IndexEntry>,
        tree_cache: Option<TreeCache>,
        reuc: Vec<ReucEntry>,
        conflict_names: Vec<ConflictName>,
        unknown_extensions: Vec<RawExtension>,
    ) -> Self {
        Self {
            version,
            entries,
            tree_cache,
            reuc,
            conflict_names,
            unknown_extensions,
            ignore_case: false,
        }
    }

    pub(crate) fn unknown_extensions(&self) -> &[RawExtension] {
        &self.unknown_extensions
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-wise path compare, case-folded when `ignore_case`.
fn cmp_paths(a: &BStr, b: &BStr, ignore_case: bool) -> Ordering {
    if ignore_case {
        let fold = |b: u8| b.to_ascii_lowercase();
        a.iter().map(|&c| fold(c)).cmp(b.iter().map(|&c| fold(c)))
    } else {
        a.cmp(b)
    }
}

/// Entry order: path, then stage.
fn cmp_entries(a: &IndexEntry, b: &IndexEntry, ignore_case: bool) -> Ordering {
    cmp_paths(a.path.as_ref(), b.path.as_ref(), ignore_case).then(a.stage().cmp(&b.stage()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use grix_hash::Oid;

    fn entry(path: &str, stage: u8) -> IndexEntry {
        let mut e = IndexEntry::new(
            BString::from(path),
            Oid::from_hex("1111111111111111111111111111111111111111").unwrap(),
            grix_object::FileMode::Regular,
        );
        e.set_stage(stage);
        e
    }

    #[test]
    fn add_keeps_sorted_order() {
        let mut index = Index::new();
        index.add(entry("zebra.txt", 0));
        index.add(entry("alpha.txt", 0));
        index.add(entry("middle.txt", 0));

        let paths: Vec<_> = index.entries().iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec!["alpha.txt", "middle.txt", "zebra.txt"]);
    }

    #[test]
    fn one_entry_per_path_and_stage() {
        let mut index = Index::new();
        index.add(entry("file.txt", 0));
        index.add(entry("file.txt", 0));
        assert_eq!(index.len(), 1);

        index.add(entry("file.txt", 1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn stages_sort_after_path() {
        let mut index = Index::new();
        index.add(entry("c.txt", 3));
        index.add(entry("c.txt", 1));
        index.add(entry("c.txt", 2));
        index.add(entry("a.txt", 0));

        let order: Vec<_> = index
            .entries()
            .iter()
            .map(|e| (e.path.to_string(), e.stage()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.txt".to_string(), 0),
                ("c.txt".to_string(), 1),
                ("c.txt".to_string(), 2),
                ("c.txt".to_string(), 3),
            ]
        );
    }

    #[test]
    fn conflict_grouping() {
        let mut index = Index::new();
        index.add(entry("both.txt", 1));
        index.add(entry("both.txt", 2));
        index.add(entry("both.txt", 3));
        index.add(entry("ours-only.txt", 2));
        index.add(entry("clean.txt", 0));

        assert!(index.has_conflicts());
        let conflicts = index.conflicts();
        assert_eq!(conflicts.len(), 2);

        let both = &conflicts[0];
        assert_eq!(both.path(), "both.txt");
        assert!(both.ancestor.is_some() && both.ours.is_some() && both.theirs.is_some());

        let ours_only = &conflicts[1];
        assert!(ours_only.ancestor.is_none());
        assert!(ours_only.ours.is_some());
        assert!(ours_only.theirs.is_none());
    }

    #[test]
    fn no_conflicts_in_clean_index() {
        let mut index = Index::new();
        index.add(entry("clean.txt", 0));
        assert!(!index.has_conflicts());
        assert!(index.conflicts().is_empty());
    }

    #[test]
    fn ignore_case_resorts() {
        let mut index = Index::new();
        index.add(entry("B.txt", 0));
        index.add(entry("a.txt", 0));
        // Byte order puts 'B' (0x42) before 'a' (0x61).
        assert_eq!(index.entries()[0].path, "B.txt");

        index.set_ignore_case(true);
        assert_eq!(index.entries()[0].path, "a.txt");
        assert!(index.get(bstr::BStr::new("b.TXT"), 0).is_some());
    }

    #[test]
    fn remove_entries() {
        let mut index = Index::new();
        index.add(entry("file.txt", 0));
        assert!(index.remove(bstr::BStr::new("file.txt"), 0));
        assert!(!index.remove(bstr::BStr::new("file.txt"), 0));
        assert!(index.is_empty());
    }
}
