//! The packed-refs cache.
//!
//! `packed-refs` is a text file of `<hex-oid> <refname>` lines, each
//! optionally followed by `^<hex-oid>` giving the peeled target of an
//! annotated tag. A traits header advertises how peel lines were
//! produced. The cache is invalidated by file mtime under a
//! reader/writer lock.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use bstr::ByteSlice;
use grix_hash::Oid;

use crate::{RefError, RefName};

const TRAITS_HEADER: &str = "# pack-refs with:";

/// How far the producer peeled tags when writing the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeelMode {
    /// No traits header: peel lines may be missing.
    #[default]
    None,
    /// `peeled`: annotated tags under `refs/` carry peel lines.
    Peeled,
    /// `fully-peeled`: every ref that peels differently carries one.
    FullyPeeled,
}

/// One parsed packed-refs entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: RefName,
    pub oid: Oid,
    pub peeled: Option<Oid>,
}

#[derive(Default)]
struct CacheState {
    loaded: bool,
    mtime: Option<SystemTime>,
    peel_mode: PeelMode,
    /// Sorted by name for binary search.
    refs: Vec<PackedRef>,
}

/// Stat-invalidated cache over one packed-refs file.
pub(crate) struct PackedRefCache {
    path: PathBuf,
    state: RwLock<CacheState>,
}

impl PackedRefCache {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            path: git_dir.join("packed-refs"),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Re-parse the file when its mtime has advanced (or on first use).
    pub fn reload_if_changed(&self) -> Result<(), RefError> {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        {
            let state = self.state.read().unwrap();
            if state.loaded && state.mtime == mtime {
                return Ok(());
            }
        }

        let mut state = self.state.write().unwrap();
        if state.loaded && state.mtime == mtime {
            return Ok(());
        }

        match std::fs::read(&self.path) {
            Ok(data) => {
                let (refs, peel_mode) = parse(&data)?;
                state.refs = refs;
                state.peel_mode = peel_mode;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                state.refs.clear();
                state.peel_mode = PeelMode::None;
            }
            Err(e) => return Err(RefError::Io(e)),
        }
        state.mtime = mtime;
        state.loaded = true;
        Ok(())
    }

    pub fn find(&self, name: &RefName) -> Result<Option<PackedRef>, RefError> {
        self.reload_if_changed()?;
        let state = self.state.read().unwrap();
        Ok(state
            .refs
            .binary_search_by(|r| r.name.cmp(name))
            .ok()
            .map(|i| state.refs[i].clone()))
    }

    /// Snapshot of all packed refs, sorted by name.
    pub fn all(&self) -> Result<Vec<PackedRef>, RefError> {
        self.reload_if_changed()?;
        Ok(self.state.read().unwrap().refs.clone())
    }

    pub fn peel_mode(&self) -> Result<PeelMode, RefError> {
        self.reload_if_changed()?;
        Ok(self.state.read().unwrap().peel_mode)
    }
}

fn parse(data: &[u8]) -> Result<(Vec<PackedRef>, PeelMode), RefError> {
    let mut refs: Vec<PackedRef> = Vec::new();
    let mut peel_mode = PeelMode::None;

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }

        if line.starts_with(b"#") {
            if let Ok(text) = std::str::from_utf8(line) {
                if text.starts_with(TRAITS_HEADER) {
                    if text.contains("fully-peeled") {
                        peel_mode = PeelMode::FullyPeeled;
                    } else if text.contains("peeled") {
                        peel_mode = PeelMode::Peeled;
                    }
                }
            }
            continue;
        }

        if let Some(peeled_hex) = line.strip_prefix(b"^") {
            let hex = std::str::from_utf8(peeled_hex.trim()).map_err(|_| RefError::Parse {
                name: "packed-refs".into(),
                reason: "peel line is not UTF-8".into(),
            })?;
            let peeled = Oid::from_hex(hex)?;
            match refs.last_mut() {
                Some(last) => last.peeled = Some(peeled),
                None => {
                    return Err(RefError::Parse {
                        name: "packed-refs".into(),
                        reason: "peel line before any ref".into(),
                    });
                }
            }
            continue;
        }

        let space = line.find_byte(b' ').ok_or_else(|| RefError::Parse {
            name: "packed-refs".into(),
            reason: "missing separator".into(),
        })?;
        let hex = std::str::from_utf8(&line[..space]).map_err(|_| RefError::Parse {
            name: "packed-refs".into(),
            reason: "OID is not UTF-8".into(),
        })?;
        let oid = Oid::from_hex(hex)?;
        let name_str =
            std::str::from_utf8(line[space + 1..].trim()).map_err(|_| RefError::Parse {
                name: "packed-refs".into(),
                reason: "refname is not UTF-8".into(),
            })?;

        refs.push(PackedRef {
            name: RefName::new(name_str)?,
            oid,
            peeled: None,
        });
    }

    refs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((refs, peel_mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const OID_C: &str = "cccccccccccccccccccccccccccccccccccccccc";

    #[test]
    fn parse_plain_lines() {
        let data = format!("{OID_A} refs/heads/main\n{OID_B} refs/tags/v1\n");
        let (refs, mode) = parse(data.as_bytes()).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(mode, PeelMode::None);
        assert_eq!(refs[0].name.as_str(), "refs/heads/main");
    }

    #[test]
    fn parse_traits_and_peel() {
        let data = format!(
            "# pack-refs with: peeled fully-peeled \n{OID_A} refs/tags/v1\n^{OID_C}\n{OID_B} refs/heads/main\n"
        );
        let (refs, mode) = parse(data.as_bytes()).unwrap();
        assert_eq!(mode, PeelMode::FullyPeeled);

        let tag = refs.iter().find(|r| r.name.as_str() == "refs/tags/v1").unwrap();
        assert_eq!(tag.peeled.unwrap().to_hex(), OID_C);
        let head = refs.iter().find(|r| r.name.as_str() == "refs/heads/main").unwrap();
        assert!(head.peeled.is_none());
    }

    #[test]
    fn peeled_only_trait() {
        let data = format!("# pack-refs with: peeled \n{OID_A} refs/tags/v1\n");
        let (_, mode) = parse(data.as_bytes()).unwrap();
        assert_eq!(mode, PeelMode::Peeled);
    }

    #[test]
    fn cache_reloads_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PackedRefCache::new(dir.path());

        // No file yet.
        let name = RefName::new("refs/heads/main").unwrap();
        assert!(cache.find(&name).unwrap().is_none());

        let path = dir.path().join("packed-refs");
        std::fs::write(&path, format!("{OID_A} refs/heads/main\n")).unwrap();
        // Push the mtime clearly past the cached value.
        let later = SystemTime::now() + std::time::Duration::from_secs(10);
        let file = std::fs::File::options().append(true).open(&path).unwrap();
        file.set_modified(later).unwrap();

        let found = cache.find(&name).unwrap().unwrap();
        assert_eq!(found.oid.to_hex(), OID_A);
    }

    #[test]
    fn dangling_peel_line_is_an_error() {
        assert!(parse(format!("^{OID_A}\n").as_bytes()).is_err());
    }
}
