//! Index extensions: `TREE`, `REUC`, `NAME`, plus opaque carry-through.
//!
//! Each extension is framed `<4-byte signature><4-byte big-endian size>`
//! followed by its payload. Optional extensions have uppercase-ASCII
//! signatures; anything else is unskippable and makes the file corrupt.

use bstr::{BStr, BString, ByteSlice};
use grix_hash::Oid;

use crate::IndexError;

pub const TREE_SIG: &[u8; 4] = b"TREE";
pub const REUC_SIG: &[u8; 4] = b"REUC";
pub const NAME_SIG: &[u8; 4] = b"NAME";

/// An extension this code does not interpret, kept for round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub signature: [u8; 4],
    pub data: Vec<u8>,
}

/// A node of the cached-tree extension.
///
/// Serialized as `<path>\0<entry_count> <subtree_count>\n` followed by the
/// tree OID when the count is non-negative; a count of `-1` marks the node
/// invalidated. Children follow in the flat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCache {
    /// Path component (empty at the root).
    pub name: BString,
    /// Entries covered by this node, or -1 when invalidated.
    pub entry_count: i64,
    pub oid: Option<Oid>,
    pub children: Vec<TreeCache>,
}

impl TreeCache {
    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        let mut pos = 0;
        let root = parse_tree_node(data, &mut pos)?;
        Ok(root)
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name);
        out.push(0);
        out.extend_from_slice(self.entry_count.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.children.len().to_string().as_bytes());
        out.push(b'\n');
        if self.entry_count >= 0 {
            if let Some(oid) = &self.oid {
                out.extend_from_slice(oid.as_bytes());
            }
        }
        for child in &self.children {
            child.serialize(out);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.entry_count >= 0
    }

    /// Invalidate every node along `path` (the whole spine from the root).
    pub fn invalidate(&mut self, path: &BStr) {
        self.entry_count = -1;
        self.oid = None;
        let Some((head, rest)) = split_path(path) else {
            return;
        };
        for child in &mut self.children {
            if child.name.as_slice() == head {
                child.invalidate(BStr::new(rest));
                return;
            }
        }
    }
}

fn split_path(path: &BStr) -> Option<(&[u8], &[u8])> {
    if path.is_empty() {
        return None;
    }
    match path.find_byte(b'/') {
        Some(at) => Some((&path[..at], &path[at + 1..])),
        None => Some((&path[..], &[][..])),
    }
}

fn parse_tree_node(data: &[u8], pos: &mut usize) -> Result<TreeCache, IndexError> {
    let bad = |reason: &str| IndexError::InvalidExtension {
        sig: "TREE".into(),
        reason: reason.to_string(),
    };

    let name_end = data[*pos..]
        .find_byte(0)
        .map(|p| p + *pos)
        .ok_or_else(|| bad("missing NUL after path"))?;
    let name = BString::from(&data[*pos..name_end]);
    *pos = name_end + 1;

    let count_end = data[*pos..]
        .find_byte(b' ')
        .map(|p| p + *pos)
        .ok_or_else(|| bad("missing entry count"))?;
    let entry_count: i64 = std::str::from_utf8(&data[*pos..count_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad("bad entry count"))?;
    *pos = count_end + 1;

    let subtrees_end = data[*pos..]
        .find_byte(b'\n')
        .map(|p| p + *pos)
        .ok_or_else(|| bad("missing subtree count"))?;
    let subtree_count: usize = std::str::from_utf8(&data[*pos..subtrees_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad("bad subtree count"))?;
    *pos = subtrees_end + 1;

    let oid = if entry_count >= 0 {
        let end = *pos + Oid::RAW_SIZE;
        if end > data.len() {
            return Err(bad("truncated tree OID"));
        }
        let oid = Oid::from_bytes(&data[*pos..end]).expect("20 bytes");
        *pos = end;
        Some(oid)
    } else {
        None
    };

    let mut children = Vec::with_capacity(subtree_count);
    for _ in 0..subtree_count {
        if *pos >= data.len() {
            return Err(bad("truncated subtree"));
        }
        children.push(parse_tree_node(data, pos)?);
    }

    Ok(TreeCache {
        name,
        entry_count,
        oid,
        children,
    })
}

/// One resolved-undo record: the three pre-resolution sides of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReucEntry {
    pub path: BString,
    /// Modes for stages 1..=3; zero means the stage was absent.
    pub modes: [u32; 3],
    pub oids: [Option<Oid>; 3],
}

/// Parse the REUC payload: per record, a NUL-terminated path, three
/// NUL-terminated ASCII octal modes, then one 20-byte OID per non-zero
/// mode.
pub fn parse_reuc(data: &[u8]) -> Result<Vec<ReucEntry>, IndexError> {
    let bad = |reason: &str| IndexError::InvalidExtension {
        sig: "REUC".into(),
        reason: reason.to_string(),
    };

    let mut out = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let path_end = data[pos..]
            .find_byte(0)
            .map(|p| p + pos)
            .ok_or_else(|| bad("missing NUL after path"))?;
        let path = BString::from(&data[pos..path_end]);
        pos = path_end + 1;

        let mut modes = [0u32; 3];
        for mode in &mut modes {
            let end = data[pos..]
                .find_byte(0)
                .map(|p| p + pos)
                .ok_or_else(|| bad("missing NUL after mode"))?;
            let text = std::str::from_utf8(&data[pos..end]).map_err(|_| bad("bad mode"))?;
            *mode = u32::from_str_radix(text, 8).map_err(|_| bad("bad octal mode"))?;
            pos = end + 1;
        }

        let mut oids = [None; 3];
        for (i, mode) in modes.iter().enumerate() {
            if *mode == 0 {
                continue;
            }
            let end = pos + Oid::RAW_SIZE;
            if end > data.len() {
                return Err(bad("truncated OID"));
            }
            oids[i] = Some(Oid::from_bytes(&data[pos..end]).expect("20 bytes"));
            pos = end;
        }

        out.push(ReucEntry { path, modes, oids });
    }
    Ok(out)
}

pub fn serialize_reuc(entries: &[ReucEntry], out: &mut Vec<u8>) {
    for entry in entries {
        out.extend_from_slice(&entry.path);
        out.push(0);
        for mode in entry.modes {
            out.extend_from_slice(format!("{mode:o}").as_bytes());
            out.push(0);
        }
        for (i, mode) in entry.modes.iter().enumerate() {
            if *mode != 0 {
                if let Some(oid) = &entry.oids[i] {
                    out.extend_from_slice(oid.as_bytes());
                }
            }
        }
    }
}

/// One conflict-name record: the pre-rename names of the three sides.
/// An empty side is stored as an empty string and read back as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictName {
    pub ancestor: Option<BString>,
    pub ours: Option<BString>,
    pub theirs: Option<BString>,
}

pub fn parse_conflict_names(data: &[u8]) -> Result<Vec<ConflictName>, IndexError> {
    let bad = || IndexError::InvalidExtension {
        sig: "NAME".into(),
        reason: "truncated record".into(),
    };

    let mut out = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let mut next = || -> Result<Option<BString>, IndexError> {
            let end = data[pos..].find_byte(0).map(|p| p + pos).ok_or_else(bad)?;
            let name = &data[pos..end];
            pos = end + 1;
            Ok(if name.is_empty() {
                None
            } else {
                Some(BString::from(name))
            })
        };

        let ancestor = next()?;
        let ours = next()?;
        let theirs = next()?;
        out.push(ConflictName {
            ancestor,
            ours,
            theirs,
        });
    }
    Ok(out)
}

pub fn serialize_conflict_names(names: &[ConflictName], out: &mut Vec<u8>) {
    for name in names {
        for side in [&name.ancestor, &name.ours, &name.theirs] {
            if let Some(side) = side {
                out.extend_from_slice(side);
            }
            out.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Oid {
        let mut raw = [0u8; 20];
        raw[19] = n;
        Oid::from_bytes(&raw).unwrap()
    }

    #[test]
    fn tree_cache_roundtrip() {
        let cache = TreeCache {
            name: BString::from(""),
            entry_count: 3,
            oid: Some(oid(1)),
            children: vec![TreeCache {
                name: BString::from("src"),
                entry_count: 2,
                oid: Some(oid(2)),
                children: vec![],
            }],
        };

        let mut bytes = Vec::new();
        cache.serialize(&mut bytes);
        let parsed = TreeCache::parse(&bytes).unwrap();
        assert_eq!(parsed, cache);
    }

    #[test]
    fn invalidated_tree_node_has_no_oid() {
        let bytes = b"\0-1 0\n".to_vec();
        let cache = TreeCache::parse(&bytes).unwrap();
        assert_eq!(cache.entry_count, -1);
        assert!(cache.oid.is_none());
        assert!(!cache.is_valid());
    }

    #[test]
    fn invalidate_walks_the_spine() {
        let mut cache = TreeCache {
            name: BString::from(""),
            entry_count: 5,
            oid: Some(oid(1)),
            children: vec![
                TreeCache {
                    name: BString::from("src"),
                    entry_count: 2,
                    oid: Some(oid(2)),
                    children: vec![],
                },
                TreeCache {
                    name: BString::from("docs"),
                    entry_count: 1,
                    oid: Some(oid(3)),
                    children: vec![],
                },
            ],
        };

        cache.invalidate(BStr::new("src/main.rs"));
        assert!(!cache.is_valid());
        assert!(!cache.children[0].is_valid());
        // Unrelated sibling keeps its snapshot.
        assert!(cache.children[1].is_valid());
    }

    #[test]
    fn reuc_roundtrip() {
        let entries = vec![ReucEntry {
            path: BString::from("conflicted.txt"),
            modes: [0o100644, 0o100644, 0],
            oids: [Some(oid(1)), Some(oid(2)), None],
        }];

        let mut bytes = Vec::new();
        serialize_reuc(&entries, &mut bytes);
        assert_eq!(parse_reuc(&bytes).unwrap(), entries);
    }

    #[test]
    fn reuc_zero_mode_has_no_oid_bytes() {
        // path, modes 0 0 100644, then exactly one OID.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"f\0");
        bytes.extend_from_slice(b"0\0");
        bytes.extend_from_slice(b"0\0");
        bytes.extend_from_slice(b"100644\0");
        bytes.extend_from_slice(oid(9).as_bytes());

        let entries = parse_reuc(&bytes).unwrap();
        assert_eq!(entries[0].modes, [0, 0, 0o100644]);
        assert_eq!(entries[0].oids, [None, None, Some(oid(9))]);
    }

    #[test]
    fn conflict_names_roundtrip() {
        let names = vec![
            ConflictName {
                ancestor: Some(BString::from("old.txt")),
                ours: Some(BString::from("ours.txt")),
                theirs: Some(BString::from("theirs.txt")),
            },
            ConflictName {
                ancestor: None,
                ours: Some(BString::from("added.txt")),
                theirs: None,
            },
        ];

        let mut bytes = Vec::new();
        serialize_conflict_names(&names, &mut bytes);
        assert_eq!(parse_conflict_names(&bytes).unwrap(), names);
    }
}
