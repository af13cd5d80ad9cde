//! Index file serialization.

use grix_hash::Hasher;

use crate::entry::IndexEntry;
use crate::extensions::{serialize_conflict_names, serialize_reuc, NAME_SIG, REUC_SIG, TREE_SIG};
use crate::entry::{EXTENDED_FLAG, NAME_MASK, STAGE_MASK};
use crate::Index;

pub(crate) fn serialize_index(index: &Index) -> Vec<u8> {
    // Extended flag words force version 3.
    let version = if index.entries().iter().any(|e| e.has_extended_flags()) {
        3
    } else {
        index.version().max(2)
    };

    let mut out = Vec::new();
    out.extend_from_slice(b"DIRC");
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&(index.len() as u32).to_be_bytes());

    for entry in index.entries() {
        write_entry(&mut out, entry);
    }

    if let Some(tree) = index.tree_cache() {
        let mut payload = Vec::new();
        tree.serialize(&mut payload);
        write_extension(&mut out, TREE_SIG, &payload);
    }
    if !index.reuc().is_empty() {
        let mut payload = Vec::new();
        serialize_reuc(index.reuc(), &mut payload);
        write_extension(&mut out, REUC_SIG, &payload);
    }
    if !index.conflict_names().is_empty() {
        let mut payload = Vec::new();
        serialize_conflict_names(index.conflict_names(), &mut payload);
        write_extension(&mut out, NAME_SIG, &payload);
    }
    for raw in index.unknown_extensions() {
        write_extension(&mut out, &raw.signature, &raw.data);
    }

    let checksum = Hasher::digest(&out);
    out.extend_from_slice(checksum.as_bytes());
    out
}

fn write_entry(out: &mut Vec<u8>, entry: &IndexEntry) {
    let start = out.len();

    for word in [
        entry.ctime_secs,
        entry.ctime_nsecs,
        entry.mtime_secs,
        entry.mtime_nsecs,
        entry.dev,
        entry.ino,
        entry.mode.raw(),
        entry.uid,
        entry.gid,
        entry.file_size,
    ] {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.extend_from_slice(entry.oid.as_bytes());

    // Recompute the length field; stage and high bits come from the entry.
    let flags =
        (entry.flags & (STAGE_MASK | EXTENDED_FLAG | crate::entry::VALID_FLAG))
            | (entry.name_length_field() & NAME_MASK);
    out.extend_from_slice(&flags.to_be_bytes());
    if entry.has_extended_flags() {
        out.extend_from_slice(&entry.flags_extended.to_be_bytes());
    }

    out.extend_from_slice(&entry.path);

    // NUL padding to an 8-byte boundary from the entry start, at least one.
    let entry_len = (out.len() - start + 8) & !7;
    out.resize(start + entry_len, 0);
}

fn write_extension(out: &mut Vec<u8>, sig: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(sig);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}
