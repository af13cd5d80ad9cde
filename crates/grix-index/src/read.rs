//! Index file parsing.

use bstr::BString;
use grix_hash::{Hasher, Oid};
use grix_object::FileMode;

use crate::entry::{IndexEntry, EXTENDED_FLAG, NAME_MASK};
use crate::extensions::{
    parse_conflict_names, parse_reuc, RawExtension, TreeCache, NAME_SIG, REUC_SIG, TREE_SIG,
};
use crate::{Index, IndexError};

const SIGNATURE: &[u8; 4] = b"DIRC";
const HEADER_SIZE: usize = 12;
/// Stat data + OID + flags word.
const ENTRY_MIN_SIZE: usize = 62;

pub(crate) fn parse_index(data: &[u8]) -> Result<Index, IndexError> {
    if data.len() < HEADER_SIZE + Oid::RAW_SIZE {
        return Err(IndexError::InvalidHeader("file too short".into()));
    }

    verify_checksum(data)?;
    let content_end = data.len() - Oid::RAW_SIZE;

    if &data[0..4] != SIGNATURE {
        return Err(IndexError::InvalidHeader("bad DIRC signature".into()));
    }
    let version = read_u32(data, 4);
    if !(2..=3).contains(&version) {
        return Err(IndexError::UnsupportedVersion(version));
    }
    let entry_count = read_u32(data, 8) as usize;

    let mut entries = Vec::with_capacity(entry_count);
    let mut pos = HEADER_SIZE;
    for _ in 0..entry_count {
        let entry = parse_entry(data, &mut pos, version, content_end)?;
        entries.push(entry);
    }

    // Extensions run from the last entry to the checksum.
    let mut tree_cache = None;
    let mut reuc = Vec::new();
    let mut conflict_names = Vec::new();
    let mut unknown = Vec::new();

    while pos + 8 <= content_end {
        let sig = &data[pos..pos + 4];
        let size = read_u32(data, pos + 4) as usize;
        pos += 8;

        if pos + size > content_end {
            return Err(IndexError::InvalidExtension {
                sig: String::from_utf8_lossy(sig).into_owned(),
                reason: "payload runs past the end of the file".into(),
            });
        }
        let payload = &data[pos..pos + size];
        pos += size;

        match sig {
            _ if sig == TREE_SIG => tree_cache = Some(TreeCache::parse(payload)?),
            _ if sig == REUC_SIG => reuc = parse_reuc(payload)?,
            _ if sig == NAME_SIG => conflict_names = parse_conflict_names(payload)?,
            _ if sig[0].is_ascii_uppercase() => {
                // Optional extension from a newer writer; carry it through.
                let mut signature = [0u8; 4];
                signature.copy_from_slice(sig);
                unknown.push(RawExtension {
                    signature,
                    data: payload.to_vec(),
                });
            }
            _ => {
                return Err(IndexError::InvalidExtension {
                    sig: String::from_utf8_lossy(sig).into_owned(),
                    reason: "mandatory extension is not understood".into(),
                });
            }
        }
    }

    if pos != content_end {
        return Err(IndexError::InvalidHeader("trailing garbage".into()));
    }

    Ok(Index::from_parts(
        version,
        entries,
        tree_cache,
        reuc,
        conflict_names,
        unknown,
    ))
}

fn parse_entry(
    data: &[u8],
    pos: &mut usize,
    version: u32,
    content_end: usize,
) -> Result<IndexEntry, IndexError> {
    let start = *pos;
    let bad = |reason: &str| IndexError::InvalidEntry {
        offset: start,
        reason: reason.to_string(),
    };

    if start + ENTRY_MIN_SIZE > content_end {
        return Err(bad("entry extends past the end of the file"));
    }

    let flags = read_u16(data, start + 60);
    let extended = flags & EXTENDED_FLAG != 0;

    let mut flags_extended = 0;
    let path_start = if extended {
        if version < 3 {
            return Err(bad("extended flags in a version 2 index"));
        }
        if start + 64 > content_end {
            return Err(bad("truncated extended flags"));
        }
        flags_extended = read_u16(data, start + 62);
        start + 64
    } else {
        start + 62
    };

    // The flags word carries the path length; the 12-bit field saturates
    // and overflowing paths are measured by scanning for the NUL.
    let name_field = (flags & NAME_MASK) as usize;
    let path_len = if name_field < NAME_MASK as usize {
        name_field
    } else {
        let mut scan = path_start;
        loop {
            if scan >= content_end {
                return Err(bad("unterminated path"));
            }
            if data[scan] == 0 {
                break scan - path_start;
            }
            scan += 1;
        }
    };

    if path_start + path_len >= content_end {
        return Err(bad("path extends past the end of the file"));
    }
    let path = BString::from(&data[path_start..path_start + path_len]);
    if path.is_empty() {
        return Err(bad("empty path"));
    }

    // Entries are padded with NULs to the next 8-byte boundary, counting
    // from the entry start, with at least one terminating NUL.
    let entry_len = (path_start - start + path_len + 8) & !7;
    *pos = start + entry_len;
    if *pos > content_end {
        return Err(bad("padding extends past the end of the file"));
    }

    Ok(IndexEntry {
        ctime_secs: read_u32(data, start),
        ctime_nsecs: read_u32(data, start + 4),
        mtime_secs: read_u32(data, start + 8),
        mtime_nsecs: read_u32(data, start + 12),
        dev: read_u32(data, start + 16),
        ino: read_u32(data, start + 20),
        mode: FileMode::from_raw(read_u32(data, start + 24)),
        uid: read_u32(data, start + 28),
        gid: read_u32(data, start + 32),
        file_size: read_u32(data, start + 36),
        oid: Oid::from_bytes(&data[start + 40..start + 60]).expect("20 bytes"),
        flags,
        flags_extended,
        path,
    })
}

/// The last 20 bytes are the SHA-1 of everything before them.
fn verify_checksum(data: &[u8]) -> Result<(), IndexError> {
    let content = &data[..data.len() - Oid::RAW_SIZE];
    let stored = &data[data.len() - Oid::RAW_SIZE..];
    if Hasher::digest(content).as_bytes() != stored {
        return Err(IndexError::ChecksumMismatch);
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}
