//! Pack entry header decoding.
//!
//! Every pack entry starts with a type-and-size varint: the first byte
//! carries the type in bits 4..6 and the low four size bits; the
//! continuation bit extends the size seven bits at a time. Delta entries
//! follow with their base reference: `OFS_DELTA` a big-endian "shifted"
//! varint distance back to the base, `REF_DELTA` twenty raw OID bytes.

use grix_hash::Oid;
use grix_object::ObjectKind;

use crate::PackError;

/// Type codes of delta entries (whole objects use `ObjectKind` codes 1..=4).
pub const OFS_DELTA: u8 = 6;
pub const REF_DELTA: u8 = 7;

/// The decoded kind of a pack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Whole(ObjectKind),
    /// Base lies `base_offset` bytes into the same pack (already made
    /// absolute by the parser).
    OfsDelta { base_offset: u64 },
    /// Base is referenced by OID, looked up in the same pack.
    RefDelta { base: Oid },
}

impl EntryKind {
    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Whole(_))
    }
}

/// A parsed entry header.
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Decompressed size of the entry body (the delta stream for deltas).
    pub size: u64,
    /// Bytes consumed by the header including the delta base reference.
    pub header_len: usize,
}

/// Parse a pack entry header from `data`, which starts at the entry's
/// absolute offset `entry_offset` within the pack.
pub fn parse_entry_header(data: &[u8], entry_offset: u64) -> Result<EntryHeader, PackError> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset: entry_offset,
        reason: reason.to_string(),
    };

    let mut pos = 0;
    let mut byte = *data.first().ok_or_else(|| corrupt("empty entry"))?;
    pos += 1;

    let type_code = (byte >> 4) & 0x07;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4;

    while byte & 0x80 != 0 {
        byte = *data.get(pos).ok_or_else(|| corrupt("truncated size varint"))?;
        pos += 1;
        if shift > 57 {
            return Err(corrupt("size varint too long"));
        }
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }

    let kind = match type_code {
        code @ 1..=4 => EntryKind::Whole(
            ObjectKind::from_pack_code(code).expect("codes 1..=4 are object kinds"),
        ),
        OFS_DELTA => {
            let (distance, consumed) = parse_ofs_delta_offset(&data[pos..])
                .ok_or_else(|| corrupt("truncated ofs-delta offset"))?;
            pos += consumed;
            if distance == 0 || distance >= entry_offset {
                return Err(corrupt("ofs-delta base lies outside the pack"));
            }
            EntryKind::OfsDelta {
                base_offset: entry_offset - distance,
            }
        }
        REF_DELTA => {
            let end = pos + Oid::RAW_SIZE;
            if end > data.len() {
                return Err(corrupt("truncated ref-delta base"));
            }
            let base = Oid::from_bytes(&data[pos..end])
                .map_err(|_| corrupt("invalid ref-delta base"))?;
            pos = end;
            EntryKind::RefDelta { base }
        }
        other => return Err(corrupt(&format!("invalid entry type {other}"))),
    };

    Ok(EntryHeader {
        kind,
        size,
        header_len: pos,
    })
}

/// Decode the `OFS_DELTA` distance: big-endian base-128 where each
/// continuation adds one, so multi-byte encodings have no redundant forms.
fn parse_ofs_delta_offset(data: &[u8]) -> Option<(u64, usize)> {
    let mut pos = 0;
    let mut byte = *data.get(pos)?;
    pos += 1;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = *data.get(pos)?;
        pos += 1;
        value = value.checked_add(1)?;
        value = (value << 7) + u64::from(byte & 0x7f);
    }
    Some((value, pos))
}

/// Encode a type-and-size entry header (fixture construction and tests).
pub fn encode_entry_header(type_code: u8, size: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut s = size;
    let mut byte = (type_code << 4) | (s & 0x0f) as u8;
    s >>= 4;
    while s > 0 {
        buf.push(byte | 0x80);
        byte = (s & 0x7f) as u8;
        s >>= 7;
    }
    buf.push(byte);
    buf
}

/// Encode an `OFS_DELTA` distance.
pub fn encode_ofs_delta_offset(distance: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut d = distance;
    buf.push((d & 0x7f) as u8);
    d >>= 7;
    while d > 0 {
        d -= 1;
        buf.push(0x80 | (d & 0x7f) as u8);
        d >>= 7;
    }
    buf.reverse();
    buf
}
