//! Pack index (`.idx`) lookup.
//!
//! Version 1 has no magic: a 256-entry fan-out table followed by rows of
//! `(4-byte offset, 20-byte OID)`. Version 2 opens with `\377tOc`, keeps
//! the fan-out, then separate sorted-OID, CRC32, 31-bit-offset, and 64-bit
//! overflow tables. The last fan-out slot is the object count and both
//! trailers end with the pack checksum followed by the index checksum.

use std::path::{Path, PathBuf};

use grix_hash::Oid;
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE};

const FANOUT_ENTRIES: usize = 256;
const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;
const TRAILER_SIZE: usize = 40;

/// An opened, validated pack index.
pub struct PackIndex {
    data: Mmap,
    path: PathBuf,
    version: u32,
    num_objects: u32,
    /// Byte offset of the fan-out table.
    fanout_at: usize,
    /// Byte offset of the sorted OID table.
    oids_at: usize,
    /// Row stride of the OID table (24 in v1, 20 in v2).
    stride: usize,
}

impl PackIndex {
    /// Open and validate an index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };

        let corrupt = |reason: &str| PackError::CorruptIndex {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if data.len() < FANOUT_SIZE + TRAILER_SIZE {
            return Err(corrupt("file too small"));
        }

        let (version, fanout_at) = if data[0..4] == IDX_SIGNATURE {
            let version = read_u32(&data, 4);
            if version != 2 {
                return Err(PackError::UnsupportedIndexVersion(version));
            }
            (2, 8)
        } else {
            (1, 0)
        };

        if data.len() < fanout_at + FANOUT_SIZE + TRAILER_SIZE {
            return Err(corrupt("file too small for fan-out table"));
        }

        // The fan-out must be monotonic; its last slot is the object count.
        let mut prev = 0u32;
        for i in 0..FANOUT_ENTRIES {
            let n = read_u32(&data, fanout_at + i * 4);
            if n < prev {
                return Err(corrupt("non-monotonic fan-out table"));
            }
            prev = n;
        }
        let num_objects = prev;
        let n = num_objects as usize;

        let (oids_at, stride) = match version {
            1 => {
                let expected = FANOUT_SIZE + n * 24 + TRAILER_SIZE;
                if data.len() != expected {
                    return Err(corrupt("wrong v1 index size"));
                }
                // v1 rows are offset-then-OID; OID comparison starts 4 in.
                (FANOUT_SIZE + 4, 24)
            }
            _ => {
                let min = 8 + FANOUT_SIZE + n * 28 + TRAILER_SIZE;
                let max = min + n.saturating_sub(1) * 8;
                if data.len() < min || data.len() > max {
                    return Err(corrupt("wrong v2 index size"));
                }
                (8 + FANOUT_SIZE, 20)
            }
        };

        Ok(Self {
            data,
            path,
            version,
            num_objects,
            fanout_at,
            oids_at,
            stride,
        })
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One fan-out slot: the exclusive upper bound of entries whose OID
    /// starts with `byte` or less.
    pub fn fanout(&self, byte: u8) -> u32 {
        read_u32(&self.data, self.fanout_at + byte as usize * 4)
    }

    /// The OID stored at table position `pos`.
    pub fn oid_at(&self, pos: u32) -> Oid {
        let start = self.oids_at + pos as usize * self.stride;
        Oid::from_bytes(&self.data[start..start + Oid::RAW_SIZE])
            .expect("index rows hold 20-byte OIDs")
    }

    /// The pack offset of the entry at table position `pos`.
    pub fn offset_at(&self, pos: u32) -> u64 {
        let n = self.num_objects as usize;
        let pos = pos as usize;
        if self.version == 1 {
            // The 4 bytes preceding each v1 OID row.
            u64::from(read_u32(&self.data, self.oids_at - 4 + pos * 24))
        } else {
            let off32_at = self.oids_at + n * 24;
            let off = read_u32(&self.data, off32_at + pos * 4);
            if off & 0x8000_0000 == 0 {
                u64::from(off)
            } else {
                let idx64 = (off & 0x7fff_ffff) as usize;
                let off64_at = off32_at + n * 4 + idx64 * 8;
                (u64::from(read_u32(&self.data, off64_at)) << 32)
                    | u64::from(read_u32(&self.data, off64_at + 4))
            }
        }
    }

    /// The CRC32 of the entry's raw pack bytes (v2 only).
    pub fn crc32_at(&self, pos: u32) -> Option<u32> {
        if self.version != 2 {
            return None;
        }
        let crc_at = self.oids_at + self.num_objects as usize * 20;
        Some(read_u32(&self.data, crc_at + pos as usize * 4))
    }

    /// Table position of an exact OID, if present.
    pub fn position(&self, oid: &Oid) -> Option<u32> {
        let first = oid.first_byte();
        let mut high = self.fanout(first);
        let mut low = if first == 0 { 0 } else { self.fanout(first - 1) };
        let key = oid.as_bytes();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(key.as_slice()) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Does the raw on-disk entry (header plus compressed body) match the
    /// CRC32 recorded for it? `None` on v1 indexes, which carry no CRCs.
    pub fn entry_crc_matches(&self, pos: u32, raw_entry: &[u8]) -> Option<bool> {
        self.crc32_at(pos)
            .map(|stored| crc32fast::hash(raw_entry) == stored)
    }

    /// The pack checksum recorded in the index trailer.
    pub fn pack_checksum(&self) -> &[u8] {
        &self.data[self.data.len() - 40..self.data.len() - 20]
    }

    /// The index file's own trailing checksum.
    pub fn index_checksum(&self) -> &[u8] {
        &self.data[self.data.len() - 20..]
    }

    /// Resolve an OID or prefix to `(pack_offset, full_oid)`.
    ///
    /// Binary-searches the fan-out slice for `short`. A full 40-digit
    /// lookup requires an exact hit; a prefix lookup accepts the entry at
    /// the insertion point when it shares the prefix, and reports
    /// `Ambiguous` when the following entry shares it too.
    pub fn find_offset(&self, short: &Oid, nybbles: usize) -> Result<(u64, Oid), PackError> {
        let first = short.first_byte();
        let hi = self.fanout(first);
        let lo = if first == 0 { 0 } else { self.fanout(first - 1) };

        let key = short.as_bytes();
        let mut low = lo;
        let mut high = hi;
        let mut found: Option<u32> = None;

        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(key.as_slice()) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => {
                    found = Some(mid);
                    break;
                }
            }
        }

        // `low` is the insertion point when no exact (zero-padded) match
        // exists; a prefix may still match there.
        let pos = match found {
            Some(pos) => pos,
            None => {
                if nybbles == Oid::HEX_SIZE || low >= self.num_objects {
                    return Err(PackError::NotFound(*short));
                }
                if !self.oid_at(low).matches_prefix(short, nybbles) {
                    return Err(PackError::NotFound(*short));
                }
                low
            }
        };

        if nybbles < Oid::HEX_SIZE
            && pos + 1 < self.num_objects
            && self.oid_at(pos + 1).matches_prefix(short, nybbles)
        {
            return Err(PackError::Ambiguous(short.to_hex()[..nybbles].to_string()));
        }

        Ok((self.offset_at(pos), self.oid_at(pos)))
    }

    fn oid_bytes_at(&self, pos: u32) -> &[u8] {
        let start = self.oids_at + pos as usize * self.stride;
        &self.data[start..start + Oid::RAW_SIZE]
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
