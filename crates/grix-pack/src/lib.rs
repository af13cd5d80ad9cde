//! Packfile reading: `.idx` lookup, entry decoding, delta chains, and the
//! shared mmap window manager.
//!
//! A pack is the pair `name.idx` + `name.pack`. The index maps OIDs to byte
//! offsets through a 256-entry fan-out table and a sorted OID table; the
//! packfile stores zlib-deflated whole objects and `OFS_DELTA`/`REF_DELTA`
//! entries expressed against a base earlier in the same pack.

pub mod delta;
pub mod entry;
pub mod file;
pub mod index;
pub mod mwindow;

pub use delta::DeltaError;
pub use file::PackFile;
pub use index::PackIndex;
pub use mwindow::{WindowManager, WindowedFile};

use grix_hash::Oid;

/// Errors that can occur during pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("object not found in pack: {0}")]
    NotFound(Oid),

    #[error("pack prefix is ambiguous: {0}")]
    Ambiguous(String),

    #[error("corrupt pack index {path}: {reason}")]
    CorruptIndex { path: String, reason: String },

    #[error("unsupported pack index version: {0}")]
    UnsupportedIndexVersion(u32),

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("pack header invalid: {0}")]
    InvalidPackHeader(String),

    #[error("pack checksum does not match its index")]
    ChecksumMismatch,

    #[error("delta base not found in pack: {0}")]
    MissingBase(Oid),

    #[error("delta chain too deep at offset {0}")]
    ChainTooDeep(u64),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PackError {
    /// Lookup misses fall through to other packs or backends; everything
    /// else surfaces.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_HEADER_SIZE: usize = 12;

/// Pack index v2 magic: `\377tOc`.
pub const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];

/// Bail-out bound for delta chains (real chains are a few dozen deep).
pub const MAX_DELTA_CHAIN: usize = 512;
