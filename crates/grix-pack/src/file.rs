//! Reading objects out of a `.pack`/`.idx` pair.
//!
//! Lookup goes through the index; entry bodies are inflated out of mmap
//! windows, and delta entries are resolved by walking the dependency chain
//! to its whole-object leaf and applying each delta in reverse order.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use flate2::read::ZlibDecoder;
use grix_hash::Oid;
use grix_object::{ObjectKind, RawObject};

use crate::delta::{apply_delta, decode_header};
use crate::entry::{parse_entry_header, EntryHeader, EntryKind};
use crate::index::PackIndex;
use crate::mwindow::{WindowManager, WindowedFile};
use crate::{PackError, MAX_DELTA_CHAIN, PACK_HEADER_SIZE, PACK_SIGNATURE};

/// One pack on disk, lazily opened.
pub struct PackFile {
    /// Path without the `.idx`/`.pack` extension.
    base_name: PathBuf,
    pack_path: PathBuf,
    /// A `name.keep` marker protects the pack from repacking tools.
    keep: bool,
    manager: Arc<WindowManager>,
    index: RwLock<Option<Arc<PackIndex>>>,
    pack: RwLock<Option<Arc<WindowedFile>>>,
}

impl PackFile {
    /// Open a pack given the path of either of its files.
    ///
    /// The packfile must exist; the index is validated on first lookup and
    /// the packfile itself on first data access.
    pub fn open(path: impl AsRef<Path>, manager: Arc<WindowManager>) -> Result<Self, PackError> {
        let path = path.as_ref();
        let base_name = path.with_extension("");
        let pack_path = base_name.with_extension("pack");
        let keep = base_name.with_extension("keep").is_file();

        if !pack_path.is_file() {
            return Err(PackError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("packfile not found: {}", pack_path.display()),
            )));
        }

        Ok(Self {
            base_name,
            pack_path,
            keep,
            manager,
            index: RwLock::new(None),
            pack: RwLock::new(None),
        })
    }

    pub fn base_name(&self) -> &Path {
        &self.base_name
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    pub fn num_objects(&self) -> Result<u32, PackError> {
        Ok(self.index()?.num_objects())
    }

    pub fn index_version(&self) -> Result<u32, PackError> {
        Ok(self.index()?.version())
    }

    /// Resolve an OID or prefix to `(pack_offset, full_oid)`.
    pub fn find_offset(&self, short: &Oid, nybbles: usize) -> Result<(u64, Oid), PackError> {
        self.index()?.find_offset(short, nybbles)
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.find_offset(oid, Oid::HEX_SIZE).is_ok()
    }

    /// Read and fully resolve the object stored for `oid`.
    pub fn read(&self, oid: &Oid) -> Result<RawObject, PackError> {
        let (offset, _) = self.find_offset(oid, Oid::HEX_SIZE)?;
        self.unpack(offset)
    }

    /// Type and decompressed size of the object for `oid`, without
    /// reconstructing delta bodies.
    pub fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, u64), PackError> {
        let (offset, _) = self.find_offset(oid, Oid::HEX_SIZE)?;
        self.resolve_header(offset)
    }

    /// Decode the entry at `offset` down to its leaf type and final size.
    ///
    /// For a delta entry the reported size is the target size declared by
    /// the topmost delta's own header, not the base's.
    pub fn resolve_header(&self, offset: u64) -> Result<(ObjectKind, u64), PackError> {
        let header = self.entry_header_at(offset)?;

        let size = match header.kind {
            EntryKind::Whole(kind) => return Ok((kind, header.size)),
            _ => {
                let prefix =
                    self.inflate_prefix(offset + header.header_len as u64, 32)?;
                let (_, target_size, _) = decode_header(&prefix)?;
                target_size
            }
        };

        // Chase the chain to the leaf for the real object type.
        let mut current = header;
        let mut current_offset = offset;
        for _ in 0..MAX_DELTA_CHAIN {
            match current.kind {
                EntryKind::Whole(kind) => return Ok((kind, size)),
                EntryKind::OfsDelta { base_offset } => {
                    current_offset = base_offset;
                }
                EntryKind::RefDelta { base } => {
                    current_offset = self.local_base_offset(&base)?;
                }
            }
            current = self.entry_header_at(current_offset)?;
        }
        Err(PackError::ChainTooDeep(offset))
    }

    /// Reconstruct the object at `offset`, resolving any delta chain.
    pub fn unpack(&self, offset: u64) -> Result<RawObject, PackError> {
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut current_offset = offset;

        for _ in 0..MAX_DELTA_CHAIN {
            let header = self.entry_header_at(current_offset)?;
            let body_offset = current_offset + header.header_len as u64;

            match header.kind {
                EntryKind::Whole(kind) => {
                    let mut data = self.inflate_at(body_offset, header.size)?;
                    for delta in deltas.iter().rev() {
                        data = apply_delta(&data, delta)?;
                    }
                    return Ok(RawObject::new(kind, data));
                }
                EntryKind::OfsDelta { base_offset } => {
                    deltas.push(self.inflate_at(body_offset, header.size)?);
                    current_offset = base_offset;
                }
                EntryKind::RefDelta { base } => {
                    deltas.push(self.inflate_at(body_offset, header.size)?);
                    current_offset = self.local_base_offset(&base)?;
                }
            }
        }
        Err(PackError::ChainTooDeep(offset))
    }

    // --- Lazy state ---

    fn index(&self) -> Result<Arc<PackIndex>, PackError> {
        if let Some(index) = self.index.read().unwrap().as_ref() {
            return Ok(Arc::clone(index));
        }
        let mut slot = self.index.write().unwrap();
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(PackIndex::open(self.base_name.with_extension("idx"))?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Open the packfile on first data access, verifying its header and
    /// that its trailing checksum matches the index trailer.
    fn pack(&self) -> Result<Arc<WindowedFile>, PackError> {
        if let Some(pack) = self.pack.read().unwrap().as_ref() {
            return Ok(Arc::clone(pack));
        }
        let index = self.index()?;

        let mut slot = self.pack.write().unwrap();
        if let Some(pack) = slot.as_ref() {
            return Ok(Arc::clone(pack));
        }

        let wf = Arc::new(self.manager.open_file(&self.pack_path)?);
        if wf.len() < (PACK_HEADER_SIZE + Oid::RAW_SIZE) as u64 {
            return Err(PackError::InvalidPackHeader("packfile too small".into()));
        }

        let head = self.manager.open(&wf, 0, PACK_HEADER_SIZE)?;
        if &head[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidPackHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        if version != 2 && version != 3 {
            return Err(PackError::InvalidPackHeader(format!(
                "unsupported pack version {version}"
            )));
        }
        let entries = u32::from_be_bytes([head[8], head[9], head[10], head[11]]);
        if entries != index.num_objects() {
            return Err(PackError::InvalidPackHeader(format!(
                "pack has {entries} objects but index has {}",
                index.num_objects()
            )));
        }
        drop(head);

        let trailer = self.manager.open(&wf, wf.len() - Oid::RAW_SIZE as u64, 0)?;
        if &trailer[..Oid::RAW_SIZE] != index.pack_checksum() {
            return Err(PackError::ChecksumMismatch);
        }
        drop(trailer);

        *slot = Some(Arc::clone(&wf));
        Ok(wf)
    }

    // --- Windowed reads ---

    fn entry_header_at(&self, offset: u64) -> Result<EntryHeader, PackError> {
        let pack = self.pack()?;
        // Longest possible header: size varint + 20-byte ref-delta base.
        let view = self.manager.open(&pack, offset, 32)?;
        parse_entry_header(&view, offset)
    }

    /// A ref-delta base must live in the same pack.
    fn local_base_offset(&self, base: &Oid) -> Result<u64, PackError> {
        match self.find_offset(base, Oid::HEX_SIZE) {
            Ok((offset, _)) => Ok(offset),
            Err(PackError::NotFound(_)) => Err(PackError::MissingBase(*base)),
            Err(e) => Err(e),
        }
    }

    /// Inflate the zlib stream at `offset` to exactly `expected` bytes.
    fn inflate_at(&self, offset: u64, expected: u64) -> Result<Vec<u8>, PackError> {
        let pack = self.pack()?;
        let reader = WindowReader {
            manager: &self.manager,
            file: &pack,
            offset,
        };
        let mut decoder = ZlibDecoder::new(reader);
        let mut out = Vec::with_capacity(expected as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| PackError::CorruptEntry {
                offset,
                reason: format!("inflate failed: {e}"),
            })?;
        if out.len() as u64 != expected {
            return Err(PackError::CorruptEntry {
                offset,
                reason: format!("inflated {} bytes, expected {expected}", out.len()),
            });
        }
        Ok(out)
    }

    /// Inflate at most `limit` bytes from the stream at `offset` (enough
    /// for a delta header).
    fn inflate_prefix(&self, offset: u64, limit: usize) -> Result<Vec<u8>, PackError> {
        let pack = self.pack()?;
        let reader = WindowReader {
            manager: &self.manager,
            file: &pack,
            offset,
        };
        let mut decoder = ZlibDecoder::new(reader);
        let mut buf = vec![0u8; limit];
        let mut filled = 0;
        while filled < limit {
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| PackError::CorruptEntry {
                    offset,
                    reason: format!("inflate failed: {e}"),
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Sequential `Read` over a windowed file: each call pins the window
/// covering the cursor, copies out, and releases it.
struct WindowReader<'a> {
    manager: &'a WindowManager,
    file: &'a WindowedFile,
    offset: u64,
}

impl Read for WindowReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.offset >= self.file.len() {
            return Ok(0);
        }
        let view = self
            .manager
            .open(self.file, self.offset, 0)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let n = buf.len().min(view.len());
        buf[..n].copy_from_slice(&view[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::build_delta;
    use crate::entry::{encode_entry_header, encode_ofs_delta_offset, OFS_DELTA, REF_DELTA};
    use crate::IDX_SIGNATURE;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use grix_hash::Hasher;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// In-construction pack: collects entries and produces the final
    /// `.pack`/`.idx` pair.
    struct PackBuilder {
        data: Vec<u8>,
        count_at: usize,
        entries: Vec<(Oid, u64)>,
    }

    impl PackBuilder {
        fn new() -> Self {
            let mut data = Vec::new();
            data.extend_from_slice(PACK_SIGNATURE);
            data.extend_from_slice(&2u32.to_be_bytes());
            let count_at = data.len();
            data.extend_from_slice(&0u32.to_be_bytes());
            Self {
                data,
                count_at,
                entries: Vec::new(),
            }
        }

        fn add_whole(&mut self, kind: ObjectKind, body: &[u8]) -> (Oid, u64) {
            let offset = self.data.len() as u64;
            let oid = Hasher::hash_object(kind.as_str(), body);
            self.data
                .extend_from_slice(&encode_entry_header(kind.pack_code(), body.len() as u64));
            self.data.extend_from_slice(&deflate(body));
            self.entries.push((oid, offset));
            (oid, offset)
        }

        fn add_ofs_delta(&mut self, oid: Oid, base_offset: u64, delta: &[u8]) -> u64 {
            let offset = self.data.len() as u64;
            self.data
                .extend_from_slice(&encode_entry_header(OFS_DELTA, delta.len() as u64));
            self.data
                .extend_from_slice(&encode_ofs_delta_offset(offset - base_offset));
            self.data.extend_from_slice(&deflate(delta));
            self.entries.push((oid, offset));
            offset
        }

        fn add_ref_delta(&mut self, oid: Oid, base: &Oid, delta: &[u8]) -> u64 {
            let offset = self.data.len() as u64;
            self.data
                .extend_from_slice(&encode_entry_header(REF_DELTA, delta.len() as u64));
            self.data.extend_from_slice(base.as_bytes());
            self.data.extend_from_slice(&deflate(delta));
            self.entries.push((oid, offset));
            offset
        }

        fn finish(mut self, dir: &Path) -> PathBuf {
            let count = self.entries.len() as u32;
            self.data[self.count_at..self.count_at + 4]
                .copy_from_slice(&count.to_be_bytes());
            let checksum = Hasher::digest(&self.data);
            self.data.extend_from_slice(checksum.as_bytes());

            let pack_path = dir.join("test.pack");
            std::fs::write(&pack_path, &self.data).unwrap();

            // Matching v2 index.
            let mut sorted = self.entries.clone();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut idx = Vec::new();
            idx.extend_from_slice(&IDX_SIGNATURE);
            idx.extend_from_slice(&2u32.to_be_bytes());
            let mut fanout = [0u32; 256];
            for (oid, _) in &sorted {
                fanout[oid.first_byte() as usize] += 1;
            }
            for i in 1..256 {
                fanout[i] += fanout[i - 1];
            }
            for count in fanout {
                idx.extend_from_slice(&count.to_be_bytes());
            }
            for (oid, _) in &sorted {
                idx.extend_from_slice(oid.as_bytes());
            }
            for _ in &sorted {
                idx.extend_from_slice(&0u32.to_be_bytes());
            }
            for (_, offset) in &sorted {
                idx.extend_from_slice(&(*offset as u32).to_be_bytes());
            }
            idx.extend_from_slice(checksum.as_bytes());
            let idx_checksum = Hasher::digest(&idx);
            idx.extend_from_slice(idx_checksum.as_bytes());
            std::fs::write(dir.join("test.idx"), &idx).unwrap();

            pack_path
        }
    }

    fn manager() -> Arc<WindowManager> {
        WindowManager::new(64 * 1024, 1 << 20)
    }

    #[test]
    fn read_whole_objects() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new();
        let (blob_oid, _) = builder.add_whole(ObjectKind::Blob, b"pack me\n");
        let (tree_oid, _) = builder.add_whole(ObjectKind::Tree, b"");
        let pack_path = builder.finish(dir.path());

        let pack = PackFile::open(&pack_path, manager()).unwrap();
        assert_eq!(pack.num_objects().unwrap(), 2);
        assert_eq!(pack.index_version().unwrap(), 2);

        let obj = pack.read(&blob_oid).unwrap();
        assert_eq!(obj.kind, ObjectKind::Blob);
        assert_eq!(obj.data, b"pack me\n");
        assert_eq!(obj.compute_oid(), blob_oid);

        let (kind, size) = pack.read_header(&tree_oid).unwrap();
        assert_eq!(kind, ObjectKind::Tree);
        assert_eq!(size, 0);
    }

    #[test]
    fn missing_oid_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new();
        builder.add_whole(ObjectKind::Blob, b"only one\n");
        let pack_path = builder.finish(dir.path());

        let pack = PackFile::open(&pack_path, manager()).unwrap();
        let missing = Oid::from_hex("0000000000000000000000000000000000000123").unwrap();
        assert!(pack.read(&missing).unwrap_err().is_not_found());
        assert!(!pack.contains(&missing));
    }

    #[test]
    fn ofs_delta_chain() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"the quick brown fox\njumps over the lazy dog\n".to_vec();
        let mid: Vec<u8> = b"the quick brown fox\njumps over the lazy cat\n".to_vec();
        let tip: Vec<u8> = b"the quick brown fox\nleaps over the lazy cat\n".to_vec();

        let mut builder = PackBuilder::new();
        let (base_oid, base_offset) = builder.add_whole(ObjectKind::Blob, &base);

        let mid_oid = Hasher::hash_object("blob", &mid);
        let mid_offset =
            builder.add_ofs_delta(mid_oid, base_offset, &build_delta(&base, &mid, 0).unwrap());

        let tip_oid = Hasher::hash_object("blob", &tip);
        builder.add_ofs_delta(tip_oid, mid_offset, &build_delta(&mid, &tip, 0).unwrap());

        let pack_path = builder.finish(dir.path());
        let pack = PackFile::open(&pack_path, manager()).unwrap();

        assert_eq!(pack.read(&base_oid).unwrap().data, base);
        assert_eq!(pack.read(&mid_oid).unwrap().data, mid);
        let tip_obj = pack.read(&tip_oid).unwrap();
        assert_eq!(tip_obj.kind, ObjectKind::Blob);
        assert_eq!(tip_obj.data, tip);
    }

    #[test]
    fn ref_delta_resolves_within_the_pack() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"ref delta base content\n".to_vec();
        let target = b"ref delta target content\n".to_vec();

        let mut builder = PackBuilder::new();
        let (base_oid, _) = builder.add_whole(ObjectKind::Blob, &base);
        let target_oid = Hasher::hash_object("blob", &target);
        builder.add_ref_delta(target_oid, &base_oid, &build_delta(&base, &target, 0).unwrap());

        let pack_path = builder.finish(dir.path());
        let pack = PackFile::open(&pack_path, manager()).unwrap();
        assert_eq!(pack.read(&target_oid).unwrap().data, target);
    }

    #[test]
    fn ref_delta_with_foreign_base_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"never stored\n".to_vec();
        let target = b"never stored either\n".to_vec();

        let mut builder = PackBuilder::new();
        // A throwaway whole object keeps the pack non-degenerate.
        builder.add_whole(ObjectKind::Blob, b"filler\n");
        let foreign = Hasher::hash_object("blob", &base);
        let target_oid = Hasher::hash_object("blob", &target);
        builder.add_ref_delta(target_oid, &foreign, &build_delta(&base, &target, 0).unwrap());

        let pack_path = builder.finish(dir.path());
        let pack = PackFile::open(&pack_path, manager()).unwrap();
        assert!(matches!(
            pack.read(&target_oid),
            Err(PackError::MissingBase(oid)) if oid == foreign
        ));
    }

    #[test]
    fn resolve_header_reports_topmost_target_size() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"0123456789\n".repeat(30);
        let target = b"0123456789\n".repeat(3);

        let mut builder = PackBuilder::new();
        let (_, base_offset) = builder.add_whole(ObjectKind::Blob, &base);
        let target_oid = Hasher::hash_object("blob", &target);
        let delta_offset =
            builder.add_ofs_delta(target_oid, base_offset, &build_delta(&base, &target, 0).unwrap());

        let pack_path = builder.finish(dir.path());
        let pack = PackFile::open(&pack_path, manager()).unwrap();

        let (kind, size) = pack.resolve_header(delta_offset).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(size, target.len() as u64);
    }

    #[test]
    fn corrupt_trailer_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new();
        let (oid, _) = builder.add_whole(ObjectKind::Blob, b"to be corrupted\n");
        let pack_path = builder.finish(dir.path());

        // Flip a byte of the pack trailer so it no longer matches the index.
        let mut bytes = std::fs::read(&pack_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&pack_path, &bytes).unwrap();

        let pack = PackFile::open(&pack_path, manager()).unwrap();
        assert!(matches!(
            pack.read(&oid),
            Err(PackError::ChecksumMismatch)
        ));
    }

    #[test]
    fn keep_marker_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new();
        builder.add_whole(ObjectKind::Blob, b"kept\n");
        let pack_path = builder.finish(dir.path());
        std::fs::write(dir.path().join("test.keep"), b"").unwrap();

        let pack = PackFile::open(&pack_path, manager()).unwrap();
        assert!(pack.is_kept());
    }

    #[test]
    fn prefix_find_in_pack() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new();
        let (oid, offset) = builder.add_whole(ObjectKind::Blob, b"prefix target\n");
        let pack_path = builder.finish(dir.path());

        let pack = PackFile::open(&pack_path, manager()).unwrap();
        let (short, nybbles) = Oid::from_hex_prefix(&oid.to_hex()[..10]).unwrap();
        let (found_offset, found_oid) = pack.find_offset(&short, nybbles).unwrap();
        assert_eq!(found_offset, offset);
        assert_eq!(found_oid, oid);
    }
}
