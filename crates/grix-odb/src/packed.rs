//! The packed backend: every `objects/pack/*.idx` pack, consulted through
//! a most-recently-hit pack hint.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use grix_hash::Oid;
use grix_object::{ObjectKind, RawObject};
use grix_pack::{PackError, PackFile, WindowManager};

use crate::{Backend, OdbError};

pub struct PackedBackend {
    pack_dir: PathBuf,
    manager: Arc<WindowManager>,
    packs: RwLock<Vec<Arc<PackFile>>>,
    /// The pack that answered the previous lookup; tried first.
    last_found: Mutex<Option<Arc<PackFile>>>,
}

impl PackedBackend {
    /// Open the backend over `objects/pack/`. A missing directory is an
    /// empty backend; packs appear on the next refresh after creation.
    pub fn open(objects_dir: impl AsRef<Path>, manager: Arc<WindowManager>) -> Self {
        let backend = Self {
            pack_dir: objects_dir.as_ref().join("pack"),
            manager,
            packs: RwLock::new(Vec::new()),
            last_found: Mutex::new(None),
        };
        let _ = backend.rescan();
        backend
    }

    /// Rescan the pack directory, opening indexes not yet known.
    fn rescan(&self) -> Result<(), OdbError> {
        let entries = match std::fs::read_dir(&self.pack_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OdbError::Io(e)),
        };

        let mut packs = self.packs.write().unwrap();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "idx") {
                continue;
            }
            let base_name = path.with_extension("");
            if packs.iter().any(|p| p.base_name() == base_name) {
                continue;
            }
            if let Ok(pack) = PackFile::open(&path, Arc::clone(&self.manager)) {
                packs.push(Arc::new(pack));
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<PackFile>> {
        self.packs.read().unwrap().clone()
    }

    /// Locate a full OID, trying the hinted pack first.
    fn find_entry(&self, oid: &Oid) -> Result<(Arc<PackFile>, u64), OdbError> {
        let hint = self.last_found.lock().unwrap().clone();
        if let Some(pack) = &hint {
            match pack.find_offset(oid, Oid::HEX_SIZE) {
                Ok((offset, _)) => return Ok((Arc::clone(pack), offset)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(OdbError::Pack(e)),
            }
        }

        for pack in self.snapshot() {
            if hint.as_ref().is_some_and(|h| Arc::ptr_eq(h, &pack)) {
                continue;
            }
            match pack.find_offset(oid, Oid::HEX_SIZE) {
                Ok((offset, _)) => {
                    *self.last_found.lock().unwrap() = Some(Arc::clone(&pack));
                    return Ok((pack, offset));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(OdbError::Pack(e)),
            }
        }
        Err(OdbError::NotFound(*oid))
    }

    /// A miss gets one directory rescan and a second chance: a new pack
    /// may have appeared since this backend was opened.
    fn find_entry_with_refresh(&self, oid: &Oid) -> Result<(Arc<PackFile>, u64), OdbError> {
        match self.find_entry(oid) {
            Err(e) if e.is_not_found() => {
                self.rescan()?;
                self.find_entry(oid)
            }
            other => other,
        }
    }

    /// Prefix search across *every* pack: a prefix resolving to two
    /// different OIDs — in one pack or across packs — is ambiguous.
    fn find_prefix(&self, short: &Oid, nybbles: usize) -> Result<(Arc<PackFile>, u64, Oid), OdbError> {
        let mut found: Option<(Arc<PackFile>, u64, Oid)> = None;
        for pack in self.snapshot() {
            match pack.find_offset(short, nybbles) {
                Ok((offset, oid)) => match &found {
                    Some((_, _, prev)) if *prev != oid => {
                        return Err(OdbError::Ambiguous(
                            short.to_hex()[..nybbles].to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => found = Some((pack, offset, oid)),
                },
                Err(PackError::Ambiguous(prefix)) => return Err(OdbError::Ambiguous(prefix)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(OdbError::Pack(e)),
            }
        }
        found.ok_or(OdbError::NotFound(*short))
    }

    fn find_prefix_with_refresh(
        &self,
        short: &Oid,
        nybbles: usize,
    ) -> Result<(Arc<PackFile>, u64, Oid), OdbError> {
        match self.find_prefix(short, nybbles) {
            Err(e) if e.is_not_found() => {
                self.rescan()?;
                self.find_prefix(short, nybbles)
            }
            other => other,
        }
    }
}

impl Backend for PackedBackend {
    fn read(&self, oid: &Oid) -> Result<RawObject, OdbError> {
        let (pack, offset) = self.find_entry_with_refresh(oid)?;
        Ok(pack.unpack(offset)?)
    }

    fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, u64), OdbError> {
        let (pack, offset) = self.find_entry_with_refresh(oid)?;
        Ok(pack.resolve_header(offset)?)
    }

    fn exists(&self, oid: &Oid) -> bool {
        self.find_entry_with_refresh(oid).is_ok()
    }

    fn exists_prefix(&self, short: &Oid, nybbles: usize) -> Result<Oid, OdbError> {
        let (_, _, oid) = self.find_prefix_with_refresh(short, nybbles)?;
        Ok(oid)
    }

    fn refresh(&self) -> Result<(), OdbError> {
        self.rescan()
    }
}
