//! Unified object database.
//!
//! An `Odb` is an ordered list of backends — loose files at priority 1,
//! packed storage at priority 2, plus read-only alternates — consulted in
//! priority order. A backend miss falls through to the next backend; any
//! other failure surfaces immediately.

mod alternates;
mod backend;
mod packed;

pub use backend::Backend;
pub use packed::PackedBackend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grix_hash::{Hasher, Oid};
use grix_loose::LooseBackend;
use grix_object::{ObjectKind, RawObject};
use grix_pack::WindowManager;

/// Backend priority of loose storage.
pub const LOOSE_PRIORITY: i32 = 1;
/// Backend priority of packed storage (higher sorts later).
pub const PACKED_PRIORITY: i32 = 2;

/// Errors from object database operations.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(Oid),

    #[error("ambiguous object prefix: {0}")]
    Ambiguous(String),

    #[error("backend is read-only")]
    ReadOnly,

    #[error("alternates chain deeper than {0} levels")]
    AlternatesTooDeep(usize),

    #[error(transparent)]
    Loose(#[from] grix_loose::LooseError),

    #[error(transparent)]
    Pack(#[from] grix_pack::PackError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OdbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

struct BackendSlot {
    priority: i32,
    alternate: bool,
    backend: Box<dyn Backend>,
}

/// The object database facade.
pub struct Odb {
    objects_dir: PathBuf,
    backends: Vec<BackendSlot>,
}

impl Odb {
    /// Open the database at an `objects/` directory with the process-global
    /// window manager.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<Self, OdbError> {
        Self::open_with_manager(objects_dir, WindowManager::global())
    }

    /// Open with an explicit window manager (isolated caches for tests and
    /// embedders).
    pub fn open_with_manager(
        objects_dir: impl AsRef<Path>,
        manager: Arc<WindowManager>,
    ) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        if !objects_dir.is_dir() {
            return Err(OdbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("objects directory not found: {}", objects_dir.display()),
            )));
        }

        let mut odb = Self {
            objects_dir: objects_dir.clone(),
            backends: Vec::new(),
        };
        odb.add_dir_backends(&objects_dir, false, &manager);
        alternates::load(&mut odb, &objects_dir, 0, &manager)?;
        Ok(odb)
    }

    /// Register the loose and packed backends for one objects directory.
    fn add_dir_backends(&mut self, dir: &Path, alternate: bool, manager: &Arc<WindowManager>) {
        self.add_backend(
            Box::new(LooseBackend::open(dir)),
            LOOSE_PRIORITY,
            alternate,
        );
        self.add_backend(
            Box::new(PackedBackend::open(dir, Arc::clone(manager))),
            PACKED_PRIORITY,
            alternate,
        );
    }

    /// Insert a backend keeping the list sorted ascending by priority;
    /// equal priorities keep insertion order.
    pub fn add_backend(&mut self, backend: Box<dyn Backend>, priority: i32, alternate: bool) {
        let slot = BackendSlot {
            priority,
            alternate,
            backend,
        };
        let at = self
            .backends
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(self.backends.len());
        self.backends.insert(at, slot);
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Does any backend hold this object?
    pub fn exists(&self, oid: &Oid) -> bool {
        self.backends.iter().any(|s| s.backend.exists(oid))
    }

    /// Resolve a prefix across every backend.
    ///
    /// Two backends answering with different OIDs is `Ambiguous`, as is an
    /// ambiguity within a single backend.
    pub fn exists_prefix(&self, short: &Oid, nybbles: usize) -> Result<Oid, OdbError> {
        let mut found: Option<Oid> = None;
        for slot in &self.backends {
            match slot.backend.exists_prefix(short, nybbles) {
                Ok(oid) => match found {
                    Some(prev) if prev != oid => {
                        return Err(OdbError::Ambiguous(
                            short.to_hex()[..nybbles].to_string(),
                        ));
                    }
                    _ => found = Some(oid),
                },
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        found.ok_or(OdbError::NotFound(*short))
    }

    /// Read an object, trying backends in priority order.
    pub fn read(&self, oid: &Oid) -> Result<RawObject, OdbError> {
        for slot in &self.backends {
            match slot.backend.read(oid) {
                Ok(obj) => return Ok(obj),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(OdbError::NotFound(*oid))
    }

    /// Read the object matching a prefix; ambiguity rules as
    /// [`Odb::exists_prefix`].
    pub fn read_prefix(&self, short: &Oid, nybbles: usize) -> Result<(Oid, RawObject), OdbError> {
        let oid = self.exists_prefix(short, nybbles)?;
        let obj = self.read(&oid)?;
        Ok((oid, obj))
    }

    /// Read only an object's type and size.
    pub fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, u64), OdbError> {
        for slot in &self.backends {
            match slot.backend.read_header(oid) {
                Ok(header) => return Ok(header),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(OdbError::NotFound(*oid))
    }

    /// Store an object, returning its address. Alternates never receive
    /// writes.
    pub fn write(&self, kind: ObjectKind, body: &[u8]) -> Result<Oid, OdbError> {
        for slot in self.backends.iter().filter(|s| !s.alternate) {
            match slot.backend.write(kind, body) {
                Ok(oid) => return Ok(oid),
                Err(OdbError::ReadOnly) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(OdbError::ReadOnly)
    }

    /// Compute an object's address without storing it.
    pub fn hash(kind: ObjectKind, body: &[u8]) -> Oid {
        Hasher::hash_object(kind.as_str(), body)
    }

    /// Ask every backend to pick up on-disk changes (new packs, etc.).
    pub fn refresh(&self) -> Result<(), OdbError> {
        for slot in &self.backends {
            slot.backend.refresh()?;
        }
        Ok(())
    }
}
