//! The pluggable backend trait and its loose-storage implementation.

use grix_hash::Oid;
use grix_loose::{LooseBackend, LooseError};
use grix_object::{ObjectKind, RawObject};

use crate::OdbError;

/// One source of objects consulted by the [`crate::Odb`] facade.
///
/// A miss is reported as `OdbError::NotFound` so the facade can fall
/// through; write support is optional.
pub trait Backend: Send + Sync {
    fn read(&self, oid: &Oid) -> Result<RawObject, OdbError>;

    fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, u64), OdbError>;

    fn exists(&self, oid: &Oid) -> bool;

    fn exists_prefix(&self, short: &Oid, nybbles: usize) -> Result<Oid, OdbError>;

    fn write(&self, _kind: ObjectKind, _body: &[u8]) -> Result<Oid, OdbError> {
        Err(OdbError::ReadOnly)
    }

    fn refresh(&self) -> Result<(), OdbError> {
        Ok(())
    }
}

fn map_loose(e: LooseError) -> OdbError {
    match e {
        LooseError::NotFound(oid) => OdbError::NotFound(oid),
        LooseError::Ambiguous(prefix) => OdbError::Ambiguous(prefix),
        other => OdbError::Loose(other),
    }
}

impl Backend for LooseBackend {
    fn read(&self, oid: &Oid) -> Result<RawObject, OdbError> {
        LooseBackend::read(self, oid).map_err(map_loose)
    }

    fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, u64), OdbError> {
        let (kind, size) = LooseBackend::read_header(self, oid).map_err(map_loose)?;
        Ok((kind, size as u64))
    }

    fn exists(&self, oid: &Oid) -> bool {
        LooseBackend::exists(self, oid)
    }

    fn exists_prefix(&self, short: &Oid, nybbles: usize) -> Result<Oid, OdbError> {
        LooseBackend::exists_prefix(self, short, nybbles).map_err(map_loose)
    }

    fn write(&self, kind: ObjectKind, body: &[u8]) -> Result<Oid, OdbError> {
        LooseBackend::write(self, kind, body).map_err(map_loose)
    }

    fn refresh(&self) -> Result<(), OdbError> {
        LooseBackend::refresh(self);
        Ok(())
    }
}
