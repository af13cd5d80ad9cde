//! Loose object storage: one object per file under `objects/XX/YY…`.
//!
//! Two on-disk framings are recognized on read: the standard form, the
//! whole of `"<type> <size>\0<body>"` zlib-deflated, and an alternate form
//! that stores a raw pack-style binary header followed by a zlib-deflated
//! body. The first two bytes decide: a valid zlib header means the
//! standard form.

mod read;
mod write;

use std::path::{Path, PathBuf};

use grix_hash::Oid;

/// Errors from loose object operations.
#[derive(Debug, thiserror::Error)]
pub enum LooseError {
    #[error("loose object not found: {0}")]
    NotFound(Oid),

    #[error("loose object prefix is ambiguous: {0}")]
    Ambiguous(String),

    #[error("corrupt loose object {oid}: {reason}")]
    Corrupt { oid: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Object(#[from] grix_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] grix_hash::HashError),
}

impl LooseError {
    /// Lookup misses let the object database fall through to the next
    /// backend; everything else surfaces.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Interface to one `objects/` directory of loose objects.
pub struct LooseBackend {
    objects_dir: PathBuf,
    compression: flate2::Compression,
}

impl LooseBackend {
    /// Open the loose store rooted at the given objects directory.
    ///
    /// Writes favor speed over density, matching the reference tools.
    pub fn open(objects_dir: impl AsRef<Path>) -> Self {
        Self {
            objects_dir: objects_dir.as_ref().to_path_buf(),
            compression: flate2::Compression::fast(),
        }
    }

    /// File path for a given OID.
    pub fn object_path(&self, oid: &Oid) -> PathBuf {
        self.objects_dir.join(oid.loose_path())
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// The directory listing is authoritative on every call; there is no
    /// cached state to invalidate.
    pub fn refresh(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_layout() {
        let store = LooseBackend::open("/tmp/objects");
        let oid = Oid::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert_eq!(
            store.object_path(&oid),
            PathBuf::from("/tmp/objects/da/39a3ee5e6b4b0d3255bfef95601890afd80709")
        );
    }
}
