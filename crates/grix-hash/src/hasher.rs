//! SHA-1 hashing of object content.
//!
//! Every object is addressed by the SHA-1 of `"<type> <decimal length>\0"`
//! followed by its body. `hash(record) == oid` holds for every record read
//! from or written to the object database.

use sha1::{Digest, Sha1};

use crate::Oid;

/// Incremental SHA-1 hasher producing an [`Oid`].
pub struct Hasher {
    inner: Sha1,
}

impl Hasher {
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and produce the digest.
    pub fn finalize(self) -> Oid {
        let digest = self.inner.finalize();
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&digest);
        Oid::from_bytes(&raw).expect("sha1 digest is 20 bytes")
    }

    /// One-shot digest of a byte buffer.
    pub fn digest(data: &[u8]) -> Oid {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Compute the content address of an object: SHA-1 over the frame
    /// `"<kind> <len>\0"` followed by `body`.
    pub fn hash_object(kind: &str, body: &[u8]) -> Oid {
        let mut hasher = Self::new();
        hasher.update(kind.as_bytes());
        hasher.update(b" ");
        hasher.update(body.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(body);
        hasher.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
