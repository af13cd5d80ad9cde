//! Object model: blob, tree, commit, tag parsing and serialization.
//!
//! The object database hands out raw `(kind, bytes)` records; this crate
//! decodes them into domain values and provides the shared header codec
//! `"<type> <decimal length>\0"` used for both loose framing and hashing.

mod blob;
mod commit;
pub mod header;
mod tag;
mod tree;

pub use blob::Blob;
pub use commit::Commit;
pub use tag::Tag;
pub use tree::{FileMode, Tree, TreeEntry};

use bstr::BString;
use grix_hash::{HashError, Hasher, Oid};

/// Errors produced by object decoding.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("truncated object: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: missing '{field}' header")]
    MissingCommitField { field: &'static str },

    #[error("invalid tag: missing '{field}' header")]
    MissingTagField { field: &'static str },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("cannot peel a {from} to a {to}")]
    InvalidPeel { from: ObjectKind, to: ObjectKind },

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Parse from the type name used in object headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    /// The canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Numeric code used in pack entry headers.
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }

    pub fn pack_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// An undecoded object record as returned by the object database: its type
/// and its body, already inflated into owned memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// The content address of this record.
    pub fn compute_oid(&self) -> Oid {
        Hasher::hash_object(self.kind.as_str(), &self.data)
    }

    /// Decode into a typed object.
    pub fn decode(&self) -> Result<Object, ObjectError> {
        Object::parse(self.kind, &self.data)
    }
}

/// A parsed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Commit(Commit),
    Tree(Tree),
    Blob(Blob),
    Tag(Tag),
}

impl Object {
    /// Parse object content of a known kind (no header).
    pub fn parse(kind: ObjectKind, content: &[u8]) -> Result<Self, ObjectError> {
        match kind {
            ObjectKind::Commit => Ok(Self::Commit(Commit::parse(content)?)),
            ObjectKind::Tree => Ok(Self::Tree(Tree::parse(content)?)),
            ObjectKind::Blob => Ok(Self::Blob(Blob::parse(content))),
            ObjectKind::Tag => Ok(Self::Tag(Tag::parse(content)?)),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Serialize just the content (no header).
    pub fn serialize_content(&self) -> Vec<u8> {
        match self {
            Self::Commit(c) => c.serialize_content(),
            Self::Tree(t) => t.serialize_content(),
            Self::Blob(b) => b.data.to_vec(),
            Self::Tag(t) => t.serialize_content(),
        }
    }

    /// Compute the OID by hashing the canonical serialized form.
    pub fn compute_oid(&self) -> Oid {
        Hasher::hash_object(self.kind().as_str(), &self.serialize_content())
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Self::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Self::Tag(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_bytes() {
        assert_eq!(ObjectKind::from_bytes(b"blob").unwrap(), ObjectKind::Blob);
        assert_eq!(ObjectKind::from_bytes(b"tree").unwrap(), ObjectKind::Tree);
        assert_eq!(
            ObjectKind::from_bytes(b"commit").unwrap(),
            ObjectKind::Commit
        );
        assert_eq!(ObjectKind::from_bytes(b"tag").unwrap(), ObjectKind::Tag);
        assert!(ObjectKind::from_bytes(b"bogus").is_err());
    }

    #[test]
    fn kind_pack_codes() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Blob,
            ObjectKind::Tag,
        ] {
            assert_eq!(ObjectKind::from_pack_code(kind.pack_code()), Some(kind));
        }
        assert_eq!(ObjectKind::from_pack_code(6), None);
    }

    #[test]
    fn raw_object_oid() {
        let raw = RawObject::new(ObjectKind::Blob, b"Test data\n".to_vec());
        assert_eq!(
            raw.compute_oid().to_hex(),
            "67b808feb36201507a77f85e6d898f0a2836e4a5"
        );
    }

    #[test]
    fn decode_blob() {
        let raw = RawObject::new(ObjectKind::Blob, b"abc".to_vec());
        let obj = raw.decode().unwrap();
        assert_eq!(obj.kind(), ObjectKind::Blob);
        assert_eq!(obj.as_blob().unwrap().data, "abc");
    }
}
