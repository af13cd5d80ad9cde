//! The reference database: named pointers into the object graph.
//!
//! References live as loose files under the git directory (`refs/…`, plus
//! `HEAD` and friends) and as lines in the `packed-refs` file. A loose ref
//! always shadows a packed ref of the same name.

mod db;
mod loose;
mod name;
mod packed;

pub use db::RefDb;
pub use name::RefName;
pub use packed::{PackedRef, PeelMode};

use grix_hash::Oid;

/// Errors from reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("reference not found: {0}")]
    NotFound(String),

    #[error("invalid reference name: {0}")]
    InvalidName(String),

    #[error("symbolic reference chain too deep starting at {0}")]
    TooDeep(String),

    #[error("cannot parse reference {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error(transparent)]
    Hash(#[from] grix_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RefError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A reference — direct to an object, or symbolic to another ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Direct { name: RefName, target: Oid },
    Symbolic { name: RefName, target: RefName },
}

impl Reference {
    pub fn name(&self) -> &RefName {
        match self {
            Reference::Direct { name, .. } => name,
            Reference::Symbolic { name, .. } => name,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Reference::Symbolic { .. })
    }

    /// The target OID of a direct ref.
    pub fn target(&self) -> Option<Oid> {
        match self {
            Reference::Direct { target, .. } => Some(*target),
            Reference::Symbolic { .. } => None,
        }
    }

    /// The target name of a symbolic ref.
    pub fn symbolic_target(&self) -> Option<&RefName> {
        match self {
            Reference::Symbolic { target, .. } => Some(target),
            Reference::Direct { .. } => None,
        }
    }
}
