//! Revision walking: stream commit history from seed points.
//!
//! A walker is seeded with *push* (include) and *hide* (exclude) OIDs and
//! yields commits in the configured order. Hidden commits and all their
//! ancestors never appear. Ordering modes compose: topological, by
//! committer time, and reversed output.

mod walk;

pub use walk::Revwalk;

use std::ops::BitOr;

use grix_hash::Oid;

/// Errors from revision walking.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The stream is drained. Callers test for this; the walker has
    /// already reset itself for reseeding.
    #[error("iteration is over")]
    IterOver,

    #[error("object {0} is not a commit")]
    NotACommit(Oid),

    #[error("corrupt commit {oid}: {reason}")]
    CorruptCommit { oid: Oid, reason: String },

    #[error(transparent)]
    Repo(#[from] grix_repository::RepoError),

    #[error(transparent)]
    Ref(#[from] grix_ref::RefError),

    #[error(transparent)]
    Odb(#[from] grix_odb::OdbError),
}

impl WalkError {
    pub fn is_iter_over(&self) -> bool {
        matches!(self, Self::IterOver)
    }
}

/// Output ordering, an OR-able flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sorting(u32);

impl Sorting {
    /// Seeding order (LIFO over the seeds).
    pub const NONE: Sorting = Sorting(0);
    /// Parents only after all their children.
    pub const TOPOLOGICAL: Sorting = Sorting(1 << 0);
    /// Committer timestamp, newest first.
    pub const TIME: Sorting = Sorting(1 << 1);
    /// Emit the walk backwards.
    pub const REVERSE: Sorting = Sorting(1 << 2);

    pub fn contains(self, flag: Sorting) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl BitOr for Sorting {
    type Output = Sorting;
    fn bitor(self, rhs: Sorting) -> Sorting {
        Sorting(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorting_flags_compose() {
        let both = Sorting::TOPOLOGICAL | Sorting::REVERSE;
        assert!(both.contains(Sorting::TOPOLOGICAL));
        assert!(both.contains(Sorting::REVERSE));
        assert!(!both.contains(Sorting::TIME));
        assert!(Sorting::NONE.contains(Sorting::NONE));
    }
}
