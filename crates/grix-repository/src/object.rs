//! Typed object lookup and peeling.

use grix_hash::Oid;
use grix_object::{Blob, Commit, Object, ObjectKind, Tag, Tree};

use crate::{RepoError, Repository};

/// A parsed object together with its address.
#[derive(Debug, Clone)]
pub struct GitObject {
    oid: Oid,
    object: Object,
}

impl GitObject {
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn kind(&self) -> ObjectKind {
        self.object.kind()
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        self.object.as_commit()
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        self.object.as_tree()
    }

    pub fn as_tag(&self) -> Option<&Tag> {
        self.object.as_tag()
    }
}

impl Repository {
    /// Read and decode the object for `oid`.
    pub fn find_object(&self, oid: &Oid) -> Result<GitObject, RepoError> {
        let raw = self.odb()?.read(oid)?;
        Ok(GitObject {
            oid: *oid,
            object: raw.decode()?,
        })
    }

    /// Resolve a hex prefix (or full hex) to its object.
    pub fn find_object_prefix(&self, hex: &str) -> Result<GitObject, RepoError> {
        let (short, nybbles) = Oid::from_hex_prefix(hex)?;
        let (oid, raw) = self.odb()?.read_prefix(&short, nybbles)?;
        Ok(GitObject {
            oid,
            object: raw.decode()?,
        })
    }

    pub fn find_commit(&self, oid: &Oid) -> Result<Commit, RepoError> {
        match self.find_object(oid)?.into_object() {
            Object::Commit(commit) => Ok(commit),
            other => Err(RepoError::BadObjectType {
                oid: *oid,
                expected: "commit",
                actual: other.kind().as_str(),
            }),
        }
    }

    pub fn find_tree(&self, oid: &Oid) -> Result<Tree, RepoError> {
        match self.find_object(oid)?.into_object() {
            Object::Tree(tree) => Ok(tree),
            other => Err(RepoError::BadObjectType {
                oid: *oid,
                expected: "tree",
                actual: other.kind().as_str(),
            }),
        }
    }

    pub fn find_blob(&self, oid: &Oid) -> Result<Blob, RepoError> {
        match self.find_object(oid)?.into_object() {
            Object::Blob(blob) => Ok(blob),
            other => Err(RepoError::BadObjectType {
                oid: *oid,
                expected: "blob",
                actual: other.kind().as_str(),
            }),
        }
    }

    pub fn find_tag(&self, oid: &Oid) -> Result<Tag, RepoError> {
        match self.find_object(oid)?.into_object() {
            Object::Tag(tag) => Ok(tag),
            other => Err(RepoError::BadObjectType {
                oid: *oid,
                expected: "tag",
                actual: other.kind().as_str(),
            }),
        }
    }

    /// Dereference `obj` toward `target`.
    ///
    /// With a concrete target: a tag peels recursively through its
    /// pointees, a commit peels to its tree; blobs and trees only peel to
    /// themselves. With `None` (any), the first dereference is returned —
    /// a tag's immediate pointee or a commit's tree.
    pub fn peel(&self, obj: &GitObject, target: Option<ObjectKind>) -> Result<GitObject, RepoError> {
        let Some(kind) = target else {
            return self.peel_once(obj);
        };

        let mut current = obj.clone();
        loop {
            if current.kind() == kind {
                return Ok(current);
            }
            match current.object() {
                Object::Tag(tag) => current = self.find_object(&tag.target)?,
                Object::Commit(commit) if kind == ObjectKind::Tree => {
                    return self.find_object(&commit.tree);
                }
                _ => {
                    return Err(RepoError::InvalidPeel {
                        from: obj.kind().as_str(),
                        to: kind.as_str(),
                    });
                }
            }
        }
    }

    /// One dereference step: tag → pointee, commit → tree.
    fn peel_once(&self, obj: &GitObject) -> Result<GitObject, RepoError> {
        match obj.object() {
            Object::Tag(tag) => self.find_object(&tag.target),
            Object::Commit(commit) => self.find_object(&commit.tree),
            other => Err(RepoError::InvalidPeel {
                from: other.kind().as_str(),
                to: "any",
            }),
        }
    }

    /// Peel an arbitrary OID to the commit it names (tags are chased).
    /// Used to seed history walks from refs.
    pub fn peel_to_commit(&self, oid: &Oid) -> Result<(Oid, Commit), RepoError> {
        let mut current = *oid;
        // Tag chains in practice are one or two links.
        for _ in 0..16 {
            match self.find_object(&current)?.into_object() {
                Object::Commit(commit) => return Ok((current, commit)),
                Object::Tag(tag) => current = tag.target,
                other => {
                    return Err(RepoError::BadObjectType {
                        oid: *oid,
                        expected: "commit",
                        actual: other.kind().as_str(),
                    })
                }
            }
        }
        Err(RepoError::BadObjectType {
            oid: *oid,
            expected: "commit",
            actual: "tag chain",
        })
    }
}
