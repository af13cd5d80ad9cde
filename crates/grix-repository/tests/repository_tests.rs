//! Opening repositories and looking up typed objects.

use std::path::{Path, PathBuf};

use bstr::BStr;
use grix_hash::Oid;
use grix_object::{Commit, Object, ObjectKind, Tag, Tree, TreeEntry};
use grix_pack::WindowManager;
use grix_repository::{RepoError, Repository};
use grix_utils::date::{Signature, Time};

fn signature(seconds: i64) -> Signature {
    Signature {
        name: "A U Thor".into(),
        email: "author@example.com".into(),
        when: Time::new(seconds, 120),
    }
}

/// Create a minimal repository layout on disk and return its git dir.
fn scaffold(root: &Path, bare: bool) -> PathBuf {
    let git_dir = if bare {
        root.to_path_buf()
    } else {
        root.join(".git")
    };
    std::fs::create_dir_all(git_dir.join("objects")).unwrap();
    std::fs::create_dir_all(git_dir.join("refs/heads")).unwrap();
    std::fs::create_dir_all(git_dir.join("refs/tags")).unwrap();
    std::fs::write(git_dir.join("HEAD"), "ref: refs/heads/master\n").unwrap();
    if bare {
        std::fs::write(git_dir.join("config"), "[core]\n\tbare = true\n").unwrap();
    } else {
        std::fs::write(git_dir.join("config"), "[core]\n\tbare = false\n").unwrap();
    }
    git_dir
}

fn open(path: &Path) -> Repository {
    Repository::open_with_manager(path, WindowManager::new(64 * 1024, 1 << 20)).unwrap()
}

/// Store blob → tree → commit → tag, point master at the commit, and
/// return (blob, tree, commit, tag) OIDs.
fn populate(repo: &Repository) -> (Oid, Oid, Oid, Oid) {
    let odb = repo.odb().unwrap();

    let blob_oid = odb.write(ObjectKind::Blob, b"file contents\n").unwrap();

    let tree = Tree {
        entries: vec![TreeEntry {
            mode: grix_object::FileMode::Regular,
            name: "file.txt".into(),
            oid: blob_oid,
        }],
    };
    let tree_oid = odb
        .write(ObjectKind::Tree, &tree.serialize_content())
        .unwrap();

    let commit = Commit {
        tree: tree_oid,
        parents: vec![],
        author: signature(1_600_000_000),
        committer: signature(1_600_000_000),
        encoding: None,
        extra_headers: vec![],
        message: "initial\n".into(),
    };
    let commit_oid = odb
        .write(ObjectKind::Commit, &commit.serialize_content())
        .unwrap();

    let tag = Tag {
        target: commit_oid,
        target_kind: ObjectKind::Commit,
        name: "v1.0".into(),
        tagger: Some(signature(1_600_000_100)),
        message: "release\n".into(),
    };
    let tag_oid = odb.write(ObjectKind::Tag, &tag.serialize_content()).unwrap();

    std::fs::write(
        repo.git_dir().join("refs/heads/master"),
        format!("{commit_oid}\n"),
    )
    .unwrap();
    std::fs::write(
        repo.git_dir().join("refs/tags/v1.0"),
        format!("{tag_oid}\n"),
    )
    .unwrap();

    (blob_oid, tree_oid, commit_oid, tag_oid)
}

#[test]
fn open_worktree_and_bare() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);

    let repo = open(&work);
    assert!(!repo.is_bare());
    assert_eq!(
        std::fs::canonicalize(repo.workdir().unwrap()).unwrap(),
        std::fs::canonicalize(&work).unwrap()
    );

    let bare_dir = dir.path().join("repo.git");
    scaffold(&bare_dir, true);
    let bare = open(&bare_dir);
    assert!(bare.is_bare());
    assert!(bare.workdir().is_none());
    assert!(matches!(
        bare.require_workdir(),
        Err(RepoError::BareRepository)
    ));
}

#[test]
fn discover_from_subdirectory() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let nested = work.join("a/b/c");
    std::fs::create_dir_all(&nested).unwrap();

    let repo = Repository::discover(&nested).unwrap();
    assert_eq!(
        std::fs::canonicalize(repo.git_dir()).unwrap(),
        std::fs::canonicalize(work.join(".git")).unwrap()
    );
}

#[test]
fn head_resolution_and_branch() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let (_, _, commit_oid, _) = populate(&repo);

    assert_eq!(repo.head_oid().unwrap(), commit_oid);
    assert_eq!(repo.current_branch().unwrap().as_deref(), Some("master"));
}

#[test]
fn typed_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let (blob_oid, tree_oid, commit_oid, tag_oid) = populate(&repo);

    let commit = repo.find_commit(&commit_oid).unwrap();
    assert_eq!(commit.tree, tree_oid);
    assert_eq!(commit.author.name, "A U Thor");

    let tree = repo.find_tree(&tree_oid).unwrap();
    assert_eq!(tree.entry_by_name(BStr::new("file.txt")).unwrap().oid, blob_oid);

    let tag = repo.find_tag(&tag_oid).unwrap();
    assert_eq!(tag.target, commit_oid);

    // Type mismatch is an error, not a coercion.
    assert!(matches!(
        repo.find_commit(&blob_oid),
        Err(RepoError::BadObjectType { .. })
    ));
}

#[test]
fn prefix_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let (blob_oid, ..) = populate(&repo);

    let found = repo
        .find_object_prefix(&blob_oid.to_hex()[..8])
        .unwrap();
    assert_eq!(found.oid(), blob_oid);
    assert_eq!(found.kind(), ObjectKind::Blob);
}

#[test]
fn peel_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let (_, tree_oid, commit_oid, tag_oid) = populate(&repo);

    let tag_obj = repo.find_object(&tag_oid).unwrap();

    // tag → commit
    let peeled = repo.peel(&tag_obj, Some(ObjectKind::Commit)).unwrap();
    assert_eq!(peeled.oid(), commit_oid);

    // tag → tree (through the commit)
    let peeled = repo.peel(&tag_obj, Some(ObjectKind::Tree)).unwrap();
    assert_eq!(peeled.oid(), tree_oid);

    // tag → blob is impossible
    assert!(matches!(
        repo.peel(&tag_obj, Some(ObjectKind::Blob)),
        Err(RepoError::InvalidPeel { .. })
    ));

    // Any: the first dereference only.
    let peeled = repo.peel(&tag_obj, None).unwrap();
    assert_eq!(peeled.oid(), commit_oid);
    let commit_obj = repo.find_object(&commit_oid).unwrap();
    let peeled = repo.peel(&commit_obj, None).unwrap();
    assert_eq!(peeled.oid(), tree_oid);

    // An object peels to its own kind.
    let tree_obj = repo.find_object(&tree_oid).unwrap();
    let same = repo.peel(&tree_obj, Some(ObjectKind::Tree)).unwrap();
    assert_eq!(same.oid(), tree_oid);

    // peel_to_commit chases tag chains.
    let (oid, commit) = repo.peel_to_commit(&tag_oid).unwrap();
    assert_eq!(oid, commit_oid);
    assert_eq!(commit.tree, tree_oid);
}

#[test]
fn hash_agreement_for_all_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let (blob_oid, tree_oid, commit_oid, tag_oid) = populate(&repo);

    let odb = repo.odb().unwrap();
    for oid in [blob_oid, tree_oid, commit_oid, tag_oid] {
        let raw = odb.read(&oid).unwrap();
        assert_eq!(raw.compute_oid(), oid);
    }
}

#[test]
fn index_is_loaded_lazily_and_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);

    // No index file: empty index.
    let len = repo.with_index(|index| index.len()).unwrap();
    assert_eq!(len, 0);

    // Write an index through the API and reload from disk.
    let index_path = work.join(".git/index");
    repo.with_index(|index| {
        index.add(grix_index::IndexEntry::new(
            "tracked.txt".into(),
            Oid::from_hex("1111111111111111111111111111111111111111").unwrap(),
            grix_object::FileMode::Regular,
        ));
        index.write_to(&index_path).unwrap();
    })
    .unwrap();

    repo.reload_index();
    let len = repo.with_index(|index| index.len()).unwrap();
    assert_eq!(len, 1);
}

#[test]
fn config_keys_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    let git_dir = scaffold(&work, false);
    std::fs::write(
        git_dir.join("config"),
        "[core]\n\tbare = false\n\tignorecase = true\n[user]\n\tname = Tester\n\temail = t@example.com\n",
    )
    .unwrap();

    let repo = open(&work);
    let config = repo.config().unwrap();
    assert_eq!(config.get_bool_or("core.ignorecase", false).unwrap(), true);
    // Defaults for keys the files do not set.
    assert_eq!(config.get_bool_or("core.filemode", true).unwrap(), true);
    assert_eq!(config.get_bool_or("core.symlinks", true).unwrap(), true);
    assert_eq!(
        config.get_bool_or("core.precomposeunicode", true).unwrap(),
        true
    );
    assert_eq!(config.get_string("user.name"), Some("Tester"));
    assert_eq!(config.get_string("user.email"), Some("t@example.com"));
}

#[test]
fn object_identity_fixed_points() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("project");
    scaffold(&work, false);
    let repo = open(&work);
    let odb = repo.odb().unwrap();

    let oid = odb.write(ObjectKind::Blob, b"Test data\n").unwrap();
    assert_eq!(oid.to_hex(), "67b808feb36201507a77f85e6d898f0a2836e4a5");
    let empty = odb.write(ObjectKind::Blob, b"").unwrap();
    assert_eq!(empty.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");

    // And the typed decode agrees.
    match repo.find_object(&oid).unwrap().into_object() {
        Object::Blob(blob) => assert_eq!(blob.data, b"Test data\n"),
        other => panic!("expected a blob, got {:?}", other.kind()),
    }
}
