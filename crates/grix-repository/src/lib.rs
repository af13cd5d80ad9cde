//! Repository discovery and the central handle composing config, object
//! database, reference database, and index.
//!
//! Subsystems are created on first demand and shared behind internal
//! locks, so a `Repository` can serve read paths from many threads
//! without external synchronization.

mod discover;
mod object;

pub use discover::discover_path;
pub use object::GitObject;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use grix_config::Config;
use grix_hash::Oid;
use grix_index::Index;
use grix_odb::Odb;
use grix_pack::WindowManager;
use grix_ref::{RefDb, Reference};

/// Errors from repository-level operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("no repository found at or above {0}")]
    NotFound(PathBuf),

    #[error("invalid git directory {path}: {reason}")]
    InvalidGitDir { path: PathBuf, reason: String },

    #[error("operation requires a working tree, but the repository is bare")]
    BareRepository,

    #[error("object {oid} is a {actual}, expected a {expected}")]
    BadObjectType {
        oid: Oid,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot peel {from} to {to}")]
    InvalidPeel { from: &'static str, to: &'static str },

    #[error(transparent)]
    Odb(#[from] grix_odb::OdbError),

    #[error(transparent)]
    Ref(#[from] grix_ref::RefError),

    #[error(transparent)]
    Config(#[from] grix_config::ConfigError),

    #[error(transparent)]
    Index(#[from] grix_index::IndexError),

    #[error(transparent)]
    Object(#[from] grix_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] grix_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An open repository.
pub struct Repository {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    manager: Arc<WindowManager>,
    config: RwLock<Option<Arc<Config>>>,
    odb: RwLock<Option<Arc<Odb>>>,
    refdb: RwLock<Option<Arc<RefDb>>>,
    index: Mutex<Option<Index>>,
}

impl Repository {
    /// Open a repository at `path` — either a git directory or a working
    /// tree root containing `.git`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        Self::open_with_manager(path, WindowManager::global())
    }

    /// Open with an explicit window manager (isolated mmap caches).
    pub fn open_with_manager(
        path: impl AsRef<Path>,
        manager: Arc<WindowManager>,
    ) -> Result<Self, RepoError> {
        let path = path.as_ref();

        let git_dir = if discover::is_git_dir(path) {
            path.to_path_buf()
        } else {
            let dot_git = path.join(".git");
            if dot_git.is_dir() && discover::is_git_dir(&dot_git) {
                dot_git
            } else if dot_git.is_file() {
                discover::read_gitdir_file(&dot_git)?
            } else {
                return Err(RepoError::NotFound(path.to_path_buf()));
            }
        };

        Self::from_git_dir(git_dir, manager)
    }

    /// Walk up from `start` until a repository is found.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, RepoError> {
        let git_dir = discover::discover_path(start.as_ref())?;
        Self::from_git_dir(git_dir, WindowManager::global())
    }

    fn from_git_dir(git_dir: PathBuf, manager: Arc<WindowManager>) -> Result<Self, RepoError> {
        let git_dir = std::fs::canonicalize(&git_dir).unwrap_or(git_dir);

        // The working tree: an explicit core.worktree wins, then the
        // conventional `.git` parent, unless the config says bare.
        let config = Config::load(Some(&git_dir))?;
        let bare = config.get_bool_or("core.bare", false).unwrap_or(false);
        let workdir = if let Some(worktree) = config.get_path("core.worktree") {
            let resolved = if worktree.is_absolute() {
                worktree
            } else {
                git_dir.join(worktree)
            };
            Some(std::fs::canonicalize(&resolved).unwrap_or(resolved))
        } else if !bare && git_dir.file_name().is_some_and(|n| n == ".git") {
            git_dir.parent().map(Path::to_path_buf)
        } else {
            None
        };

        Ok(Self {
            git_dir,
            workdir,
            manager,
            config: RwLock::new(Some(Arc::new(config))),
            odb: RwLock::new(None),
            refdb: RwLock::new(None),
            index: Mutex::new(None),
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The working tree root, or `None` for a bare repository.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.workdir.is_none()
    }

    /// The working tree root, failing with `BareRepository` without one.
    pub fn require_workdir(&self) -> Result<&Path, RepoError> {
        self.workdir().ok_or(RepoError::BareRepository)
    }

    /// The merged configuration.
    pub fn config(&self) -> Result<Arc<Config>, RepoError> {
        if let Some(config) = self.config.read().unwrap().as_ref() {
            return Ok(Arc::clone(config));
        }
        let mut slot = self.config.write().unwrap();
        if let Some(config) = slot.as_ref() {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(Config::load(Some(&self.git_dir))?);
        *slot = Some(Arc::clone(&config));
        Ok(config)
    }

    /// The object database (opened on first use).
    pub fn odb(&self) -> Result<Arc<Odb>, RepoError> {
        if let Some(odb) = self.odb.read().unwrap().as_ref() {
            return Ok(Arc::clone(odb));
        }
        let mut slot = self.odb.write().unwrap();
        if let Some(odb) = slot.as_ref() {
            return Ok(Arc::clone(odb));
        }
        let odb = Arc::new(Odb::open_with_manager(
            self.git_dir.join("objects"),
            Arc::clone(&self.manager),
        )?);
        *slot = Some(Arc::clone(&odb));
        Ok(odb)
    }

    /// The reference database (opened on first use).
    pub fn refs(&self) -> Result<Arc<RefDb>, RepoError> {
        if let Some(refdb) = self.refdb.read().unwrap().as_ref() {
            return Ok(Arc::clone(refdb));
        }
        let mut slot = self.refdb.write().unwrap();
        if let Some(refdb) = slot.as_ref() {
            return Ok(Arc::clone(refdb));
        }
        let refdb = Arc::new(RefDb::open(&self.git_dir));
        *slot = Some(Arc::clone(&refdb));
        Ok(refdb)
    }

    /// Run `f` against the index, loading it on first use. The index
    /// stays locked for the duration of the closure.
    pub fn with_index<R>(&self, f: impl FnOnce(&mut Index) -> R) -> Result<R, RepoError> {
        let mut slot = self.index.lock().unwrap();
        if slot.is_none() {
            let mut index = Index::read_from(self.git_dir.join("index"))?;
            let ignore_case = self
                .config()?
                .get_bool_or("core.ignorecase", false)
                .unwrap_or(false);
            index.set_ignore_case(ignore_case);
            *slot = Some(index);
        }
        Ok(f(slot.as_mut().expect("loaded above")))
    }

    /// Drop the cached index so the next access re-reads the file.
    pub fn reload_index(&self) {
        *self.index.lock().unwrap() = None;
    }

    /// Compute the address a body would have as an object of `kind`,
    /// without storing anything.
    pub fn hash_object(&self, kind: grix_object::ObjectKind, body: &[u8]) -> Oid {
        Odb::hash(kind, body)
    }

    /// Resolve `HEAD` to its reference.
    pub fn head(&self) -> Result<Reference, RepoError> {
        Ok(self.refs()?.resolve("HEAD")?)
    }

    /// Resolve `HEAD` to its commit OID.
    pub fn head_oid(&self) -> Result<Oid, RepoError> {
        Ok(self
            .head()?
            .target()
            .expect("resolve returns a direct reference"))
    }

    /// The branch name HEAD points at, or `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>, RepoError> {
        match self.refs()?.lookup("HEAD")? {
            Reference::Symbolic { target, .. } => {
                Ok(Some(target.shorthand().to_string()))
            }
            Reference::Direct { .. } => Ok(None),
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}
