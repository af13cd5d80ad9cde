//! Finding the git directory.

use std::path::{Path, PathBuf};

use crate::RepoError;

/// Does this directory look like a git directory?
pub(crate) fn is_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file()
        && path.join("objects").is_dir()
        && path.join("refs").is_dir()
}

/// Walk up from `start` looking for `.git` (directory or `gitdir:` file)
/// or a bare repository layout. Returns the git directory.
pub fn discover_path(start: &Path) -> Result<PathBuf, RepoError> {
    let start = std::fs::canonicalize(start)
        .map_err(|_| RepoError::NotFound(start.to_path_buf()))?;

    let mut current = start.clone();
    loop {
        let dot_git = current.join(".git");
        if dot_git.is_dir() && is_git_dir(&dot_git) {
            return Ok(dot_git);
        }
        if dot_git.is_file() {
            return read_gitdir_file(&dot_git);
        }
        if is_git_dir(&current) {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => return Err(RepoError::NotFound(start)),
        }
    }
}

/// Parse a `.git` file containing `gitdir: <path>` and resolve the target.
pub(crate) fn read_gitdir_file(path: &Path) -> Result<PathBuf, RepoError> {
    let content = std::fs::read_to_string(path).map_err(|e| RepoError::InvalidGitDir {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let target = content
        .trim()
        .strip_prefix("gitdir: ")
        .ok_or_else(|| RepoError::InvalidGitDir {
            path: path.to_path_buf(),
            reason: format!("expected 'gitdir: <path>', got {:?}", content.trim()),
        })?;

    let target = Path::new(target);
    let resolved = if target.is_absolute() {
        target.to_path_buf()
    } else {
        path.parent().unwrap_or(Path::new(".")).join(target)
    };
    std::fs::canonicalize(&resolved).map_err(|e| RepoError::InvalidGitDir {
        path: path.to_path_buf(),
        reason: format!("cannot resolve gitdir target: {e}"),
    })
}
