//! Alternate object directories.
//!
//! `objects/info/alternates` lists further object directories, one per
//! line, `#` starting a comment. Relative paths resolve against the
//! objects directory that names them; each alternate may chain its own
//! alternates up to a fixed depth. Alternates are read-only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grix_pack::WindowManager;

use crate::{Odb, OdbError};

const ALTERNATES_FILE: &str = "info/alternates";
const MAX_DEPTH: usize = 5;

/// Load the alternates of `objects_dir` into `odb`, recursively.
pub(crate) fn load(
    odb: &mut Odb,
    objects_dir: &Path,
    depth: usize,
    manager: &Arc<WindowManager>,
) -> Result<(), OdbError> {
    if depth > MAX_DEPTH {
        return Err(OdbError::AlternatesTooDeep(MAX_DEPTH));
    }

    let alternates_path = objects_dir.join(ALTERNATES_FILE);
    let content = match std::fs::read_to_string(&alternates_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OdbError::Io(e)),
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let alt_dir = if Path::new(line).is_absolute() {
            PathBuf::from(line)
        } else {
            objects_dir.join(line)
        };
        if !alt_dir.is_dir() {
            continue;
        }

        odb.add_dir_backends(&alt_dir, true, manager);
        load(odb, &alt_dir, depth + 1, manager)?;
    }
    Ok(())
}
