//! Loose reference files.

use std::path::Path;

use bstr::ByteSlice;
use grix_hash::Oid;

use crate::{RefError, RefName, Reference};

const SYMBOLIC_PREFIX: &[u8] = b"ref: ";

/// Read the loose file for `name` under the git directory.
///
/// `Ok(None)` when no loose file exists (the caller then consults the
/// packed-refs cache).
pub(crate) fn read_loose_ref(
    git_dir: &Path,
    name: &RefName,
) -> Result<Option<Reference>, RefError> {
    let path = git_dir.join(name.as_str());
    let contents = match std::fs::read(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RefError::Io(e)),
    };

    let trimmed = contents.trim();

    if let Some(target) = trimmed.strip_prefix(SYMBOLIC_PREFIX) {
        let target_str = std::str::from_utf8(target.trim()).map_err(|_| RefError::Parse {
            name: name.to_string(),
            reason: "symbolic target is not UTF-8".into(),
        })?;
        return Ok(Some(Reference::Symbolic {
            name: name.clone(),
            target: RefName::new(target_str)?,
        }));
    }

    let hex = std::str::from_utf8(trimmed).map_err(|_| RefError::Parse {
        name: name.to_string(),
        reason: "OID is not UTF-8".into(),
    })?;
    let target = Oid::from_hex(hex).map_err(|e| RefError::Parse {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    Ok(Some(Reference::Direct {
        name: name.clone(),
        target,
    }))
}
