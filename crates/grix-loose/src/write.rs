use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use grix_hash::{Hasher, Oid};
use grix_object::{header, ObjectKind};

use crate::{LooseBackend, LooseError};

/// Mode bits for fan-out directories, masked by the process umask.
#[cfg(unix)]
const OBJECT_DIR_MODE: u32 = 0o777;
/// Objects are immutable once written.
#[cfg(unix)]
const OBJECT_FILE_MODE: u32 = 0o444;

impl LooseBackend {
    /// Write an object, returning its content address.
    ///
    /// Idempotent: an already-present object is left untouched. The file is
    /// produced via a temp file in the objects directory and renamed into
    /// place, so concurrent writers of the same content cannot clash.
    pub fn write(&self, kind: ObjectKind, body: &[u8]) -> Result<Oid, LooseError> {
        let hdr = header::write_header(kind, body.len());

        let oid = {
            let mut hasher = Hasher::new();
            hasher.update(&hdr);
            hasher.update(body);
            hasher.finalize()
        };

        if self.exists(&oid) {
            return Ok(oid);
        }

        let final_path = self.object_path(&oid);
        let fanout_dir = final_path.parent().expect("object path has a parent");
        create_fanout_dir(fanout_dir)?;

        let tmp_path = self.objects_dir().join(format!(
            "tmp_obj_{}_{}",
            std::process::id(),
            oid.to_hex()
        ));

        {
            let file = fs::File::create(&tmp_path)?;
            let mut encoder = ZlibEncoder::new(file, self.compression());
            encoder.write_all(&hdr)?;
            encoder.write_all(body)?;
            encoder.finish()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(OBJECT_FILE_MODE))?;
        }

        finalize_object(&tmp_path, &final_path)?;
        Ok(oid)
    }

    pub(crate) fn compression(&self) -> flate2::Compression {
        self.compression
    }
}

#[cfg(unix)]
fn create_fanout_dir(dir: &Path) -> Result<(), LooseError> {
    use std::os::unix::fs::DirBuilderExt;
    match fs::DirBuilder::new().mode(OBJECT_DIR_MODE).create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(LooseError::Io(e)),
    }
}

#[cfg(not(unix))]
fn create_fanout_dir(dir: &Path) -> Result<(), LooseError> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Move the temp file into place. Losing the rename race to another writer
/// of the same object is success: the content is identical.
fn finalize_object(tmp: &Path, final_path: &Path) -> Result<(), LooseError> {
    match fs::rename(tmp, final_path) {
        Ok(()) => Ok(()),
        Err(_) if final_path.exists() => {
            let _ = fs::remove_file(tmp);
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp);
            Err(LooseError::Io(e))
        }
    }
}
