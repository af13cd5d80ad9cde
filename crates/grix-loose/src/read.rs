use std::fs;
use std::io::Read;

use flate2::read::ZlibDecoder;
use grix_hash::Oid;
use grix_object::{header, ObjectKind, RawObject};

use crate::{LooseBackend, LooseError};

impl LooseBackend {
    /// Check if a loose object exists.
    pub fn exists(&self, oid: &Oid) -> bool {
        self.object_path(oid).is_file()
    }

    /// Resolve an OID prefix against the fan-out directory.
    ///
    /// Fails with `NotFound` when nothing matches and `Ambiguous` when two
    /// or more filenames share the prefix.
    pub fn exists_prefix(&self, short: &Oid, nybbles: usize) -> Result<Oid, LooseError> {
        let hex = short.to_hex();
        let dir = self.objects_dir().join(&hex[..2]);
        // The remaining significant digits after the fan-out byte.
        let file_prefix = &hex[2..nybbles];

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LooseError::NotFound(*short));
            }
            Err(e) => return Err(LooseError::Io(e)),
        };

        let mut found: Option<String> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() != Oid::HEX_SIZE - 2 || !name.starts_with(file_prefix) {
                continue;
            }
            if found.is_some() {
                return Err(LooseError::Ambiguous(hex[..nybbles].to_string()));
            }
            found = Some(format!("{}{}", &hex[..2], name));
        }

        match found {
            Some(full) => Ok(Oid::from_hex(&full)?),
            None => Err(LooseError::NotFound(*short)),
        }
    }

    /// Read a loose object, returning its type and inflated body.
    pub fn read(&self, oid: &Oid) -> Result<RawObject, LooseError> {
        let compressed = self.read_file(oid)?;

        if is_zlib_frame(&compressed) {
            let inflated = inflate_all(&compressed, oid)?;
            let (kind, size, header_len) = header::parse_header(&inflated)?;
            let body = &inflated[header_len..];
            if body.len() < size {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: format!("body is {} bytes, header says {}", body.len(), size),
                });
            }
            Ok(RawObject::new(kind, body[..size].to_vec()))
        } else {
            let (kind, size, header_len) = parse_binary_header(&compressed, oid)?;
            let mut body = Vec::with_capacity(size);
            let mut decoder = ZlibDecoder::new(&compressed[header_len..]);
            decoder
                .read_to_end(&mut body)
                .map_err(|e| LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: format!("inflate failed: {e}"),
                })?;
            if body.len() != size {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: format!("body is {} bytes, header says {}", body.len(), size),
                });
            }
            Ok(RawObject::new(kind, body))
        }
    }

    /// Read just the type and size, inflating only a small prefix.
    pub fn read_header(&self, oid: &Oid) -> Result<(ObjectKind, usize), LooseError> {
        let compressed = self.read_file(oid)?;

        if !is_zlib_frame(&compressed) {
            let (kind, size, _) = parse_binary_header(&compressed, oid)?;
            return Ok((kind, size));
        }

        // The frame header fits comfortably in 64 inflated bytes.
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut buf = [0u8; 64];
        let mut filled = 0;
        loop {
            if filled >= buf.len() {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: "header exceeds 64 bytes".into(),
                });
            }
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: format!("inflate failed: {e}"),
                })?;
            if n == 0 {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: "unexpected EOF before header terminator".into(),
                });
            }
            filled += n;
            if buf[..filled].contains(&0) {
                break;
            }
        }

        let (kind, size, _) = header::parse_header(&buf[..filled])?;
        Ok((kind, size))
    }

    fn read_file(&self, oid: &Oid) -> Result<Vec<u8>, LooseError> {
        match fs::read(self.object_path(oid)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LooseError::NotFound(*oid))
            }
            Err(e) => Err(LooseError::Io(e)),
        }
    }
}

/// Inflate a whole zlib-framed buffer.
fn inflate_all(compressed: &[u8], oid: &Oid) -> Result<Vec<u8>, LooseError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| LooseError::Corrupt {
            oid: oid.to_hex(),
            reason: format!("inflate failed: {e}"),
        })?;
    Ok(inflated)
}

/// Do the first two bytes form a valid zlib stream header?
fn is_zlib_frame(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    data[0] & 0x8f == 0x08 && ((u16::from(data[0]) << 8) | u16::from(data[1])) % 31 == 0
}

/// Parse the alternate raw binary header: pack-style type and size varint,
/// after which the zlib-deflated body begins.
fn parse_binary_header(data: &[u8], oid: &Oid) -> Result<(ObjectKind, usize, usize), LooseError> {
    let corrupt = |reason: &str| LooseError::Corrupt {
        oid: oid.to_hex(),
        reason: reason.to_string(),
    };

    if data.is_empty() {
        return Err(corrupt("empty object file"));
    }

    let mut byte = data[0];
    let kind = ObjectKind::from_pack_code((byte >> 4) & 0x07)
        .ok_or_else(|| corrupt("invalid type in binary header"))?;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4;
    let mut pos = 1;

    while byte & 0x80 != 0 {
        if pos >= data.len() || shift > 57 {
            return Err(corrupt("truncated binary header"));
        }
        byte = data[pos];
        pos += 1;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }

    Ok((kind, size as usize, pos))
}
