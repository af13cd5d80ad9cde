use bstr::{BStr, BString, ByteSlice};
use grix_hash::Oid;
use grix_utils::date::Signature;

use crate::{ObjectError, ObjectKind};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// OID of the tagged object.
    pub target: Oid,
    /// Kind of the tagged object.
    pub target_kind: ObjectKind,
    /// Tag name (e.g. "v1.0").
    pub name: BString,
    /// Tagger identity; very old tags omit it.
    pub tagger: Option<Signature>,
    /// Tag message.
    pub message: BString,
}

impl Tag {
    /// Parse tag content from raw bytes (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target: Option<Oid> = None;
        let mut target_kind: Option<ObjectKind> = None;
        let mut name: Option<BString> = None;
        let mut tagger: Option<Signature> = None;

        let data = content;
        let mut pos = 0;

        loop {
            if pos >= data.len() {
                break;
            }
            if data[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = data[pos..]
                .find_byte(b'\n')
                .map(|p| p + pos)
                .unwrap_or(data.len());
            let line = &data[pos..line_end];

            if let Some(space_pos) = line.find_byte(b' ') {
                let key = &line[..space_pos];
                let value = &line[space_pos + 1..];

                match key {
                    b"object" => {
                        let hex = std::str::from_utf8(value).map_err(|_| {
                            ObjectError::InvalidHeader("non-UTF8 object OID".into())
                        })?;
                        target = Some(Oid::from_hex(hex)?);
                    }
                    b"type" => {
                        target_kind = Some(ObjectKind::from_bytes(value)?);
                    }
                    b"tag" => {
                        name = Some(BString::from(value));
                    }
                    b"tagger" => {
                        tagger = Some(
                            Signature::parse(BStr::new(value))
                                .map_err(|e| ObjectError::InvalidSignature(e.to_string()))?,
                        );
                    }
                    _ => {}
                }
            }

            pos = line_end + 1;
        }

        let target = target.ok_or(ObjectError::MissingTagField { field: "object" })?;
        let target_kind = target_kind.ok_or(ObjectError::MissingTagField { field: "type" })?;
        let name = name.ok_or(ObjectError::MissingTagField { field: "tag" })?;

        Ok(Self {
            target,
            target_kind,
            name,
            tagger,
            message: BString::from(&data[pos.min(data.len())..]),
        })
    }

    /// Serialize tag content to bytes (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.target.to_hex().as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_kind.as_str().as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');

        if let Some(ref tagger) = self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(&tagger.to_bytes());
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tag() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        out.extend_from_slice(b"type commit\n");
        out.extend_from_slice(b"tag v1.0\n");
        out.extend_from_slice(b"tagger Tagger <tagger@example.com> 1234567890 +0000\n");
        out.extend_from_slice(b"\nRelease 1.0\n");
        out
    }

    #[test]
    fn parse_basic() {
        let tag = Tag::parse(&sample_tag()).unwrap();
        assert_eq!(tag.target.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(tag.target_kind, ObjectKind::Commit);
        assert_eq!(tag.name, "v1.0");
        assert_eq!(tag.tagger.as_ref().unwrap().name, "Tagger");
        assert_eq!(tag.message, "Release 1.0\n");
    }

    #[test]
    fn taggerless() {
        let mut data = Vec::new();
        data.extend_from_slice(b"object da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        data.extend_from_slice(b"type blob\n");
        data.extend_from_slice(b"tag old-style\n");
        data.extend_from_slice(b"\nno tagger here\n");

        let tag = Tag::parse(&data).unwrap();
        assert!(tag.tagger.is_none());
        assert_eq!(tag.target_kind, ObjectKind::Blob);
        assert_eq!(tag.serialize_content(), data);
    }

    #[test]
    fn serialize_roundtrip() {
        let bytes = sample_tag();
        let tag = Tag::parse(&bytes).unwrap();
        assert_eq!(tag.serialize_content(), bytes);
    }

    #[test]
    fn missing_fields() {
        assert!(Tag::parse(b"type commit\ntag x\n\nmsg\n").is_err());
        assert!(Tag::parse(
            b"object da39a3ee5e6b4b0d3255bfef95601890afd80709\ntag x\n\nmsg\n"
        )
        .is_err());
    }
}
