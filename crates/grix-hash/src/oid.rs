use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_decode_prefix, hex_to_string};
use crate::HashError;

/// A git object identifier — the SHA-1 hash of an object's framed content.
///
/// Equality is bitwise and the value is freely copied. Short prefixes are
/// expressed as a zero-padded `Oid` plus an explicit half-nibble count; see
/// [`Oid::from_hex_prefix`] and [`Oid::matches_prefix`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// Raw digest size in bytes.
    pub const RAW_SIZE: usize = 20;
    /// Hex representation size in characters.
    pub const HEX_SIZE: usize = 40;
    /// Shortest prefix accepted by lookup operations.
    pub const MIN_PREFIX: usize = 4;

    /// The all-zero OID.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Create an Oid from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != Self::RAW_SIZE {
            return Err(HashError::InvalidRawLength {
                expected: Self::RAW_SIZE,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Create an Oid from a 40-character hex string (case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut raw = [0u8; 20];
        hex_decode(hex, &mut raw)?;
        Ok(Self(raw))
    }

    /// Parse a hex prefix of 4..=40 digits.
    ///
    /// Returns the zero-padded Oid and the number of significant hex digits.
    pub fn from_hex_prefix(hex: &str) -> Result<(Self, usize), HashError> {
        if hex.len() < Self::MIN_PREFIX {
            return Err(HashError::PrefixTooShort(hex.len()));
        }
        if hex.len() > Self::HEX_SIZE {
            return Err(HashError::PrefixTooLong(hex.len()));
        }
        let mut raw = [0u8; 20];
        hex_decode_prefix(hex, &mut raw)?;
        Ok((Self(raw), hex.len()))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Is this the all-zero OID?
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex_to_string(&self.0)
    }

    /// First byte of the digest (fan-out table index).
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Compare the first `nybbles` half-bytes of two OIDs.
    ///
    /// Returns true when both share that many leading hex digits. A count of
    /// 40 degenerates to full equality.
    pub fn matches_prefix(&self, other: &Oid, nybbles: usize) -> bool {
        let full = nybbles / 2;
        if self.0[..full] != other.0[..full] {
            return false;
        }
        if nybbles % 2 == 1 {
            return self.0[full] >> 4 == other.0[full] >> 4;
        }
        true
    }

    /// Loose object path component: `"xx/yyyy…"`.
    pub fn loose_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", &self.to_hex()[..8])
    }
}

impl FromStr for Oid {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn hex_roundtrip() {
        let oid = Oid::from_hex(HEX).unwrap();
        assert_eq!(oid.to_hex(), HEX);
        assert_eq!(oid.to_hex().len(), Oid::HEX_SIZE);
        let parsed: Oid = oid.to_hex().parse().unwrap();
        assert_eq!(parsed, oid);
    }

    #[test]
    fn bytes_roundtrip() {
        let oid = Oid::from_hex(HEX).unwrap();
        assert_eq!(Oid::from_bytes(oid.as_bytes()).unwrap(), oid);
    }

    #[test]
    fn from_bytes_wrong_length() {
        assert!(matches!(
            Oid::from_bytes(&[0u8; 19]),
            Err(HashError::InvalidRawLength { expected: 20, actual: 19 })
        ));
    }

    #[test]
    fn case_insensitive() {
        let upper = Oid::from_hex(&HEX.to_uppercase()).unwrap();
        assert_eq!(upper, Oid::from_hex(HEX).unwrap());
        assert_eq!(upper.to_hex(), HEX);
    }

    #[test]
    fn invalid_hex() {
        assert!(Oid::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(Oid::from_hex("abcd").is_err());
    }

    #[test]
    fn zero_oid() {
        assert!(Oid::ZERO.is_zero());
        assert!(!Oid::from_hex(HEX).unwrap().is_zero());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = Oid::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = Oid::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn usable_as_map_key() {
        let oid = Oid::from_hex(HEX).unwrap();
        let mut map = HashMap::new();
        map.insert(oid, 1);
        assert_eq!(map.get(&oid), Some(&1));
    }

    #[test]
    fn prefix_parse_and_match() {
        let oid = Oid::from_hex(HEX).unwrap();
        let (short, len) = Oid::from_hex_prefix("da39a").unwrap();
        assert_eq!(len, 5);
        assert!(short.matches_prefix(&oid, len));
        assert!(oid.matches_prefix(&short, len));

        let (other, len) = Oid::from_hex_prefix("da38").unwrap();
        assert!(!other.matches_prefix(&oid, len));
    }

    #[test]
    fn prefix_length_bounds() {
        assert!(matches!(
            Oid::from_hex_prefix("abc"),
            Err(HashError::PrefixTooShort(3))
        ));
        let too_long = "a".repeat(41);
        assert!(matches!(
            Oid::from_hex_prefix(&too_long),
            Err(HashError::PrefixTooLong(41))
        ));
        // Full length is a valid prefix.
        let (full, len) = Oid::from_hex_prefix(HEX).unwrap();
        assert_eq!(len, 40);
        assert_eq!(full, Oid::from_hex(HEX).unwrap());
    }

    #[test]
    fn odd_prefix_compares_high_nibble() {
        let a = Oid::from_hex("ab10000000000000000000000000000000000000").unwrap();
        let b = Oid::from_hex("ab1f000000000000000000000000000000000000").unwrap();
        assert!(a.matches_prefix(&b, 3));
        assert!(!a.matches_prefix(&b, 4));
    }

    #[test]
    fn loose_path_layout() {
        let oid = Oid::from_hex(HEX).unwrap();
        assert_eq!(oid.loose_path(), format!("da/{}", &HEX[2..]));
    }
}
