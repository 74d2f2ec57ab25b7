use std::fmt;
use std::str::FromStr;

use crate::{HashAlgorithm, HashError};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Content hash naming a blob, tree, commit or tag.
///
/// The digest is stored inline; equal content always yields an equal id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// Build an id from a raw digest of the algorithm's length.
    pub fn from_bytes(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        if bytes.len() != algo.digest_len() {
            return Err(HashError::InvalidHashLength {
                expected: algo.digest_len(),
                actual: bytes.len(),
            });
        }
        let mut oid = algo.null_oid();
        oid.as_mut_bytes().copy_from_slice(bytes);
        Ok(oid)
    }

    /// Parse a full-length lowercase or uppercase hex id. The algorithm
    /// follows from the length (40 or 64 characters).
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let algo =
            HashAlgorithm::from_hex_len(hex.len()).ok_or(HashError::InvalidHexLength(hex.len()))?;
        let mut oid = algo.null_oid();
        for (i, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
            let hi = nibble(pair[0], i * 2)?;
            let lo = nibble(pair[1], i * 2 + 1)?;
            oid.as_mut_bytes()[i] = (hi << 4) | lo;
        }
        Ok(oid)
    }

    /// Parse the hex id at the start of `bytes`, as found in protocol lines.
    pub fn from_hex_prefix(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        let len = algo.hex_len();
        let hex = bytes
            .get(..len)
            .and_then(|h| std::str::from_utf8(h).ok())
            .ok_or(HashError::InvalidHexLength(bytes.len().min(len)))?;
        Self::from_hex(hex)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    fn as_mut_bytes(&mut self) -> &mut [u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.algorithm().hex_len());
        for &b in self.as_bytes() {
            out.push(HEX_DIGITS[(b >> 4) as usize] as char);
            out.push(HEX_DIGITS[(b & 0x0f) as usize] as char);
        }
        out
    }

    /// Leading byte, the key of pack index fan-out tables.
    pub fn first_byte(&self) -> u8 {
        self.as_bytes()[0]
    }

    /// Relative path of the loose object file: `"ab/cdef..."`.
    pub fn loose_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

fn nibble(c: u8, position: usize) -> Result<u8, HashError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(HashError::InvalidHex {
            position,
            character: c as char,
        }),
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..10])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EMPTY_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

    #[test]
    fn hex_round_trip() {
        let oid = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(oid.algorithm(), HashAlgorithm::Sha1);
        assert_eq!(oid.to_hex(), EMPTY_BLOB);
        assert_eq!(oid.to_string(), EMPTY_BLOB);
        assert_eq!(oid.first_byte(), 0xe6);
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let oid = ObjectId::from_hex(&EMPTY_BLOB.to_uppercase()).unwrap();
        assert_eq!(oid.to_hex(), EMPTY_BLOB);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            ObjectId::from_hex("abc"),
            Err(HashError::InvalidHexLength(3))
        ));
        let bad = format!("{}g", &EMPTY_BLOB[..39]);
        assert!(matches!(
            ObjectId::from_hex(&bad),
            Err(HashError::InvalidHex { position: 39, character: 'g' })
        ));
        assert!(ObjectId::from_bytes(&[0; 19], HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn parses_prefix_of_protocol_line() {
        let line = format!("{EMPTY_BLOB} refs/heads/main");
        let oid = ObjectId::from_hex_prefix(line.as_bytes(), HashAlgorithm::Sha1).unwrap();
        assert_eq!(oid.to_hex(), EMPTY_BLOB);
        assert!(ObjectId::from_hex_prefix(b"e69de", HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn loose_path_splits_after_two_chars() {
        let oid = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(oid.loose_path(), format!("e6/{}", &EMPTY_BLOB[2..]));
    }

    #[test]
    fn debug_is_abbreviated() {
        let oid = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(format!("{oid:?}"), "ObjectId(e69de29bb2)");
    }

    proptest! {
        #[test]
        fn bytes_survive_hex(bytes in proptest::array::uniform32(any::<u8>())) {
            let oid = ObjectId::from_bytes(&bytes, HashAlgorithm::Sha256).unwrap();
            let parsed: ObjectId = oid.to_hex().parse().unwrap();
            prop_assert_eq!(parsed, oid);
        }
    }
}
