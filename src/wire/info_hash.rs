//! 20-byte torrent identity: the SHA-1 of the bencoded `info` dictionary.
use data_encoding::BASE32;
use std::fmt;
use thiserror::Error;

pub const LEN: usize = 20;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum InfoHashError {
    #[error("info hash hex string must be 40 characters, got {0}")]
    WrongHexLength(usize),

    #[error("info hash hex string is not valid hex: {0}")]
    InvalidHex(String),

    #[error("info hash base32 string must be 32 characters, got {0}")]
    WrongBase32Length(usize),

    #[error("info hash base32 string is not valid base32")]
    InvalidBase32,

    #[error("info hash is all zero, which is not a valid torrent identity")]
    AllZero,
}

/// A 20-byte SHA-1 hash identifying a torrent's `info` dictionary.
///
/// Equality and ordering are lexicographic over the raw bytes, matching the
/// byte-order comparisons the DHT and peer protocols both rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; LEN]);

impl InfoHash {
    /// Constructs an `InfoHash` from raw bytes without validating
    /// non-zero-ness. Used internally once a hash has been computed, e.g.
    /// via SHA-1 over an assembled metadata blob.
    pub fn from_bytes(bytes: [u8; LEN]) -> Self {
        InfoHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LEN] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; LEN]
    }

    /// Parses a 40-character hex string (case-insensitive), as found in a
    /// magnet URI's `xt=urn:btih:` parameter.
    pub fn from_hex(s: &str) -> Result<Self, InfoHashError> {
        if s.len() != 40 {
            return Err(InfoHashError::WrongHexLength(s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| InfoHashError::InvalidHex(e.to_string()))?;
        let mut arr = [0u8; LEN];
        arr.copy_from_slice(&bytes);
        let hash = InfoHash(arr);
        if !hash.is_valid() {
            return Err(InfoHashError::AllZero);
        }
        Ok(hash)
    }

    /// Parses a 32-character Base32 string (RFC 4648, no padding), the
    /// alternate `xt=urn:btih:` encoding some magnet links use.
    pub fn from_base32(s: &str) -> Result<Self, InfoHashError> {
        if s.len() != 32 {
            return Err(InfoHashError::WrongBase32Length(s.len()));
        }
        let decoded = BASE32
            .decode(s.to_uppercase().as_bytes())
            .map_err(|_| InfoHashError::InvalidBase32)?;
        if decoded.len() != LEN {
            return Err(InfoHashError::InvalidBase32);
        }
        let mut arr = [0u8; LEN];
        arr.copy_from_slice(&decoded);
        let hash = InfoHash(arr);
        if !hash.is_valid() {
            return Err(InfoHashError::AllZero);
        }
        Ok(hash)
    }

    /// Accepts either the 40-hex or 32-base32 form, as a magnet URI's `xt`
    /// remainder may be either.
    pub fn parse(s: &str) -> Result<Self, InfoHashError> {
        match s.len() {
            40 => Self::from_hex(s),
            32 => Self::from_base32(s),
            other => Err(InfoHashError::WrongHexLength(other)),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_hex_is_invalid() {
        let zero = "0".repeat(40);
        assert_eq!(InfoHash::from_hex(&zero), Err(InfoHashError::AllZero));
    }

    #[test]
    fn hex_accepts_both_cases() {
        let lower = "a".repeat(40);
        let upper = "A".repeat(40);
        assert_eq!(
            InfoHash::from_hex(&lower).unwrap(),
            InfoHash::from_hex(&upper).unwrap()
        );
    }

    #[test]
    fn base32_decodes_to_same_bytes_as_hex_equivalent() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let hex = &hex[..40];
        let hash = InfoHash::from_hex(hex).unwrap();
        let base32 = BASE32.encode(hash.as_bytes());
        let base32 = base32.trim_end_matches('=');
        let from_b32 = InfoHash::from_base32(base32).unwrap();
        assert_eq!(hash, from_b32);
    }

    #[test]
    fn wrong_length_hex_is_rejected() {
        assert!(matches!(
            InfoHash::from_hex("abc"),
            Err(InfoHashError::WrongHexLength(3))
        ));
    }

    #[test]
    fn ordering_is_lexicographic_over_bytes() {
        let a = InfoHash::from_bytes([0u8; LEN]);
        let mut b = [0u8; LEN];
        b[19] = 1;
        let b = InfoHash::from_bytes(b);
        assert!(a < b);
    }
}
