use std::collections::BTreeMap;
use thiserror::Error;
pub mod decoder;
pub mod encoder;

/**
 * Represents a Bencode value, which is the core data structure for the Bencode encoding format.
 * Bencode is commonly used in BitTorrent protocol for encoding metadata.
 *
 * The enum contains four variants that represent all possible Bencode data types:
 *
 * 1. Bytes(Vec<u8>):
 *    - Represents a byte string in Bencode
 *    - Stored as raw bytes (Vec<u8>) rather than UTF-8 strings
 *    - Example: "4:spam" in Bencode becomes Bytes(b"spam")
 *
 * 2. Integer(i64):
 *    - Represents a 64-bit signed integer
 *    - Bencode integers are prefixed with 'i' and suffixed with 'e'
 *    - Example: "i42e" in Bencode becomes Integer(42)
 *
 * 3. List(Vec<BencodeValue>):
 *    - Represents an ordered sequence of Bencode values
 *    - Lists are prefixed with 'l' and suffixed with 'e'
 *    - Example: "l4:spami42ee" becomes List([Bytes(b"spam"), Integer(42)])
 *
 * 4. Dict(BTreeMap<Vec<u8>, BencodeValue>):
 *    - Represents a key-value mapping where keys are byte strings
 *    - Dictionaries are prefixed with 'd' and suffixed with 'e'
 *    - Keys are stored in a BTreeMap so ascending byte order, which the
 *      encoder must emit, falls directly out of iteration order.
 *    - Example: "d3:foo3:bare" becomes Dict({b"foo" => Bytes(b"bar")})
 */
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BencodeValue {
    Bytes(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` in a dict value; `None` for non-dict values too.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

/// Maximum nesting depth for lists/dicts, bounding stack usage against
/// adversarial input.
pub const MAX_DEPTH: usize = 64;

/// Custom error type for Bencode operations. Decode errors carry the byte
/// offset at which the problem was detected, so callers can report useful
/// diagnostics without re-scanning the input.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BencodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("invalid integer format at offset {0}")]
    InvalidInteger(usize),

    #[error("invalid string length at offset {0}")]
    InvalidStringLength(usize),

    #[error("string at offset {0} declares length {1}, but only {2} bytes remain")]
    StringLengthOverrun(usize, usize, usize),

    #[error("unexpected byte {0:#04x} at offset {1}")]
    UnexpectedByte(u8, usize),

    #[error("duplicate dictionary key at offset {0}")]
    DuplicateKey(usize),

    #[error("dictionary keys out of ascending order at offset {0}")]
    KeysOutOfOrder(usize),

    #[error("maximum nesting depth ({0}) exceeded at offset {1}")]
    DepthExceeded(usize, usize),

    #[error("{0} trailing bytes after the top-level value")]
    TrailingBytes(usize),

    #[error("cannot encode: {0}")]
    CannotEncode(&'static str),
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_discriminate_variants() {
        let v = BencodeValue::Integer(42);
        assert_eq!(v.as_integer(), Some(42));
        assert_eq!(v.as_bytes(), None);
        assert_eq!(v.as_list(), None);
        assert_eq!(v.as_dict(), None);
    }
}
