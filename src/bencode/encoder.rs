use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_bytes<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len()).map_err(|_| BencodeError::CannotEncode("write failed"))?;
    writer
        .write_all(s)
        .map_err(|_| BencodeError::CannotEncode("write failed"))
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i).map_err(|_| BencodeError::CannotEncode("write failed"))
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer
        .write_all(b"l")
        .map_err(|_| BencodeError::CannotEncode("write failed"))?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer
        .write_all(b"e")
        .map_err(|_| BencodeError::CannotEncode("write failed"))
}

/// Encodes a dictionary. `BTreeMap` iteration is already in ascending byte
/// order, so the canonical-key-order requirement is free.
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &BTreeMap<Vec<u8>, BencodeValue>) -> BencodeResult<()> {
    writer
        .write_all(b"d")
        .map_err(|_| BencodeError::CannotEncode("write failed"))?;
    for (key, value) in dict {
        encode_bytes(writer, key)?;
        encode_value(writer, value)?;
    }
    writer
        .write_all(b"e")
        .map_err(|_| BencodeError::CannotEncode("write failed"))
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::Bytes(s) => encode_bytes(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

/// Encodes `value` to `writer` in canonical form.
#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

/// Convenience wrapper returning a freshly allocated buffer.
pub fn encode_to_vec(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::BencodeValue;
    use std::collections::BTreeMap;

    #[test]
    fn encodes_concrete_dict_example() {
        let mut dict = BTreeMap::new();
        dict.insert(b"cow".to_vec(), BencodeValue::Bytes(b"moo".to_vec()));
        dict.insert(b"spam".to_vec(), BencodeValue::Bytes(b"eggs".to_vec()));
        let encoded = encode_to_vec(&BencodeValue::Dict(dict)).unwrap();
        assert_eq!(encoded, b"d3:cow3:moo4:spam4:eggse");
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(
            encode_to_vec(&BencodeValue::Integer(42)).unwrap(),
            b"i42e"
        );
        assert_eq!(
            encode_to_vec(&BencodeValue::Integer(-1)).unwrap(),
            b"i-1e"
        );
    }

    #[test]
    fn encodes_list() {
        let list = BencodeValue::List(vec![
            BencodeValue::Integer(42),
            BencodeValue::Bytes(b"spam".to_vec()),
        ]);
        assert_eq!(encode_to_vec(&list).unwrap(), b"li42e4:spame");
    }
}
