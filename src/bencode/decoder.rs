use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use super::MAX_DEPTH;

use std::collections::BTreeMap;
use tracing::instrument;

/// Decodes a single Bencode value from the front of `input`.
///
/// Returns the decoded value together with the number of bytes consumed, so
/// callers can decode a sequence of back-to-back values (as tracker
/// responses and KRPC datagrams sometimes require) without slicing first.
/// Strict mode: duplicate or non-ascending dictionary keys are rejected.
///
/// # Errors
/// See [`BencodeError`] for the malformed forms this rejects: leading
/// zeros, `-0`, empty integers, string lengths that overrun the buffer,
/// unexpected bytes, and nesting deeper than [`MAX_DEPTH`].
#[instrument(skip(input), level = "trace")]
pub fn decode(input: &[u8]) -> BencodeResult<(BencodeValue, usize)> {
    let mut d = Decoder {
        input,
        pos: 0,
        strict: true,
    };
    let value = d.decode_value(0)?;
    Ok((value, d.pos))
}

/// As [`decode`], but duplicate dictionary keys overwrite the earlier
/// occurrence instead of being rejected, and keys need not arrive in
/// ascending order. Re-encoding a non-strict decode result is not
/// guaranteed to reproduce the original bytes.
#[instrument(skip(input), level = "trace")]
pub fn decode_lenient(input: &[u8]) -> BencodeResult<(BencodeValue, usize)> {
    let mut d = Decoder {
        input,
        pos: 0,
        strict: false,
    };
    let value = d.decode_value(0)?;
    Ok((value, d.pos))
}

/// Decodes exactly one value and requires the entire buffer to be consumed.
/// The shape most callers (metadata assembly, KRPC datagrams) actually want.
#[instrument(skip(input), level = "trace")]
pub fn decode_exact(input: &[u8]) -> BencodeResult<BencodeValue> {
    let (value, consumed) = decode(input)?;
    if consumed != input.len() {
        return Err(BencodeError::TrailingBytes(input.len() - consumed));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    strict: bool,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> BencodeResult<u8> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn decode_value(&mut self, depth: usize) -> BencodeResult<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::DepthExceeded(MAX_DEPTH, self.pos));
        }
        match self.peek()? {
            b'0'..=b'9' => self.decode_bytes().map(BencodeValue::Bytes),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list(depth).map(BencodeValue::List),
            b'd' => self.decode_dict(depth).map(BencodeValue::Dict),
            other => Err(BencodeError::UnexpectedByte(other, self.pos)),
        }
    }

    /// `<len>:<bytes>`.
    fn decode_bytes(&mut self) -> BencodeResult<Vec<u8>> {
        let start = self.pos;
        let colon = self.input[self.pos..]
            .iter()
            .position(|&b| b == b':')
            .map(|i| self.pos + i)
            .ok_or(BencodeError::UnexpectedEof(self.pos))?;
        let len_str = std::str::from_utf8(&self.input[self.pos..colon])
            .map_err(|_| BencodeError::InvalidStringLength(start))?;
        if len_str.is_empty() || (len_str.len() > 1 && len_str.starts_with('0')) {
            return Err(BencodeError::InvalidStringLength(start));
        }
        let len: usize = len_str
            .parse()
            .map_err(|_| BencodeError::InvalidStringLength(start))?;
        let data_start = colon + 1;
        let remaining = self.input.len().saturating_sub(data_start);
        if len > remaining {
            return Err(BencodeError::StringLengthOverrun(start, len, remaining));
        }
        let data = self.input[data_start..data_start + len].to_vec();
        self.pos = data_start + len;
        Ok(data)
    }

    /// `i<decimal>e`. Rejects leading zeros (except a lone `0`) and `-0`.
    fn decode_integer(&mut self) -> BencodeResult<i64> {
        let start = self.pos;
        debug_assert_eq!(self.peek()?, b'i');
        self.advance(1);
        let e = self.input[self.pos..]
            .iter()
            .position(|&b| b == b'e')
            .map(|i| self.pos + i)
            .ok_or(BencodeError::UnexpectedEof(self.pos))?;
        let num_str = std::str::from_utf8(&self.input[self.pos..e])
            .map_err(|_| BencodeError::InvalidInteger(start))?;

        if num_str.is_empty() {
            return Err(BencodeError::InvalidInteger(start));
        }
        if num_str == "-0" {
            return Err(BencodeError::InvalidInteger(start));
        }
        let digits = num_str.strip_prefix('-').unwrap_or(num_str);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BencodeError::InvalidInteger(start));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(BencodeError::InvalidInteger(start));
        }

        let value = num_str
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidInteger(start))?;
        self.advance(e - self.pos + 1);
        Ok(value)
    }

    /// `l...e`.
    fn decode_list(&mut self, depth: usize) -> BencodeResult<Vec<BencodeValue>> {
        debug_assert_eq!(self.peek()?, b'l');
        self.advance(1);
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(items);
            }
            items.push(self.decode_value(depth + 1)?);
        }
    }

    /// `d...e`. Keys must be Bencode byte strings; in strict mode they must
    /// arrive in strictly ascending order with no repeats.
    fn decode_dict(&mut self, depth: usize) -> BencodeResult<BTreeMap<Vec<u8>, BencodeValue>> {
        debug_assert_eq!(self.peek()?, b'd');
        self.advance(1);
        let mut dict = BTreeMap::new();
        let mut last_key: Option<Vec<u8>> = None;
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(dict);
            }
            let key_start = self.pos;
            let key = self.decode_bytes()?;
            if let Some(prev) = &last_key {
                match key.cmp(prev) {
                    std::cmp::Ordering::Equal => {
                        if self.strict {
                            return Err(BencodeError::DuplicateKey(key_start));
                        }
                    }
                    std::cmp::Ordering::Less if self.strict => {
                        return Err(BencodeError::KeysOutOfOrder(key_start));
                    }
                    _ => {}
                }
            }
            let value = self.decode_value(depth + 1)?;
            if dict.contains_key(&key) && self.strict {
                return Err(BencodeError::DuplicateKey(key_start));
            }
            last_key = Some(key.clone());
            dict.insert(key, value);
        }
    }
}
