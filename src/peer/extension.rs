//! BEP-10 extension protocol: the extended handshake (extended id 0) and
//! the per-peer `extension name -> id` table it establishes.
use super::PeerError;
use crate::bencode::{decoder, encoder, BencodeValue};
use std::collections::BTreeMap;

/// The local id we advertise for `ut_metadata`, per BEP-9.
pub const UT_METADATA_LOCAL_ID: u8 = 1;
pub const UT_METADATA_NAME: &[u8] = b"ut_metadata";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionHandshake {
    /// `extension name -> id the *sender* uses for it`.
    pub extensions: BTreeMap<Vec<u8>, i64>,
    pub metadata_size: Option<u64>,
}

impl ExtensionHandshake {
    /// The handshake this client sends: advertises `ut_metadata`, and
    /// `metadata_size` once the info dict's length is known.
    pub fn ours(metadata_size: Option<u64>) -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(UT_METADATA_NAME.to_vec(), UT_METADATA_LOCAL_ID as i64);
        ExtensionHandshake {
            extensions,
            metadata_size,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PeerError> {
        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(name.clone(), BencodeValue::Integer(*id));
        }
        let mut top = BTreeMap::new();
        top.insert(b"m".to_vec(), BencodeValue::Dict(m));
        if let Some(size) = self.metadata_size {
            top.insert(b"metadata_size".to_vec(), BencodeValue::Integer(size as i64));
        }
        Ok(encoder::encode_to_vec(&BencodeValue::Dict(top))?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let value = decoder::decode_exact(payload)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| crate::bencode::BencodeError::CannotEncode("extended handshake is not a dict"))?;
        let mut extensions = BTreeMap::new();
        if let Some(m) = dict.get(b"m".as_slice()).and_then(BencodeValue::as_dict) {
            for (name, id) in m {
                if let Some(id) = id.as_integer() {
                    extensions.insert(name.clone(), id);
                }
            }
        }
        let metadata_size = dict
            .get(b"metadata_size".as_slice())
            .and_then(BencodeValue::as_integer)
            .map(|n| n as u64);
        Ok(ExtensionHandshake {
            extensions,
            metadata_size,
        })
    }

    /// The remote peer's id for `ut_metadata`, if it advertised the
    /// extension at all.
    pub fn remote_ut_metadata_id(&self) -> Option<u8> {
        self.extensions.get(UT_METADATA_NAME).map(|&id| id as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn our_handshake_advertises_ut_metadata() {
        let hs = ExtensionHandshake::ours(Some(1024));
        assert_eq!(hs.metadata_size, Some(1024));
        assert_eq!(
            hs.extensions.get(UT_METADATA_NAME),
            Some(&(UT_METADATA_LOCAL_ID as i64))
        );
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let hs = ExtensionHandshake::ours(Some(2048));
        let bytes = hs.encode().unwrap();
        let decoded = ExtensionHandshake::decode(&bytes).unwrap();
        assert_eq!(decoded, hs);
        assert_eq!(decoded.remote_ut_metadata_id(), Some(UT_METADATA_LOCAL_ID));
    }

    #[test]
    fn peer_without_ut_metadata_reports_none() {
        let hs = ExtensionHandshake {
            extensions: BTreeMap::new(),
            metadata_size: None,
        };
        assert_eq!(hs.remote_ut_metadata_id(), None);
    }
}
