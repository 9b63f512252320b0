//! The 68-byte BitTorrent handshake: protocol identifier, reserved
//! extension-capability bits, info hash, and peer id.
use super::PeerError;
use crate::wire::InfoHash;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;
/// Reserved byte 5, LSB: BEP-10 extension protocol support.
const EXTENSION_BIT: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] = EXTENSION_BIT;
        Handshake {
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[5] & EXTENSION_BIT != 0
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self, PeerError> {
        if buf[0] != 19 || &buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidProtocol);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash_bytes = [0u8; 20];
        info_hash_bytes.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Handshake {
            reserved,
            info_hash: InfoHash::from_bytes(info_hash_bytes),
            peer_id,
        })
    }

    pub fn validate_info_hash(&self, expected: &InfoHash) -> Result<(), PeerError> {
        if &self.info_hash != expected {
            return Err(PeerError::InfoHashMismatch {
                expected: expected.to_hex(),
                got: self.info_hash.to_hex(),
            });
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn write(&self, stream: &mut TcpStream) -> Result<(), PeerError> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self, PeerError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> InfoHash {
        InfoHash::from_bytes([7u8; 20])
    }

    #[test]
    fn always_advertises_extension_support() {
        let h = Handshake::new(hash(), [1u8; 20]);
        assert!(h.supports_extensions());
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let h = Handshake::new(hash(), [2u8; 20]);
        let bytes = h.serialize();
        assert_eq!(Handshake::parse(&bytes).unwrap(), h);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new(hash(), [3u8; 20]).serialize();
        bytes[1] = b'X';
        assert!(matches!(Handshake::parse(&bytes), Err(PeerError::InvalidProtocol)));
    }

    #[test]
    fn validate_info_hash_rejects_mismatch() {
        let h = Handshake::new(hash(), [4u8; 20]);
        let other = InfoHash::from_bytes([9u8; 20]);
        assert!(matches!(
            h.validate_info_hash(&other),
            Err(PeerError::InfoHashMismatch { .. })
        ));
    }
}
