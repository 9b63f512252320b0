//! Compact peer/node address encodings shared by the tracker, DHT, and peer
//! wire protocols: 6 bytes of `IPv4 || port`, network byte order.
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

pub const COMPACT_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum PeerAddressError {
    #[error("compact peer address must be {COMPACT_LEN} bytes, got {0}")]
    WrongLength(usize),
}

/// An IPv4 peer address, compact-encodable to the 6-byte form BitTorrent
/// trackers and the DHT both use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(SocketAddrV4);

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        PeerAddress(SocketAddrV4::new(ip, port))
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        self.0
    }

    pub fn to_compact(&self) -> [u8; COMPACT_LEN] {
        let mut out = [0u8; COMPACT_LEN];
        out[..4].copy_from_slice(&self.0.ip().octets());
        out[4..].copy_from_slice(&self.0.port().to_be_bytes());
        out
    }

    pub fn from_compact(bytes: &[u8]) -> Result<Self, PeerAddressError> {
        if bytes.len() != COMPACT_LEN {
            return Err(PeerAddressError::WrongLength(bytes.len()));
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(PeerAddress::new(ip, port))
    }

    /// Parses a buffer of back-to-back 6-byte compact peers, as returned by
    /// trackers and `get_peers`' `values` list. Rejects a buffer whose
    /// length is not a multiple of 6 rather than silently truncating.
    pub fn parse_compact_list(bytes: &[u8]) -> Result<Vec<PeerAddress>, PeerAddressError> {
        if bytes.len() % COMPACT_LEN != 0 {
            return Err(PeerAddressError::WrongLength(bytes.len()));
        }
        bytes
            .chunks_exact(COMPACT_LEN)
            .map(Self::from_compact)
            .collect()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddrV4> for PeerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        PeerAddress(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trips() {
        let addr = PeerAddress::new(Ipv4Addr::new(192, 168, 1, 1), 6881);
        let compact = addr.to_compact();
        assert_eq!(PeerAddress::from_compact(&compact).unwrap(), addr);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            PeerAddress::from_compact(&[0u8; 5]),
            Err(PeerAddressError::WrongLength(5))
        ));
    }

    #[test]
    fn parses_multiple_compact_peers() {
        let a = PeerAddress::new(Ipv4Addr::new(1, 2, 3, 4), 100);
        let b = PeerAddress::new(Ipv4Addr::new(5, 6, 7, 8), 200);
        let mut buf = Vec::new();
        buf.extend_from_slice(&a.to_compact());
        buf.extend_from_slice(&b.to_compact());
        assert_eq!(PeerAddress::parse_compact_list(&buf).unwrap(), vec![a, b]);
    }
}
