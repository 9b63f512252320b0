//! BEP-9 `ut_metadata` exchange: request/data/reject messages and the
//! fetcher that assembles the `info` dict piece-by-piece across peers.
use super::PeerError;
use crate::bencode::{decoder, encoder, BencodeError, BencodeValue};
use crate::wire::InfoHash;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

/// Metadata is chunked into 16 KiB pieces, per BEP-9.
pub const METADATA_PIECE_LEN: usize = 16 * 1024;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_IN_FLIGHT_PER_PEER: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Request,
    Data,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub msg_type: MsgType,
    pub piece: u32,
    pub total_size: Option<u64>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        MetadataMessage {
            msg_type: MsgType::Request,
            piece,
            total_size: None,
        }
    }

    pub fn encode_with_data(&self, data: &[u8]) -> Result<Vec<u8>, PeerError> {
        let mut top = self.encode_dict_only()?;
        top.extend_from_slice(data);
        Ok(top)
    }

    fn encode_dict_only(&self) -> Result<Vec<u8>, PeerError> {
        let mut dict = BTreeMap::new();
        let type_int = match self.msg_type {
            MsgType::Request => 0,
            MsgType::Data => 1,
            MsgType::Reject => 2,
        };
        dict.insert(b"msg_type".to_vec(), BencodeValue::Integer(type_int));
        dict.insert(b"piece".to_vec(), BencodeValue::Integer(self.piece as i64));
        if let Some(size) = self.total_size {
            dict.insert(b"total_size".to_vec(), BencodeValue::Integer(size as i64));
        }
        Ok(encoder::encode_to_vec(&BencodeValue::Dict(dict))?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PeerError> {
        self.encode_dict_only()
    }

    /// Decodes the leading Bencode dict and returns it together with the
    /// trailing raw bytes (the piece payload for `Data` messages).
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8]), PeerError> {
        let (value, consumed) = decoder::decode(payload)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| BencodeError::CannotEncode("metadata message is not a dict"))?;
        let type_int = dict
            .get(b"msg_type".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| BencodeError::CannotEncode("missing msg_type"))?;
        let msg_type = match type_int {
            0 => MsgType::Request,
            1 => MsgType::Data,
            2 => MsgType::Reject,
            _ => return Err(BencodeError::CannotEncode("unknown msg_type").into()),
        };
        let piece = dict
            .get(b"piece".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| BencodeError::CannotEncode("missing piece"))? as u32;
        let total_size = dict
            .get(b"total_size".as_slice())
            .and_then(BencodeValue::as_integer)
            .map(|n| n as u64);
        Ok((
            MetadataMessage {
                msg_type,
                piece,
                total_size,
            },
            &payload[consumed..],
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceState {
    Needed,
    InFlight,
    Have,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    peer: usize,
    sent_at: Instant,
}

/// Assembles the `info` dict by round-robin dispatch of piece requests
/// across peers that have advertised `ut_metadata` and a `metadata_size`.
pub struct MetadataFetcher {
    info_hash: InfoHash,
    total_size: u64,
    num_pieces: usize,
    piece_state: Vec<PieceState>,
    buffer: Vec<u8>,
    in_flight: HashMap<u32, InFlight>,
    per_peer_in_flight: HashMap<usize, usize>,
    blacklist: HashMap<u32, HashSet<usize>>,
    next_peer_cursor: usize,
}

impl MetadataFetcher {
    pub fn new(info_hash: InfoHash, total_size: u64) -> Self {
        let num_pieces = ((total_size as usize) + METADATA_PIECE_LEN - 1) / METADATA_PIECE_LEN;
        MetadataFetcher {
            info_hash,
            total_size,
            num_pieces,
            piece_state: vec![PieceState::Needed; num_pieces],
            buffer: vec![0u8; total_size as usize],
            in_flight: HashMap::new(),
            per_peer_in_flight: HashMap::new(),
            blacklist: HashMap::new(),
            next_peer_cursor: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.piece_state.iter().all(|s| *s == PieceState::Have)
    }

    /// Picks the next (piece, peer) pair to request, respecting each
    /// peer's in-flight cap and any per-piece blacklist, round-robin over
    /// `capable_peers`.
    pub fn next_request(&mut self, capable_peers: &[usize], now: Instant) -> Option<(u32, usize)> {
        if capable_peers.is_empty() {
            return None;
        }
        for piece_idx in 0..self.num_pieces {
            if self.piece_state[piece_idx] != PieceState::Needed {
                continue;
            }
            let blacklisted = self.blacklist.get(&(piece_idx as u32));
            for offset in 0..capable_peers.len() {
                let candidate_idx = (self.next_peer_cursor + offset) % capable_peers.len();
                let peer = capable_peers[candidate_idx];
                if blacklisted.is_some_and(|b| b.contains(&peer)) {
                    continue;
                }
                let in_flight_count = *self.per_peer_in_flight.get(&peer).unwrap_or(&0);
                if in_flight_count >= MAX_IN_FLIGHT_PER_PEER {
                    continue;
                }
                self.next_peer_cursor = (candidate_idx + 1) % capable_peers.len();
                self.piece_state[piece_idx] = PieceState::InFlight;
                self.in_flight.insert(piece_idx as u32, InFlight { peer, sent_at: now });
                *self.per_peer_in_flight.entry(peer).or_insert(0) += 1;
                return Some((piece_idx as u32, peer));
            }
        }
        None
    }

    fn release_in_flight(&mut self, piece: u32) {
        if let Some(req) = self.in_flight.remove(&piece) {
            if let Some(count) = self.per_peer_in_flight.get_mut(&req.peer) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn on_data(&mut self, piece: u32, data: &[u8]) -> Result<(), PeerError> {
        self.release_in_flight(piece);
        let start = piece as usize * METADATA_PIECE_LEN;
        let end = (start + data.len()).min(self.buffer.len());
        self.buffer[start..end].copy_from_slice(&data[..end - start]);
        self.piece_state[piece as usize] = PieceState::Have;
        Ok(())
    }

    pub fn on_reject_or_timeout(&mut self, piece: u32) {
        if let Some(req) = self.in_flight.get(&piece) {
            self.blacklist.entry(piece).or_default().insert(req.peer);
        }
        self.release_in_flight(piece);
        self.piece_state[piece as usize] = PieceState::Needed;
    }

    /// Requests whose deadline has elapsed, so the caller can blacklist and
    /// re-dispatch them.
    pub fn expired_requests(&self, now: Instant) -> Vec<u32> {
        self.in_flight
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) >= REQUEST_TIMEOUT)
            .map(|(piece, _)| *piece)
            .collect()
    }

    /// Once every piece has arrived: verifies the SHA-1 of the assembled
    /// blob against the session's info hash and, on success, Bencode-decodes
    /// it to the `info` dict. On mismatch, every piece is reset to
    /// `Needed` and every contributing peer is blacklisted for every
    /// piece, forcing a full restart.
    pub fn finish(&mut self) -> Result<BencodeValue, PeerError> {
        debug_assert!(self.is_complete());
        let mut hasher = Sha1::new();
        hasher.update(&self.buffer);
        let digest = hasher.finalize();
        if digest.as_slice() != self.info_hash.as_bytes() {
            for state in self.piece_state.iter_mut() {
                *state = PieceState::Needed;
            }
            self.buffer = vec![0u8; self.total_size as usize];
            return Err(BencodeError::CannotEncode("assembled metadata hash mismatch").into());
        }
        Ok(decoder::decode_exact(&self.buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_round_robin_respecting_in_flight_cap() {
        let mut fetcher = MetadataFetcher::new(InfoHash::from_bytes([1u8; 20]), (METADATA_PIECE_LEN * 3) as u64);
        let peers = [0usize, 1];
        let now = Instant::now();
        let mut dispatched = Vec::new();
        while let Some((piece, peer)) = fetcher.next_request(&peers, now) {
            dispatched.push((piece, peer));
        }
        assert_eq!(dispatched.len(), 3);
    }

    #[test]
    fn rejected_piece_is_blacklisted_and_redispatched_elsewhere() {
        let mut fetcher = MetadataFetcher::new(InfoHash::from_bytes([1u8; 20]), METADATA_PIECE_LEN as u64);
        let peers = [0usize, 1];
        let now = Instant::now();
        let (piece, peer) = fetcher.next_request(&peers, now).unwrap();
        fetcher.on_reject_or_timeout(piece);
        let (piece2, peer2) = fetcher.next_request(&peers, now).unwrap();
        assert_eq!(piece, piece2);
        assert_ne!(peer, peer2);
    }

    #[test]
    fn expired_requests_are_detected_after_timeout() {
        let mut fetcher = MetadataFetcher::new(InfoHash::from_bytes([1u8; 20]), METADATA_PIECE_LEN as u64);
        let now = Instant::now();
        let (piece, _peer) = fetcher.next_request(&[0], now).unwrap();
        assert!(fetcher.expired_requests(now).is_empty());
        let later = now + REQUEST_TIMEOUT + Duration::from_secs(1);
        assert_eq!(fetcher.expired_requests(later), vec![piece]);
    }

    #[test]
    fn complete_assembly_with_matching_hash_decodes() {
        let info_bytes = b"d4:spam4:eggse".to_vec();
        let mut hasher = Sha1::new();
        hasher.update(&info_bytes);
        let hash: [u8; 20] = hasher.finalize().into();
        let mut fetcher = MetadataFetcher::new(InfoHash::from_bytes(hash), info_bytes.len() as u64);
        let now = Instant::now();
        let (piece, _peer) = fetcher.next_request(&[0], now).unwrap();
        fetcher.on_data(piece, &info_bytes).unwrap();
        assert!(fetcher.is_complete());
        let decoded = fetcher.finish().unwrap();
        assert_eq!(decoded.get(b"spam".as_slice()).and_then(BencodeValue::as_bytes), Some(b"eggs".as_slice()));
    }

    #[test]
    fn mismatched_hash_resets_all_pieces() {
        let info_bytes = b"d4:spam4:eggse".to_vec();
        let mut fetcher = MetadataFetcher::new(InfoHash::from_bytes([9u8; 20]), info_bytes.len() as u64);
        let now = Instant::now();
        let (piece, _peer) = fetcher.next_request(&[0], now).unwrap();
        fetcher.on_data(piece, &info_bytes).unwrap();
        assert!(fetcher.finish().is_err());
        assert!(!fetcher.is_complete());
    }

    #[test]
    fn metadata_message_round_trips_through_bencode() {
        let msg = MetadataMessage {
            msg_type: MsgType::Data,
            piece: 2,
            total_size: Some(40000),
        };
        let bytes = msg.encode_with_data(b"hello").unwrap();
        let (decoded, rest) = MetadataMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(rest, b"hello");
    }
}
