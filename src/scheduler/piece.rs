//! Piece/block state, rarest-first selection, and hash verification.
use super::{SchedulerError, SchedulerResult};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const BLOCK_LEN: u32 = 16 * 1024;
pub const DEFAULT_WINDOW: usize = 5;
pub const MAX_WINDOW: usize = 16;
pub const BLOCK_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    Missing,
    InFlight,
    Have,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Needed,
    Requested { peer: usize, at: Instant },
    Received,
}

/// Outcome of a piece reaching every block received.
pub enum PieceOutcome {
    Verified { piece: u32, data: Vec<u8> },
    Mismatch { piece: u32, strikes: Vec<usize> },
}

struct Piece {
    length: u32,
    blocks: Vec<BlockState>,
    state: PieceState,
    buffer: Vec<u8>,
    contributors: HashSet<usize>,
}

impl Piece {
    fn new(length: u32) -> Self {
        let num_blocks = num_blocks_for(length);
        Piece {
            length,
            blocks: vec![BlockState::Needed; num_blocks],
            state: PieceState::Missing,
            buffer: vec![0u8; length as usize],
            contributors: HashSet::new(),
        }
    }

    fn block_len(&self, block_idx: usize) -> u32 {
        let start = block_idx as u32 * BLOCK_LEN;
        (self.length - start).min(BLOCK_LEN)
    }

    fn is_fully_received(&self) -> bool {
        self.blocks.iter().all(|b| matches!(b, BlockState::Received))
    }

    fn reset(&mut self) {
        self.blocks.iter_mut().for_each(|b| *b = BlockState::Needed);
        self.buffer = vec![0u8; self.length as usize];
        self.contributors.clear();
        self.state = PieceState::Missing;
    }
}

fn num_blocks_for(piece_len: u32) -> usize {
    ((piece_len + BLOCK_LEN - 1) / BLOCK_LEN) as usize
}

/// Owns every piece's block state, per-piece peer availability counts, and
/// assembly buffers. Does not own sockets or peer connections; the caller
/// feeds in bitfields/haves and received blocks and acts on the results.
pub struct PieceSet {
    hashes: Vec<[u8; 20]>,
    piece_length: i64,
    total_length: i64,
    pieces: Vec<Piece>,
    availability: Vec<usize>,
}

impl PieceSet {
    pub fn new(hashes: Vec<[u8; 20]>, piece_length: i64, total_length: i64) -> Self {
        let n = hashes.len();
        let pieces = (0..n)
            .map(|i| Piece::new(piece_size(i, n, piece_length, total_length) as u32))
            .collect();
        PieceSet {
            hashes,
            piece_length,
            total_length,
            pieces,
            availability: vec![0; n],
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.hashes.len()
    }

    pub fn piece_state(&self, index: usize) -> PieceState {
        self.pieces[index].state
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.state == PieceState::Verified)
    }

    pub fn remaining(&self) -> usize {
        self.pieces.iter().filter(|p| p.state != PieceState::Verified).count()
    }

    pub fn on_peer_have(&mut self, piece: usize) {
        if piece < self.availability.len() {
            self.availability[piece] += 1;
        }
    }

    pub fn on_peer_bitfield(&mut self, bits: &[bool]) {
        for (i, has) in bits.iter().enumerate() {
            if *has {
                self.on_peer_have(i);
            }
        }
    }

    pub fn on_peer_removed(&mut self, bits: &[bool], peer: usize, now: Instant) {
        for (i, has) in bits.iter().enumerate() {
            if *has && i < self.availability.len() {
                self.availability[i] = self.availability[i].saturating_sub(1);
            }
        }
        for piece in &mut self.pieces {
            for block in &mut piece.blocks {
                if let BlockState::Requested { peer: p, .. } = block {
                    if *p == peer {
                        *block = BlockState::Needed;
                    }
                }
            }
        }
        let _ = now;
    }

    /// Rarest-first selection among pieces `has_piece` reports the peer
    /// holds: picks the lowest-availability piece with a `Needed` block.
    pub fn pick_block(&mut self, peer: usize, has_piece: impl Fn(usize) -> bool, now: Instant) -> Option<(u32, u32, u32)> {
        let mut order: Vec<usize> = (0..self.pieces.len())
            .filter(|&i| self.pieces[i].state != PieceState::Verified && has_piece(i))
            .collect();
        order.sort_by_key(|&i| self.availability[i]);
        for piece_idx in order {
            let piece = &mut self.pieces[piece_idx];
            if let Some(block_idx) = piece.blocks.iter().position(|b| *b == BlockState::Needed) {
                piece.blocks[block_idx] = BlockState::Requested { peer, at: now };
                piece.state = PieceState::InFlight;
                let offset = block_idx as u32 * BLOCK_LEN;
                let length = piece.block_len(block_idx);
                return Some((piece_idx as u32, offset, length));
            }
        }
        None
    }

    pub fn on_block(&mut self, piece_idx: u32, offset: u32, data: &[u8], peer: usize) -> SchedulerResult<Option<PieceOutcome>> {
        let piece = self
            .pieces
            .get_mut(piece_idx as usize)
            .ok_or(SchedulerError::PieceOutOfRange(piece_idx))?;
        let block_idx = (offset / BLOCK_LEN) as usize;
        if block_idx >= piece.blocks.len() || offset % BLOCK_LEN != 0 {
            return Err(SchedulerError::BadBlockOffset { piece: piece_idx, offset });
        }
        let start = offset as usize;
        let end = (start + data.len()).min(piece.buffer.len());
        piece.buffer[start..end].copy_from_slice(&data[..end - start]);
        piece.blocks[block_idx] = BlockState::Received;
        piece.contributors.insert(peer);

        if !piece.is_fully_received() {
            return Ok(None);
        }
        let mut hasher = Sha1::new();
        hasher.update(&piece.buffer);
        let digest: [u8; 20] = hasher.finalize().into();
        if digest == self.hashes[piece_idx as usize] {
            piece.state = PieceState::Verified;
            let data = piece.buffer.clone();
            Ok(Some(PieceOutcome::Verified { piece: piece_idx, data }))
        } else {
            let strikes: Vec<usize> = piece.contributors.iter().copied().collect();
            piece.reset();
            Ok(Some(PieceOutcome::Mismatch { piece: piece_idx, strikes }))
        }
    }

    /// Block requests whose deadline has elapsed: returned to `Needed` and
    /// reported as `(piece, offset, peer)` so the caller can release the
    /// peer's outstanding-request slot.
    pub fn expire_requests(&mut self, now: Instant) -> Vec<(u32, u32, usize)> {
        let mut expired = Vec::new();
        for (piece_idx, piece) in self.pieces.iter_mut().enumerate() {
            for (block_idx, block) in piece.blocks.iter_mut().enumerate() {
                if let BlockState::Requested { peer, at } = *block {
                    if now.duration_since(at) >= BLOCK_DEADLINE {
                        *block = BlockState::Needed;
                        expired.push((piece_idx as u32, block_idx as u32 * BLOCK_LEN, peer));
                    }
                }
            }
        }
        expired
    }

    pub fn piece_length(&self) -> i64 {
        self.piece_length
    }

    pub fn total_length(&self) -> i64 {
        self.total_length
    }
}

fn piece_size(index: usize, num_pieces: usize, piece_length: i64, total_length: i64) -> i64 {
    if index < num_pieces - 1 {
        piece_length
    } else {
        let full = (num_pieces - 1) as i64 * piece_length;
        let last = total_length - full;
        if last <= 0 {
            piece_length
        } else {
            last
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut h = Sha1::new();
        h.update(data);
        h.finalize().into()
    }

    #[test]
    fn rarest_first_prefers_lower_availability() {
        let a = vec![1u8; 4];
        let b = vec![2u8; 4];
        let mut set = PieceSet::new(vec![hash_of(&a), hash_of(&b)], 4, 8);
        set.on_peer_have(0);
        set.on_peer_have(0);
        set.on_peer_have(1);
        let now = Instant::now();
        let (piece, _, _) = set.pick_block(0, |_| true, now).unwrap();
        assert_eq!(piece, 1);
    }

    #[test]
    fn completing_a_piece_with_matching_hash_verifies_it() {
        let data = vec![9u8; 4];
        let mut set = PieceSet::new(vec![hash_of(&data)], 4, 4);
        let now = Instant::now();
        let (piece, offset, _) = set.pick_block(0, |_| true, now).unwrap();
        let outcome = set.on_block(piece, offset, &data, 0).unwrap().unwrap();
        assert!(matches!(outcome, PieceOutcome::Verified { .. }));
        assert_eq!(set.piece_state(0), PieceState::Verified);
    }

    #[test]
    fn mismatched_piece_resets_blocks_and_strikes_contributors() {
        let data = vec![9u8; 4];
        let wrong_hash = hash_of(b"not it");
        let mut set = PieceSet::new(vec![wrong_hash], 4, 4);
        let now = Instant::now();
        let (piece, offset, _) = set.pick_block(7, |_| true, now).unwrap();
        let outcome = set.on_block(piece, offset, &data, 7).unwrap().unwrap();
        match outcome {
            PieceOutcome::Mismatch { strikes, .. } => assert_eq!(strikes, vec![7]),
            _ => panic!("expected mismatch"),
        }
        assert_eq!(set.piece_state(0), PieceState::Missing);
    }

    #[test]
    fn expired_requests_return_to_needed() {
        let data = vec![0u8; 4];
        let mut set = PieceSet::new(vec![hash_of(&data)], 4, 4);
        let now = Instant::now();
        set.pick_block(1, |_| true, now).unwrap();
        let later = now + BLOCK_DEADLINE + Duration::from_secs(1);
        let expired = set.expire_requests(later);
        assert_eq!(expired, vec![(0, 0, 1)]);
    }

    #[test]
    fn removing_a_peer_frees_its_outstanding_blocks() {
        let data = vec![0u8; 4];
        let mut set = PieceSet::new(vec![hash_of(&data)], 4, 4);
        let now = Instant::now();
        set.pick_block(3, |_| true, now).unwrap();
        set.on_peer_removed(&[true], 3, now);
        let (piece, offset, _) = set.pick_block(4, |_| true, now).unwrap();
        assert_eq!((piece, offset), (0, 0));
    }
}
