//! Per-peer connection state: handshake progress, choke/interest flags,
//! bitfield, and outstanding block requests.
use super::extension::ExtensionHandshake;
use super::message::PeerMessage;
use crate::wire::PeerAddress;
use std::collections::HashSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

/// Per-peer outgoing queue cap; the connection is dropped on overflow
/// rather than growing unbounded.
pub const OUTGOING_QUEUE_CAP: usize = 64;

pub struct PeerConnection {
    pub addr: PeerAddress,
    pub state: PeerState,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub bitfield: Vec<bool>,
    pub extension_handshake: Option<ExtensionHandshake>,
    pub outstanding_requests: HashSet<BlockRequest>,
    pub last_activity_at: Instant,
    pub strikes: u32,
    outgoing_queue_len: usize,
}

impl PeerConnection {
    pub fn new(addr: PeerAddress, now: Instant) -> Self {
        PeerConnection {
            addr,
            state: PeerState::Connecting,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            bitfield: Vec::new(),
            extension_handshake: None,
            outstanding_requests: HashSet::new(),
            last_activity_at: now,
            strikes: 0,
            outgoing_queue_len: 0,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = now;
    }

    pub fn mark_ready(&mut self) {
        self.state = PeerState::Ready;
    }

    pub fn close(&mut self) {
        self.state = PeerState::Closed;
        self.outstanding_requests.clear();
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.get(index).copied().unwrap_or(false)
    }

    pub fn set_bitfield(&mut self, bits: &[u8], num_pieces: usize) {
        self.bitfield = (0..num_pieces)
            .map(|i| {
                let byte = bits.get(i / 8).copied().unwrap_or(0);
                (byte >> (7 - (i % 8))) & 1 == 1
            })
            .collect();
    }

    pub fn set_have(&mut self, index: usize) {
        if index >= self.bitfield.len() {
            self.bitfield.resize(index + 1, false);
        }
        self.bitfield[index] = true;
    }

    /// `true` once enough slots remain for another request under the
    /// per-peer pipeline window `w`.
    pub fn can_request_more(&self, w: usize) -> bool {
        !self.peer_choking && self.outstanding_requests.len() < w
    }

    pub fn add_outstanding(&mut self, req: BlockRequest) -> bool {
        self.outstanding_requests.insert(req)
    }

    pub fn remove_outstanding(&mut self, req: &BlockRequest) -> bool {
        self.outstanding_requests.remove(req)
    }

    /// Drops any outstanding request for `(piece, offset)` regardless of
    /// its recorded length, for callers (like request expiry) that don't
    /// have the original length on hand.
    pub fn remove_outstanding_at(&mut self, piece: u32, offset: u32) {
        self.outstanding_requests.retain(|r| !(r.piece == piece && r.offset == offset));
    }

    pub fn add_strike(&mut self) -> u32 {
        self.strikes += 1;
        self.strikes
    }

    pub const MAX_STRIKES: u32 = 3;

    pub fn should_disconnect(&self) -> bool {
        self.strikes >= Self::MAX_STRIKES
    }

    /// Queues an outgoing message subject to [`OUTGOING_QUEUE_CAP`].
    /// Returns `false` (and leaves the queue length unchanged) once full —
    /// the caller must then drop the connection.
    pub fn try_enqueue(&mut self, _msg: &PeerMessage) -> bool {
        if self.outgoing_queue_len >= OUTGOING_QUEUE_CAP {
            return false;
        }
        self.outgoing_queue_len += 1;
        true
    }

    pub fn dequeued_one(&mut self) {
        self.outgoing_queue_len = self.outgoing_queue_len.saturating_sub(1);
    }
}
