//! Iterative node/peer lookup: the alpha=3, k=8 Kademlia walk that both
//! `find_node` bootstrapping and `get_peers` peer discovery drive.
use crate::wire::{InfoHash, NodeId, PeerAddress};
use std::collections::HashSet;

pub const ALPHA: usize = 3;
pub const K: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Unqueried,
    Queried,
    Responded,
}

#[derive(Debug, Clone)]
struct Candidate {
    id: NodeId,
    addr: PeerAddress,
    distance: [u8; 20],
    state: CandidateState,
}

/// Drives one iterative lookup toward `target`. Owns its shortlist and is
/// fed responses by the caller; it never touches the network itself.
pub struct Lookup {
    target: NodeId,
    info_hash: Option<InfoHash>,
    candidates: Vec<Candidate>,
    seen: HashSet<NodeId>,
    is_get_peers: bool,
    collected_peers: Vec<PeerAddress>,
    collected_tokens: Vec<(NodeId, Vec<u8>)>,
    done: bool,
    closest_distance: Option<[u8; 20]>,
    stalled: bool,
}

impl Lookup {
    pub fn new_find_node(target: NodeId, seeds: Vec<(NodeId, PeerAddress)>) -> Self {
        Self::new(target, None, seeds, false)
    }

    /// `info_hash` is carried alongside `target` (its numeric NodeId form)
    /// so `get_peers` queries sent while driving this lookup can put the
    /// real torrent hash on the wire.
    pub fn new_get_peers(target: NodeId, info_hash: InfoHash, seeds: Vec<(NodeId, PeerAddress)>) -> Self {
        Self::new(target, Some(info_hash), seeds, true)
    }

    fn new(target: NodeId, info_hash: Option<InfoHash>, seeds: Vec<(NodeId, PeerAddress)>, is_get_peers: bool) -> Self {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (id, addr) in seeds {
            if seen.insert(id) {
                candidates.push(Candidate {
                    id,
                    addr,
                    distance: target.distance(&id),
                    state: CandidateState::Unqueried,
                });
            }
        }
        let mut lookup = Lookup {
            target,
            info_hash,
            candidates,
            seen,
            is_get_peers,
            collected_peers: Vec::new(),
            collected_tokens: Vec::new(),
            done: false,
            closest_distance: None,
            stalled: false,
        };
        lookup.sort_and_trim();
        lookup.closest_distance = lookup.candidates.first().map(|c| c.distance);
        lookup
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn info_hash(&self) -> Option<InfoHash> {
        self.info_hash
    }

    fn sort_and_trim(&mut self) {
        self.candidates.sort_by(|a, b| a.distance.cmp(&b.distance));
        // Keep more than K around so a better node discovered late can still
        // be queried, but bound growth.
        self.candidates.truncate(K * 4);
    }

    /// Up to `ALPHA` unqueried candidates to send queries to right now.
    pub fn next_batch(&mut self) -> Vec<(NodeId, PeerAddress)> {
        let mut batch = Vec::new();
        for c in self.candidates.iter_mut() {
            if batch.len() >= ALPHA {
                break;
            }
            if c.state == CandidateState::Unqueried {
                c.state = CandidateState::Queried;
                batch.push((c.id, c.addr));
            }
        }
        batch
    }

    /// Folds in a `find_node`/`get_peers`-with-nodes response.
    pub fn on_nodes_response(&mut self, from: &NodeId, nodes: Vec<(NodeId, PeerAddress)>) {
        self.mark_responded(from);
        for (id, addr) in nodes {
            if self.seen.insert(id) {
                self.candidates.push(Candidate {
                    id,
                    addr,
                    distance: self.target.distance(&id),
                    state: CandidateState::Unqueried,
                });
            }
        }
        self.sort_and_trim();
    }

    /// Folds in a `get_peers` response carrying a token and, when present,
    /// compact peer values.
    pub fn on_get_peers_response(
        &mut self,
        from: &NodeId,
        token: Vec<u8>,
        values: Vec<PeerAddress>,
        nodes: Vec<(NodeId, PeerAddress)>,
    ) {
        self.collected_tokens.push((*from, token));
        self.collected_peers.extend(values);
        self.on_nodes_response(from, nodes);
    }

    pub fn on_timeout(&mut self, from: &NodeId) {
        if let Some(c) = self.candidates.iter_mut().find(|c| &c.id == from) {
            // leave as Queried; it simply never contributes further nodes
            let _ = c;
        }
    }

    fn mark_responded(&mut self, id: &NodeId) {
        if let Some(c) = self.candidates.iter_mut().find(|c| &c.id == id) {
            c.state = CandidateState::Responded;
        }
    }

    /// Call once per round, after that round's responses (or its timeout)
    /// have all been folded in, so the "no closer candidate" termination
    /// check has something to compare against on the next round.
    pub fn end_round(&mut self) {
        let current = self.candidates.first().map(|c| c.distance);
        self.stalled = match (current, self.closest_distance) {
            (Some(cur), Some(prev)) => cur >= prev,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if current.is_some() {
            self.closest_distance = current;
        }
    }

    /// True once the `K` closest candidates have all been queried (and
    /// therefore either responded or timed out) and the most recent round
    /// turned up no candidate closer than the best already known — the
    /// standard Kademlia termination condition.
    pub fn is_converged(&self) -> bool {
        self.stalled
            && self
                .candidates
                .iter()
                .take(K)
                .all(|c| c.state != CandidateState::Unqueried)
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done || self.is_converged()
    }

    pub fn closest_k(&self) -> Vec<(NodeId, PeerAddress)> {
        self.candidates.iter().take(K).map(|c| (c.id, c.addr)).collect()
    }

    /// The closest `K` candidates that actually responded, in distance
    /// order — the set `announce_peer` gets fanned out to once a `get_peers`
    /// lookup finishes.
    pub fn responded_closest_k(&self) -> Vec<(NodeId, PeerAddress)> {
        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Responded)
            .take(K)
            .map(|c| (c.id, c.addr))
            .collect()
    }

    pub fn collected_peers(&self) -> &[PeerAddress] {
        &self.collected_peers
    }

    pub fn collected_tokens(&self) -> &[(NodeId, Vec<u8>)] {
        &self.collected_tokens
    }

    pub fn is_get_peers(&self) -> bool {
        self.is_get_peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> PeerAddress {
        PeerAddress::new(Ipv4Addr::new(10, 0, 0, n), 6881)
    }

    #[test]
    fn next_batch_caps_at_alpha() {
        let target = NodeId::random();
        let seeds: Vec<_> = (0..5u8).map(|i| (NodeId::random(), addr(i))).collect();
        let mut lookup = Lookup::new_find_node(target, seeds);
        let batch = lookup.next_batch();
        assert_eq!(batch.len(), ALPHA);
    }

    #[test]
    fn discovered_nodes_are_deduplicated() {
        let target = NodeId::random();
        let seed_id = NodeId::random();
        let mut lookup = Lookup::new_find_node(target, vec![(seed_id, addr(1))]);
        lookup.next_batch();
        lookup.on_nodes_response(&seed_id, vec![(seed_id, addr(1)), (NodeId::random(), addr(2))]);
        assert_eq!(lookup.candidates.len(), 2);
    }

    #[test]
    fn converges_once_k_closest_all_queried_and_a_round_finds_nothing_closer() {
        let target = NodeId::random();
        let seeds: Vec<_> = (0..K as u8).map(|i| (NodeId::random(), addr(i))).collect();
        let mut lookup = Lookup::new_find_node(target, seeds);
        assert!(!lookup.is_converged());
        loop {
            let batch = lookup.next_batch();
            if batch.is_empty() {
                break;
            }
            for (id, _) in batch {
                lookup.on_nodes_response(&id, vec![]);
            }
            lookup.end_round();
        }
        assert!(lookup.is_converged());
    }

    #[test]
    fn a_closer_node_found_mid_round_defers_convergence() {
        let target = NodeId::random();
        // Fewer seeds than K so a single batch queries all of them, and the
        // "K closest all queried" half of convergence is trivially true.
        let seeds: Vec<_> = (0..ALPHA as u8).map(|i| (NodeId::random(), addr(i))).collect();
        let mut lookup = Lookup::new_find_node(target, seeds);
        let batch = lookup.next_batch();
        for (id, _) in &batch {
            // Respond with a fresh node at the exact target: the closest
            // possible distance, so the round is not stalled.
            lookup.on_nodes_response(id, vec![(target, addr(200))]);
        }
        lookup.end_round();
        assert!(!lookup.is_converged(), "a strictly closer candidate appeared, so the round wasn't stalled");
    }

    #[test]
    fn get_peers_carries_the_real_info_hash() {
        let target = NodeId::random();
        let info_hash = InfoHash::from_bytes([7u8; 20]);
        let seed_id = NodeId::random();
        let lookup = Lookup::new_get_peers(target, info_hash, vec![(seed_id, addr(1))]);
        assert_eq!(lookup.target(), target);
        assert_eq!(lookup.info_hash(), Some(info_hash));
    }

    #[test]
    fn get_peers_collects_values_and_tokens() {
        let target = NodeId::random();
        let info_hash = InfoHash::from_bytes([1u8; 20]);
        let seed_id = NodeId::random();
        let mut lookup = Lookup::new_get_peers(target, info_hash, vec![(seed_id, addr(1))]);
        lookup.next_batch();
        lookup.on_get_peers_response(&seed_id, b"tok".to_vec(), vec![addr(9)], vec![]);
        assert_eq!(lookup.collected_peers(), &[addr(9)]);
        assert_eq!(lookup.collected_tokens(), &[(seed_id, b"tok".to_vec())]);
    }

    #[test]
    fn responded_closest_k_excludes_unqueried_and_timed_out_candidates() {
        let target = NodeId::random();
        let info_hash = InfoHash::from_bytes([2u8; 20]);
        let responder = NodeId::random();
        let silent = NodeId::random();
        let mut lookup = Lookup::new_get_peers(target, info_hash, vec![(responder, addr(1)), (silent, addr(2))]);
        lookup.next_batch();
        lookup.on_get_peers_response(&responder, b"tok".to_vec(), vec![], vec![]);
        lookup.on_timeout(&silent);
        let responded: Vec<_> = lookup.responded_closest_k().into_iter().map(|(id, _)| id).collect();
        assert_eq!(responded, vec![responder]);
    }
}
