//! Endgame duplication policy: once few pieces remain, request the same
//! blocks from every capable peer and cancel the losers on first arrival.
use std::collections::{HashMap, HashSet};

pub const DEFAULT_ENDGAME_THRESHOLD: usize = 8;

/// A block identified by its piece index and byte offset within the piece.
pub type BlockKey = (u32, u32);

pub struct EndgamePolicy {
    threshold: usize,
    /// Peers a block has been duplicated to, while still outstanding.
    duplicated: HashMap<BlockKey, HashSet<usize>>,
}

impl EndgamePolicy {
    pub fn new(threshold: usize) -> Self {
        EndgamePolicy {
            threshold,
            duplicated: HashMap::new(),
        }
    }

    pub fn is_active(&self, remaining: usize) -> bool {
        remaining <= self.threshold
    }

    /// Peers (from `capable_peers`, excluding `already_requested`) that a
    /// still-outstanding block should additionally be requested from.
    pub fn duplicate_targets(&mut self, block: BlockKey, capable_peers: &[usize], already_requested: usize) -> Vec<usize> {
        let entry = self.duplicated.entry(block).or_insert_with(HashSet::new);
        entry.insert(already_requested);
        let targets: Vec<usize> = capable_peers.iter().copied().filter(|p| !entry.contains(p)).collect();
        entry.extend(targets.iter().copied());
        targets
    }

    /// Call when a block arrives from `winner`: returns the other peers it
    /// was duplicated to, so the caller can send them a `cancel`, and drops
    /// the block's duplication bookkeeping.
    pub fn on_block_arrived(&mut self, block: BlockKey, winner: usize) -> Vec<usize> {
        match self.duplicated.remove(&block) {
            Some(peers) => peers.into_iter().filter(|p| *p != winner).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for EndgamePolicy {
    fn default() -> Self {
        EndgamePolicy::new(DEFAULT_ENDGAME_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activates_once_remaining_drops_to_threshold() {
        let policy = EndgamePolicy::default();
        assert!(!policy.is_active(9));
        assert!(policy.is_active(8));
        assert!(policy.is_active(0));
    }

    #[test]
    fn duplicates_to_other_capable_peers_and_cancels_losers_on_arrival() {
        let mut policy = EndgamePolicy::default();
        let block = (0, 0);
        let targets = policy.duplicate_targets(block, &[1, 2, 3], 1);
        assert_eq!(targets, vec![2, 3]);
        let losers = policy.on_block_arrived(block, 2);
        let mut losers = losers;
        losers.sort();
        assert_eq!(losers, vec![1, 3]);
    }
}
