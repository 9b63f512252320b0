//! A single routing-table entry and its liveness bookkeeping.
use crate::wire::{NodeId, PeerAddress};
use std::time::{Duration, Instant};

/// A node becomes questionable after this long without a response.
pub const GOOD_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Consecutive query failures before a node is considered dead weight.
pub const BAD_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Good,
    Questionable,
    Bad,
}

/// A node known to the routing table, with enough history to classify it
/// as good/questionable/bad.
#[derive(Debug, Clone)]
pub struct DhtNode {
    pub id: NodeId,
    pub addr: PeerAddress,
    pub last_responded_at: Option<Instant>,
    pub last_queried_at: Option<Instant>,
    pub failed_queries: u32,
}

impl DhtNode {
    pub fn new(id: NodeId, addr: PeerAddress) -> Self {
        DhtNode {
            id,
            addr,
            last_responded_at: None,
            last_queried_at: None,
            failed_queries: 0,
        }
    }

    pub fn touch_responded_at(&mut self, now: Instant) {
        self.last_responded_at = Some(now);
        self.failed_queries = 0;
    }

    pub fn touch_queried_at(&mut self, now: Instant) {
        self.last_queried_at = Some(now);
    }

    pub fn mark_failed(&mut self) {
        self.failed_queries += 1;
    }

    pub fn status_at(&self, now: Instant) -> NodeStatus {
        if self.failed_queries >= BAD_THRESHOLD {
            return NodeStatus::Bad;
        }
        let responded_recently = self
            .last_responded_at
            .is_some_and(|t| now.duration_since(t) < GOOD_WINDOW);
        let ever_responded_never_failed = self.last_responded_at.is_some() && self.failed_queries == 0;
        if responded_recently || ever_responded_never_failed {
            NodeStatus::Good
        } else {
            NodeStatus::Questionable
        }
    }

    pub fn is_bad_at(&self, now: Instant) -> bool {
        self.status_at(now) == NodeStatus::Bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn node() -> DhtNode {
        DhtNode::new(NodeId::random(), PeerAddress::new(Ipv4Addr::new(1, 2, 3, 4), 6881))
    }

    #[test]
    fn fresh_node_is_questionable() {
        let n = node();
        assert_eq!(n.status_at(Instant::now()), NodeStatus::Questionable);
    }

    #[test]
    fn recently_responded_node_is_good() {
        let mut n = node();
        let now = Instant::now();
        n.touch_responded_at(now);
        assert_eq!(n.status_at(now), NodeStatus::Good);
    }

    #[test]
    fn three_failures_makes_node_bad() {
        let mut n = node();
        n.mark_failed();
        n.mark_failed();
        n.mark_failed();
        assert_eq!(n.status_at(Instant::now()), NodeStatus::Bad);
    }

    #[test]
    fn responded_long_ago_with_no_failures_is_still_good() {
        let mut n = node();
        n.touch_responded_at(Instant::now());
        let long_later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(n.status_at(long_later), NodeStatus::Good);
    }
}
