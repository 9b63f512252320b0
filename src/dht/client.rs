//! The UDP socket owner and event-loop glue for the DHT: sends queries,
//! retries/times them out, and drives iterative lookups to completion.
use super::krpc::{Message, Query, Response};
use super::lookup::Lookup;
use super::routing_table::RoutingTable;
use super::transaction::TransactionTable;
use super::DhtError;
use crate::wire::{InfoHash, NodeId, PeerAddress};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, instrument, warn};

const RECV_BUFFER_LEN: usize = 2048;
/// Generic server error code per BEP 5.
const ERROR_CODE_SERVER: i64 = 202;

pub struct DhtClient {
    socket: UdpSocket,
    local_id: NodeId,
    routing_table: RoutingTable,
    transactions: TransactionTable,
}

impl DhtClient {
    #[instrument(skip(bind_addr), level = "debug")]
    pub async fn bind(bind_addr: SocketAddr, local_id: NodeId) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(DhtClient {
            socket,
            local_id,
            routing_table: RoutingTable::new(local_id),
            transactions: TransactionTable::new(),
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Resolves `hosts` (e.g. well-known bootstrap nodes) and pings each so
    /// their replies seed the routing table.
    #[instrument(skip(self, hosts), level = "debug")]
    pub async fn bootstrap(&mut self, hosts: &[&str]) -> Result<(), DhtError> {
        for host in hosts {
            match lookup_host(host).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if let SocketAddr::V4(v4) = addr {
                            let peer = PeerAddress::from(v4);
                            if let Err(e) = self.ping(peer).await {
                                warn!(%host, error = %e, "bootstrap ping failed");
                            }
                        }
                    }
                }
                Err(e) => warn!(%host, error = %e, "bootstrap host resolution failed"),
            }
        }
        Ok(())
    }

    async fn send_query(&mut self, target: PeerAddress, target_id: Option<NodeId>, query: Query) -> Result<(), DhtError> {
        let now = Instant::now();
        let txn = self.transactions.insert(target, target_id, query.clone(), now);
        let msg = Message::Query { txn, query };
        let bytes = msg.encode()?;
        self.socket.send_to(&bytes, target.socket_addr()).await?;
        Ok(())
    }

    pub async fn ping(&mut self, target: PeerAddress) -> Result<(), DhtError> {
        self.send_query(target, None, Query::Ping { id: self.local_id }).await
    }

    pub async fn find_node(&mut self, target: PeerAddress, target_id: Option<NodeId>, want: NodeId) -> Result<(), DhtError> {
        self.send_query(
            target,
            target_id,
            Query::FindNode {
                id: self.local_id,
                target: want,
            },
        )
        .await
    }

    pub async fn get_peers(&mut self, target: PeerAddress, target_id: Option<NodeId>, info_hash: InfoHash) -> Result<(), DhtError> {
        self.send_query(
            target,
            target_id,
            Query::GetPeers {
                id: self.local_id,
                info_hash,
            },
        )
        .await
    }

    pub async fn announce_peer(
        &mut self,
        target: PeerAddress,
        target_id: Option<NodeId>,
        info_hash: InfoHash,
        port: u16,
        token: Vec<u8>,
    ) -> Result<(), DhtError> {
        self.send_query(
            target,
            target_id,
            Query::AnnouncePeer {
                id: self.local_id,
                info_hash,
                port,
                token,
                implied_port: false,
            },
        )
        .await
    }

    /// Receives and processes exactly one incoming datagram, updating the
    /// routing table and returning the decoded response (if any) so callers
    /// driving a [`Lookup`] can feed it in.
    #[instrument(skip(self), level = "trace")]
    pub async fn recv_one(&mut self) -> Result<Option<(NodeId, PeerAddress, Response)>, DhtError> {
        let mut buf = [0u8; RECV_BUFFER_LEN];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let SocketAddr::V4(from_v4) = from else {
            return Ok(None);
        };
        let from_addr = PeerAddress::from(from_v4);

        let msg = match Message::decode(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, %from_addr, "dropping malformed KRPC datagram");
                return Ok(None);
            }
        };

        match msg {
            Message::Response { txn, response } => {
                if self.transactions.take(&txn).is_none() {
                    return Ok(None);
                }
                let responder_id = response_sender_id(&response);
                self.routing_table.mark_responded(&responder_id);
                self.routing_table.add_node(super::node::DhtNode::new(responder_id, from_addr));
                Ok(Some((responder_id, from_addr, response)))
            }
            Message::Error { txn, error } => {
                if let Some(pending) = self.transactions.take(&txn) {
                    if let Some(id) = pending.target_id {
                        self.routing_table.mark_failed(&id);
                    }
                }
                debug!(?error, %from_addr, "remote returned a KRPC error");
                Ok(None)
            }
            Message::Query { txn, query } => {
                self.handle_query(txn, query, from_addr).await?;
                Ok(None)
            }
        }
    }

    async fn handle_query(&mut self, txn: Vec<u8>, query: Query, from: PeerAddress) -> Result<(), DhtError> {
        let response = match query {
            Query::Ping { id } => {
                self.routing_table.add_node(super::node::DhtNode::new(id, from));
                Response::Ping { id: self.local_id }
            }
            Query::FindNode { id, target } => {
                self.routing_table.add_node(super::node::DhtNode::new(id, from));
                Response::FindNode {
                    id: self.local_id,
                    nodes: self
                        .routing_table
                        .find_closest(&target, super::lookup::K)
                        .into_iter()
                        .map(|n| (n.id, n.addr))
                        .collect(),
                }
            }
            Query::GetPeers { id, info_hash } => {
                self.routing_table.add_node(super::node::DhtNode::new(id, from));
                // This implementation never tracks announced peers of its own
                // (it is a downloading-only client), so it always answers
                // with the closest nodes rather than stored peer values.
                let target = NodeId::from_bytes(*info_hash.as_bytes());
                Response::GetPeersWithNodes {
                    id: self.local_id,
                    token: opaque_token(&from),
                    nodes: self
                        .routing_table
                        .find_closest(&target, super::lookup::K)
                        .into_iter()
                        .map(|n| (n.id, n.addr))
                        .collect(),
                }
            }
            Query::AnnouncePeer { id, .. } => {
                self.routing_table.add_node(super::node::DhtNode::new(id, from));
                Response::AnnouncePeer { id: self.local_id }
            }
        };
        let msg = Message::Response { txn, response };
        let bytes = msg.encode()?;
        self.socket.send_to(&bytes, from.socket_addr()).await?;
        Ok(())
    }

    /// Re-sends or drops transactions whose deadline has passed.
    #[instrument(skip(self), level = "trace")]
    pub async fn tick(&mut self) -> Result<(), DhtError> {
        let now = Instant::now();
        for txn in self.transactions.expired_at(now) {
            let Some(pending) = self.transactions.get(&txn) else {
                continue;
            };
            let target = pending.target;
            let target_id = pending.target_id;
            let query = pending.query.clone();

            if self.transactions.retry(&txn, now) {
                let msg = Message::Query { txn, query };
                let bytes = msg.encode()?;
                self.socket.send_to(&bytes, target.socket_addr()).await?;
            } else if let Some(id) = target_id {
                self.routing_table.mark_failed(&id);
            }
        }
        Ok(())
    }

    /// Drives `lookup` to completion: alternates sending a round's worth of
    /// queries (up to `ALPHA` per round) with waiting out that round's
    /// response window, until the lookup converges or either the round
    /// count or the overall time budget is exhausted. `port` is the local
    /// TCP port advertised in the `announce_peer` fan-out a `get_peers`
    /// lookup issues once it finishes.
    #[instrument(skip(self, lookup), level = "debug")]
    pub async fn run_lookup(
        &mut self,
        lookup: &mut Lookup,
        round_cap: u32,
        total_timeout: Duration,
        port: u16,
    ) -> Result<(), DhtError> {
        let overall_deadline = Instant::now() + total_timeout;
        let round_timeout = total_timeout / round_cap.max(1);
        let mut rounds = 0u32;

        while !lookup.is_done() {
            let now = Instant::now();
            if rounds >= round_cap || now >= overall_deadline {
                lookup.mark_done();
                break;
            }
            rounds += 1;

            let batch = lookup.next_batch();
            if batch.is_empty() {
                break;
            }
            for (id, addr) in &batch {
                if lookup.is_get_peers() {
                    let info_hash = lookup.info_hash().unwrap_or_else(dummy_info_hash);
                    self.get_peers(*addr, Some(*id), info_hash).await?;
                } else {
                    self.find_node(*addr, Some(*id), lookup.target()).await?;
                }
            }

            let round_deadline = (Instant::now() + round_timeout).min(overall_deadline);
            while Instant::now() < round_deadline {
                match tokio::time::timeout(round_deadline - Instant::now(), self.recv_one()).await {
                    Ok(Ok(Some((id, _addr, response)))) => match response {
                        Response::FindNode { nodes, .. } => lookup.on_nodes_response(&id, nodes),
                        Response::GetPeersWithNodes { token, nodes, .. } => {
                            lookup.on_get_peers_response(&id, token, vec![], nodes)
                        }
                        Response::GetPeersWithValues { token, values, .. } => {
                            lookup.on_get_peers_response(&id, token, values, vec![])
                        }
                        _ => {}
                    },
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) => break,
                }
            }
            lookup.end_round();
        }

        self.announce_collected(lookup, port).await
    }

    /// BEP 5's last lookup step: replay each saved `get_peers` token back to
    /// the node that issued it, so we show up in that node's peer store for
    /// future `get_peers` answers. A no-op for `find_node` lookups.
    async fn announce_collected(&mut self, lookup: &Lookup, port: u16) -> Result<(), DhtError> {
        let Some(info_hash) = lookup.info_hash() else {
            return Ok(());
        };
        let responders: HashMap<NodeId, PeerAddress> = lookup.responded_closest_k().into_iter().collect();
        for (id, token) in lookup.collected_tokens() {
            if let Some(addr) = responders.get(id) {
                self.announce_peer(*addr, Some(*id), info_hash, port, token.clone()).await?;
            }
        }
        Ok(())
    }
}

/// Used only as a defensive fallback if a `get_peers` lookup is ever
/// constructed without its info hash; `Lookup::new_get_peers` always sets
/// one, so this should never actually reach the wire.
fn dummy_info_hash() -> InfoHash {
    InfoHash::from_bytes([0u8; 20])
}

fn response_sender_id(response: &Response) -> NodeId {
    match response {
        Response::Ping { id }
        | Response::FindNode { id, .. }
        | Response::GetPeersWithValues { id, .. }
        | Response::GetPeersWithNodes { id, .. }
        | Response::AnnouncePeer { id } => *id,
    }
}

/// A minimal announce-security token: a function of the requester's
/// address. Accepting only tokens this process itself issued is enough to
/// satisfy BEP 5's intent (make off-path announce spoofing harder) for a
/// download-only client that never needs tokens to outlive a short window.
fn opaque_token(addr: &PeerAddress) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(addr.to_compact());
    hasher.finalize()[..8].to_vec()
}
