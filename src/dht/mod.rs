//! Kademlia-like distributed hash table: routing table, KRPC wire format,
//! and the iterative lookups used to find peers for an info hash without a
//! tracker.
pub mod bucket;
pub mod client;
pub mod krpc;
pub mod lookup;
pub mod node;
pub mod routing_table;
pub mod transaction;

pub use client::DhtClient;
pub use krpc::{KrpcError, Message, Query, Response};
pub use lookup::Lookup;
pub use node::{DhtNode, NodeStatus};
pub use routing_table::RoutingTable;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("UDP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Krpc(#[from] krpc::KrpcError),
}
