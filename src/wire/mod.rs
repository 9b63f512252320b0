//! Fixed-width identifiers and compact wire encodings shared by the DHT and
//! peer subsystems: `InfoHash`, `NodeId`, and `PeerAddress`. Leaf module —
//! no dependency on anything else in the crate besides `bencode`-free
//! primitives (this module does not touch Bencode at all).
pub mod info_hash;
pub mod node_id;
pub mod peer_address;

pub use info_hash::{InfoHash, InfoHashError};
pub use node_id::NodeId;
pub use peer_address::{PeerAddress, PeerAddressError};
