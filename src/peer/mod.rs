//! The BitTorrent peer wire protocol: handshake, length-prefixed message
//! framing, the BEP-10 extension sub-protocol, BEP-9 metadata exchange, and
//! the per-peer connection state machine.
pub mod connection;
pub mod extension;
pub mod handshake;
pub mod message;
pub mod metadata;

pub use connection::{PeerConnection, PeerState};
pub use extension::ExtensionHandshake;
pub use handshake::Handshake;
pub use message::{MessageDecoder, PeerMessage};
pub use metadata::MetadataFetcher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer connection timed out")]
    Timeout,

    #[error("invalid protocol identifier in handshake")]
    InvalidProtocol,

    #[error("handshake info_hash mismatch: expected {expected}, got {got}")]
    InfoHashMismatch { expected: String, got: String },

    #[error("message frame of {0} bytes exceeds the maximum of {1} bytes")]
    FrameTooLarge(usize, usize),

    #[error(transparent)]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("extended message id {0} is unknown to this connection")]
    UnknownExtensionId(u8),

    #[error("peer never completed an extended handshake")]
    NoExtensionHandshake,
}
