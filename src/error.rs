//! Crate-level error taxonomy: every subsystem's error converts into one
//! of these five discriminated kinds rather than being matched on by type.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("hash mismatch: {0}")]
    HashMismatch(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("fatal error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::bencode::BencodeError> for Error {
    fn from(e: crate::bencode::BencodeError) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<crate::magnet::MagnetError> for Error {
    fn from(e: crate::magnet::MagnetError) -> Self {
        Error::Fatal(e.to_string())
    }
}

impl From<crate::dht::DhtError> for Error {
    fn from(e: crate::dht::DhtError) -> Self {
        match e {
            crate::dht::DhtError::Io(io) => Error::Transport(io),
            crate::dht::DhtError::Krpc(k) => Error::Protocol(k.to_string()),
        }
    }
}

impl From<crate::peer::PeerError> for Error {
    fn from(e: crate::peer::PeerError) -> Self {
        match e {
            crate::peer::PeerError::Io(io) => Error::Transport(io),
            crate::peer::PeerError::Timeout => Error::Timeout("peer operation timed out".to_string()),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<crate::scheduler::SchedulerError> for Error {
    fn from(e: crate::scheduler::SchedulerError) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<crate::storage::StorageError> for Error {
    fn from(e: crate::storage::StorageError) -> Self {
        Error::Fatal(e.to_string())
    }
}

impl From<crate::torrent::TorrentError> for Error {
    fn from(e: crate::torrent::TorrentError) -> Self {
        Error::HashMismatch(e.to_string())
    }
}

impl From<crate::tracker::TrackerError> for Error {
    fn from(e: crate::tracker::TrackerError) -> Self {
        Error::Transport(std::io::Error::other(e.to_string()))
    }
}
