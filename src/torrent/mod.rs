//! The `info` dict layout assembled from the metadata exchange: piece
//! sizes, file boundaries, and the error taxonomy for malformed input.
use thiserror::Error;
pub mod info;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid info dict format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length")]
    InvalidPiecesHashLength,
}

/// Result type for torrent operations derived from `std::result`
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
