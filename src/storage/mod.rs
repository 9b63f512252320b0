//! Maps the linear piece space onto one or more files and persists
//! verified pieces durably.
pub mod layout;
pub mod store;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("piece {0} offset out of range for its file span")]
    OffsetOutOfRange(u32),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

pub use layout::{FileSpan, Layout};
pub use store::Store;
