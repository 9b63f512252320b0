//! Piece/block scheduling: rarest-first selection, pipelining, hash
//! verification, and the endgame duplication policy.
pub mod endgame;
pub mod piece;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("piece index {0} is out of range")]
    PieceOutOfRange(u32),

    #[error("block (piece {piece}, offset {offset}) does not belong to this piece's layout")]
    BadBlockOffset { piece: u32, offset: u32 },
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

pub use endgame::EndgamePolicy;
pub use piece::{BlockState, PieceSet, PieceState};
