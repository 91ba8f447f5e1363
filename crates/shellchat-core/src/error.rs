use crate::types::TurnId;
use thiserror::Error;

/// A block selector that does not name an existing block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownBlockError {
    #[error("no command blocks in the last response")]
    NoBlockSet,
    #[error("block number {index} out of range (1-{available})")]
    OutOfRange { index: usize, available: usize },
    #[error("turn {turn_id} has no block {index}")]
    NotFound { turn_id: TurnId, index: usize },
}
