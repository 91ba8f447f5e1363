use crate::state::ControllerState;
use shellchat_core::UnknownBlockError;
use shellchat_ledger::PersistenceError;
use shellchat_runner::RunError;
use shellchat_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("busy: {0}")]
    Busy(ControllerState),
    #[error(transparent)]
    UnknownBlock(#[from] UnknownBlockError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no command outputs to share")]
    NoOutput,
    #[error("request cancelled")]
    Cancelled,
    #[error("selection cancelled")]
    SelectionCancelled,
    #[error("interactive selection is not available")]
    NoChooser,
}
