pub mod chooser;
pub mod controller;
pub mod error;
pub mod request;
pub mod share;
pub mod state;

pub use chooser::{BlockChooser, Candidate, Pick, ScriptedChooser};
pub use controller::{BlockRun, ControllerOptions, Outcome, SessionController};
pub use error::ControllerError;
pub use request::{parse_input, Request, RunSelector, HELP};
pub use state::ControllerState;
