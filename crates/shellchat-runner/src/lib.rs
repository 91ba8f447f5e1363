pub mod capture;
pub mod config;
pub mod error;
pub mod runner;

pub use config::RunConfig;
pub use error::RunError;
pub use runner::{verify_shell, BlockRunner, MockOutcome, MockRunner, ShellRunner};
pub use tokio_util::sync::CancellationToken;
