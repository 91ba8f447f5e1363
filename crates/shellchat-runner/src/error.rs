use thiserror::Error;

/// Resource failures of the runner. A command that exits non-zero is not one.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to launch {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write command script: {0}")]
    Script(#[source] std::io::Error),
    #[error("failed waiting for command: {0}")]
    Wait(#[source] std::io::Error),
}
