use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
    #[error("API request failed: {0}")]
    Http(String),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected API response: {0}")]
    BadResponse(String),
}
