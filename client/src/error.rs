use thiserror::Error;

/// Failures talking to the service, either while opening the chat stream,
/// while reading it, or on the chat-store endpoints.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-success HTTP status. `body` is capped.
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// A caller-supplied byte source failed.
    #[error("stream body failed: {0}")]
    Body(String),
    #[error("invalid service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TransportError {
    /// HTTP status behind the failure, when there is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::Body(_) | Self::InvalidUrl(_) => None,
        }
    }
}
