use std::path::PathBuf;

use chorus_client::TransportError;
use chorus_config::ConfigError;
use thiserror::Error;

/// Why a stream session ended without completing.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// Non-success status, or the network failed before or during the stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The source ended without a terminal `done` event.
    #[error("stream closed before a done event was received")]
    ProtocolAnomaly,
    /// Explicit cancel, navigation away, or a superseding submit.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamFailure {
    /// Cancellation is never reported to the end user.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Local durable storage failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode transcript: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("prompt is empty")]
    EmptyPrompt,
}

/// Failures assembling a controller from configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("no data directory is configured and none could be determined")]
    NoDataDir,
}
