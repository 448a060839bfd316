//! Request body and stream payloads of the ask-many-models endpoint.

use serde::{Deserialize, Serialize};

/// `POST /api/chat` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub models: Vec<String>,
    pub synthesize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponseData {
    pub model: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisData {
    pub response: String,
}

/// One decoded `data: <json>` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    ModelResponse { data: ModelResponseData },
    Synthesis { data: SynthesisData },
    /// Completion marker; carries no payload.
    Done,
}

impl WireEvent {
    #[must_use]
    pub fn model_response(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self::ModelResponse {
            data: ModelResponseData {
                model: model.into(),
                response: response.into(),
            },
        }
    }

    #[must_use]
    pub fn synthesis(response: impl Into<String>) -> Self {
        Self::Synthesis {
            data: SynthesisData {
                response: response.into(),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelResponse { .. } => "model_response",
            Self::Synthesis { .. } => "synthesis",
            Self::Done => "done",
        }
    }
}
