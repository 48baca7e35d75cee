//! Native `/v1` request and response envelopes.

use serde::{Deserialize, Serialize};

/// A chat message as sent by gateway clients.
///
/// Roles are validated by the gateway, not during decoding, so an unknown
/// role produces a descriptive `invalid_request` error instead of a serde one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl MessageInput {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Structured-output directive attached to a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub schema: serde_json::Value,
    /// When set, the output must parse as JSON before it is returned.
    #[serde(default)]
    pub strict: bool,
}

/// `GET /v1/models` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

/// `POST /v1/embeddings` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
}

/// `POST /v1/embeddings` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub model: String,
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// `POST /v1/text/generate` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenerateRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<MessageInput>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub json_schema: Option<JsonSchemaSpec>,
}

/// Non-streaming `POST /v1/text/generate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenerateResponse {
    pub model: String,
    pub output_text: String,
}

/// Payload of a `text.delta` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDeltaEvent {
    pub delta: String,
}

/// Payload of an `error` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorEvent {
    pub message: String,
}

/// `{"error":{"message","code","param"}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub param: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, code: impl Into<String>, param: Option<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                code: code.into(),
                param,
            },
        }
    }
}
