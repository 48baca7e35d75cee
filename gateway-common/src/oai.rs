//! OpenAI-compatible envelopes served under `/compat/oai/v1`.

use serde::{Deserialize, Serialize};

/// OpenAI-compatible model list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl Model {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created: 0,
            owned_by: owned_by.into(),
        }
    }
}

/// Embedding input: a single string or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(s) => vec![s],
            EmbeddingInput::Batch(v) => v,
        }
    }
}

/// `POST /compat/oai/v1/embeddings` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub input: Option<EmbeddingInput>,
    /// Accepted for client compatibility; vectors are always float arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub object: String,
    pub data: Vec<Embedding>,
    pub model: String,
    pub usage: EmbeddingsUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub object: String,
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingsUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

/// Responses API input: a bare prompt or a list of role/content items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<InputItem>),
}

/// One input item. `content` is either a string or a list of typed parts;
/// the gateway normalizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub format: Option<TextFormat>,
}

/// `text.format` of the Responses API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    JsonObject,
    JsonSchema {
        #[serde(default)]
        name: String,
        #[serde(default)]
        schema: serde_json::Value,
        #[serde(default)]
        strict: bool,
    },
}

/// `POST /compat/oai/v1/responses` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub input: Option<ResponsesInput>,
    #[serde(default)]
    pub text: Option<TextConfig>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

/// A completed response object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    pub model: String,
    pub status: String,
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: String,
    pub role: String,
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

impl OutputItem {
    /// A single assistant message holding `text`.
    pub fn assistant_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            id: id.into(),
            role: "assistant".to_string(),
            content: vec![OutputContent {
                content_type: "output_text".to_string(),
                text: text.into(),
                annotations: Vec::new(),
            }],
        }
    }
}

/// Events written on a streamed `/responses` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
    #[serde(rename = "response.error")]
    Error { error: ErrorBody },
}

/// `{"error":{"message","type","param","code"}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn new(
        message: impl Into<String>,
        error_type: impl Into<String>,
        param: Option<String>,
        code: Option<String>,
    ) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            param,
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedding_input_single_and_batch() {
        let single: EmbeddingsRequest =
            serde_json::from_str(r#"{"model":"m","input":"hello"}"#).unwrap();
        assert_eq!(single.input.unwrap().into_vec(), vec!["hello".to_string()]);

        let batch: EmbeddingsRequest =
            serde_json::from_str(r#"{"model":"m","input":["a","b"]}"#).unwrap();
        assert_eq!(batch.input.unwrap().into_vec().len(), 2);
    }

    #[test]
    fn test_responses_request_with_json_schema_format() {
        let request: ResponsesRequest = serde_json::from_value(json!({
            "model": "chat-a",
            "instructions": "be brief",
            "input": [{"role": "user", "content": [{"type": "input_text", "text": "hi"}]}],
            "text": {"format": {"type": "json_schema", "name": "out", "schema": {"type": "object"}, "strict": true}}
        }))
        .unwrap();

        match request.text.unwrap().format.unwrap() {
            TextFormat::JsonSchema { name, strict, .. } => {
                assert_eq!(name, "out");
                assert!(strict);
            }
            other => panic!("unexpected format: {other:?}"),
        }
        match request.input.unwrap() {
            ResponsesInput::Items(items) => assert!(items[0].content.is_array()),
            ResponsesInput::Text(_) => panic!("expected items"),
        }
    }

    #[test]
    fn test_stream_event_tags() {
        let delta = ResponseStreamEvent::OutputTextDelta {
            delta: "hel".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"type": "response.output_text.delta", "delta": "hel"})
        );

        let err = ResponseStreamEvent::Error {
            error: ErrorBody::new("boom", "upstream_error", None, Some("engine_error".into())),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "response.error");
        assert_eq!(value["error"]["type"], "upstream_error");
    }

    #[test]
    fn test_assistant_output_item_shape() {
        let item = OutputItem::assistant_text("msg_1", "mock: hi");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0]["type"], "output_text");
        assert_eq!(value["content"][0]["text"], "mock: hi");
    }
}
