//! Inference engine abstraction layer.
//!
//! This module defines the `Engine` trait that every backend (the in-process
//! mock, OpenAI-compatible upstream servers) implements, plus the request
//! types shared by all of them.

mod error;
mod mock;
pub mod scoring;
mod upstream;

pub use error::EngineError;
pub use mock::{MockEngine, MOCK_EMBEDDING_DIM};
pub use scoring::TextPair;
pub use upstream::UpstreamEngine;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngineConfig, EngineKind};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role \"{other}\"")),
        }
    }
}

/// A normalized chat message. Content is trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Build a message, returning `None` when the content is blank.
    pub fn new(role: Role, content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            None
        } else {
            Some(Self {
                role,
                content: content.to_string(),
            })
        }
    }

    pub fn system(content: &str) -> Option<Self> {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Option<Self> {
        Self::new(Role::User, content)
    }
}

/// Per-request structured-output directive.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaDirective {
    pub name: String,
    pub schema: serde_json::Value,
    /// The output must parse as JSON before it is returned.
    pub strict: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// Sampling temperature; zero disables sampling.
    pub temperature: f32,
    pub json_schema: Option<JsonSchemaDirective>,
    pub stream: bool,
}

impl GenerateOptions {
    pub fn strict_schema(&self) -> Option<&JsonSchemaDirective> {
        self.json_schema.as_ref().filter(|s| s.strict)
    }
}

/// Receiver for incremental text produced while streaming.
///
/// Each call should be cheap: implementations write the delta through and
/// return once it has been handed off. An error means the consumer is gone
/// and the engine must stop.
#[async_trait]
pub trait DeltaSink: Send {
    async fn send_delta(&mut self, delta: &str) -> Result<()>;
}

/// Collects deltas in memory.
#[async_trait]
impl DeltaSink for Vec<String> {
    async fn send_delta(&mut self, delta: &str) -> Result<()> {
        self.push(delta.to_string());
        Ok(())
    }
}

/// Primary trait for inference engines.
///
/// Engines are shared across requests and must be safe to call from many
/// tasks at once.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine kind this instance was built from.
    fn kind(&self) -> EngineKind;

    /// Embed every input. The i-th vector belongs to `inputs[i]`.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate a complete response. Strict JSON-schema directives are
    /// enforced here, including retries.
    async fn generate_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String>;

    /// Stream a response into `sink`, returning the accumulated text. The
    /// concatenation of all deltas equals the returned string.
    async fn stream_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
        sink: &mut dyn DeltaSink,
    ) -> Result<String>;

    /// Score each pair in `[0, 1]`, in input order.
    async fn score_text_pairs(&self, model: &str, pairs: &[TextPair]) -> Result<Vec<f32>> {
        scoring::score_text_pairs(self, model, pairs).await
    }
}

/// Build the engine described by `config`.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn Engine>> {
    match config.kind {
        Some(EngineKind::Mock) => Ok(Arc::new(MockEngine::new())),
        Some(EngineKind::UpstreamHttp) => Ok(Arc::new(UpstreamEngine::new(config)?)),
        None => Err(EngineError::InvalidInput(
            "engine type is not configured".to_string(),
        )),
    }
}

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Returns the fence-stripped text when it is valid JSON.
pub fn parse_json_output(text: &str) -> std::result::Result<&str, serde_json::Error> {
    let stripped = strip_code_fence(text);
    serde_json::from_str::<serde::de::IgnoredAny>(stripped)?;
    Ok(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_drops_blank_content() {
        assert!(Message::user("   ").is_none());
        let msg = Message::user("  hi \n").unwrap();
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("System".parse::<Role>().unwrap(), Role::System);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1,2]\n```\n"), "[1,2]");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_json_output() {
        assert_eq!(parse_json_output("```json\n{\"ok\":true}\n```").unwrap(), "{\"ok\":true}");
        assert!(parse_json_output("not json").is_err());
        assert!(parse_json_output("").is_err());
    }

    #[test]
    fn test_strict_schema_filter() {
        let mut options = GenerateOptions {
            json_schema: Some(JsonSchemaDirective {
                name: "x".into(),
                schema: serde_json::json!({}),
                strict: false,
            }),
            ..GenerateOptions::default()
        };
        assert!(options.strict_schema().is_none());
        options.json_schema.as_mut().unwrap().strict = true;
        assert!(options.strict_schema().is_some());
    }
}
