//! Deterministic in-process engine.
//!
//! Used as the default configuration and by tests. Every output is a pure
//! function of the input, so repeated calls return identical results.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::scoring::{ScorePrompt, SCORE_SCHEMA_NAME};
use super::{DeltaSink, Engine, GenerateOptions, Message, Result, Role};
use crate::config::EngineKind;

/// Dimension of mock embedding vectors.
pub const MOCK_EMBEDDING_DIM: usize = 16;

/// Characters per streamed chunk.
const STREAM_CHUNK_CHARS: usize = 8;

#[derive(Debug, Default)]
pub struct MockEngine;

impl MockEngine {
    pub fn new() -> Self {
        Self
    }

    /// Hash-derived unit vector for `input`.
    fn embed_one(input: &str) -> Vec<f32> {
        let digest = Sha256::digest(input.as_bytes());
        let mut vector: Vec<f32> = digest
            .chunks_exact(2)
            .take(MOCK_EMBEDDING_DIM)
            .map(|pair| {
                let raw = u16::from_be_bytes([pair[0], pair[1]]);
                raw as f32 / 32767.5 - 1.0
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn pair_score(left: &str, right: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(left.as_bytes());
        hasher.update([0u8]);
        hasher.update(right.as_bytes());
        let digest = hasher.finalize();
        let raw = u16::from_be_bytes([digest[0], digest[1]]);
        (raw as f64 / u16::MAX as f64 * 1000.0).round() / 1000.0
    }

    /// The full text any request produces.
    fn respond(messages: &[Message], options: &GenerateOptions) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match &options.json_schema {
            Some(schema) if schema.name == SCORE_SCHEMA_NAME => {
                let scores: Vec<f64> = serde_json::from_str::<ScorePrompt>(last_user)
                    .map(|prompt| {
                        prompt
                            .pairs
                            .iter()
                            .map(|p| Self::pair_score(&p.left, &p.right))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "scores": scores }).to_string()
            }
            Some(schema) => json!({ "ok": true, "schema": schema.name }).to_string(),
            None => format!("mock: {last_user}"),
        }
    }
}

/// Split `text` into chunks of at most `size` characters.
fn chunk_chars(text: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mock
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        tracing::debug!(model, inputs = inputs.len(), "mock embed");
        Ok(inputs.iter().map(|input| Self::embed_one(input)).collect())
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String> {
        tracing::debug!(model, messages = messages.len(), "mock generate");
        Ok(Self::respond(messages, options))
    }

    async fn stream_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
        sink: &mut dyn DeltaSink,
    ) -> Result<String> {
        tracing::debug!(model, messages = messages.len(), "mock stream");
        let text = Self::respond(messages, options);

        for chunk in chunk_chars(&text, STREAM_CHUNK_CHARS) {
            sink.send_delta(chunk).await?;
            // Give cancellation a chance between chunks.
            tokio::task::yield_now().await;
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scoring::TextPair;
    use crate::engine::{EngineError, JsonSchemaDirective};

    fn user(content: &str) -> Vec<Message> {
        vec![Message::user(content).unwrap()]
    }

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_ordered() {
        let engine = MockEngine::new();
        let inputs = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let vectors = engine.embed("mock-1", &inputs).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == MOCK_EMBEDDING_DIM));
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);

        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_embed_empty_input() {
        let engine = MockEngine::new();
        assert!(engine.embed("mock-1", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_echoes_last_user_message() {
        let engine = MockEngine::new();
        let messages = vec![
            Message::system("be nice").unwrap(),
            Message::user("first").unwrap(),
            Message::new(Role::Assistant, "ok").unwrap(),
            Message::user("second").unwrap(),
        ];
        let text = engine
            .generate_text("mock-1", &messages, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "mock: second");
    }

    #[tokio::test]
    async fn test_generate_with_schema_returns_json() {
        let engine = MockEngine::new();
        let options = GenerateOptions {
            json_schema: Some(JsonSchemaDirective {
                name: "answer".into(),
                schema: json!({"type": "object"}),
                strict: true,
            }),
            ..GenerateOptions::default()
        };
        let text = engine
            .generate_text("mock-1", &user("hi"), &options)
            .await
            .unwrap();
        assert_eq!(text, r#"{"ok":true,"schema":"answer"}"#);
    }

    #[tokio::test]
    async fn test_stream_matches_generate() {
        let engine = MockEngine::new();
        let messages = user("hello there, this is a longer prompt");
        let options = GenerateOptions::default();

        let mut deltas: Vec<String> = Vec::new();
        let streamed = engine
            .stream_text("mock-1", &messages, &options, &mut deltas)
            .await
            .unwrap();
        let full = engine
            .generate_text("mock-1", &messages, &options)
            .await
            .unwrap();

        assert_eq!(streamed, full);
        assert!(deltas.len() > 1);
        assert_eq!(deltas.concat(), full);
        assert!(deltas.iter().all(|d| d.chars().count() <= STREAM_CHUNK_CHARS));
    }

    struct ClosedSink;

    #[async_trait]
    impl DeltaSink for ClosedSink {
        async fn send_delta(&mut self, _delta: &str) -> Result<()> {
            Err(EngineError::Canceled)
        }
    }

    #[tokio::test]
    async fn test_stream_stops_when_sink_closes() {
        let engine = MockEngine::new();
        let err = engine
            .stream_text("mock-1", &user("hello"), &GenerateOptions::default(), &mut ClosedSink)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Canceled));
    }

    #[tokio::test]
    async fn test_score_text_pairs() {
        let engine = MockEngine::new();
        let pairs = vec![
            TextPair::new("rust", "a systems language"),
            TextPair::new("rust", "iron oxide"),
        ];
        let scores = engine.score_text_pairs("mock-1", &pairs).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let again = engine.score_text_pairs("mock-1", &pairs).await.unwrap();
        assert_eq!(scores, again);
    }

    #[test]
    fn test_chunk_chars_respects_char_boundaries() {
        let chunks = chunk_chars("héllo wörld, ünïcode", 4);
        assert_eq!(chunks.concat(), "héllo wörld, ünïcode");
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert!(chunk_chars("", 4).is_empty());
    }
}
