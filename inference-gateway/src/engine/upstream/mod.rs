//! Engine backed by an OpenAI-compatible HTTP server.

mod schema;
mod sse;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::schema::Strategy;
use self::sse::{SseDecoder, SseEvent};
use super::error::MAX_ERROR_BODY_BYTES;
use super::{
    parse_json_output, DeltaSink, Engine, EngineError, GenerateOptions, JsonSchemaDirective,
    Message, Result,
};
use crate::config::{EngineConfig, EngineKind, JsonSchemaConfig};

const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Upstream HTTP engine.
///
/// One instance owns one pooled `reqwest::Client`; it is shared by every
/// request routed to it.
pub struct UpstreamEngine {
    http_client: Client,
    api_key: Option<String>,
    chat_url: String,
    embeddings_url: String,
    timeout: Duration,
    stream_timeout: Duration,
    json_schema: JsonSchemaConfig,
}

// ============================================================================
// Upstream API types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guided_json: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Decode("response has no choices".to_string()))?;

        Ok(choice
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
            .or(choice.text)
            .unwrap_or_default())
    }
}

// ============================================================================
// Engine implementation
// ============================================================================

impl UpstreamEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http_client = Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()?;

        let base_url = config.base_url.trim_end_matches('/');

        Ok(Self {
            http_client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            chat_url: format!("{base_url}{}", config.chat_completions_path),
            embeddings_url: format!("{base_url}{}", config.embeddings_path),
            timeout: config.timeout,
            stream_timeout: config.stream_timeout,
            json_schema: config.json_schema.clone(),
        })
    }

    fn post(&self, url: &str, accept: &'static str) -> RequestBuilder {
        let request = self.http_client.post(url).header(ACCEPT, accept);
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("Bearer {key}")),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error, limit: Duration) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(limit)
        } else {
            EngineError::Transport(err)
        }
    }

    fn decode_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.timeout)
        } else {
            EngineError::Decode(err.to_string())
        }
    }

    /// Send a JSON request, returning the response only when it is 2xx.
    async fn send(&self, request: RequestBuilder, limit: Duration) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e, limit))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(http_error(response).await)
        }
    }

    fn chat_request<'a>(
        &self,
        model: &'a str,
        messages: &'a [Message],
        options: &GenerateOptions,
        directive: Option<&'a JsonSchemaDirective>,
        strategy: Strategy,
        injected: &'a str,
    ) -> ChatRequest<'a> {
        let mut wire: Vec<ChatMessage<'a>> = messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let mut request = ChatRequest {
            model,
            messages: Vec::new(),
            temperature: options.temperature,
            stream: options.stream,
            response_format: None,
            guided_json: None,
        };

        if let Some(directive) = directive {
            match strategy {
                Strategy::Guided => {
                    request.response_format = Some(ResponseFormat {
                        kind: "json_object",
                    });
                    request.guided_json = Some(&directive.schema);
                }
                Strategy::Prompt => wire.push(ChatMessage {
                    role: "system",
                    content: injected,
                }),
                Strategy::BestEffort => {}
            }
        }

        request.messages = wire;
        request
    }

    fn prompt_for(&self, directive: Option<&JsonSchemaDirective>, strategy: Strategy) -> String {
        match (directive, strategy) {
            (Some(directive), Strategy::Prompt) => {
                schema::injection_prompt(directive, self.json_schema.max_prompt_bytes)
            }
            _ => String::new(),
        }
    }

    /// One non-streaming chat completion.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
        directive: Option<&JsonSchemaDirective>,
        strategy: Strategy,
    ) -> Result<String> {
        let injected = self.prompt_for(directive, strategy);
        let body = self.chat_request(model, messages, options, directive, strategy, &injected);

        tracing::debug!(
            url = %self.chat_url,
            model,
            strategy = strategy.as_str(),
            "upstream chat completion"
        );

        let request = self
            .post(&self.chat_url, CONTENT_TYPE_JSON)
            .timeout(self.timeout)
            .json(&body);
        let response = self.send(request, self.timeout).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.decode_error(e))?;
        parsed.into_text()
    }

    /// One streaming chat completion, forwarding deltas into `sink`.
    async fn stream_once(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
        directive: Option<&JsonSchemaDirective>,
        strategy: Strategy,
        sink: &mut dyn DeltaSink,
    ) -> Result<String> {
        let injected = self.prompt_for(directive, strategy);
        let mut body = self.chat_request(model, messages, options, directive, strategy, &injected);
        body.stream = true;

        tracing::debug!(
            url = %self.chat_url,
            model,
            strategy = strategy.as_str(),
            "upstream chat completion stream"
        );

        let request = self
            .post(&self.chat_url, CONTENT_TYPE_EVENT_STREAM)
            .json(&body);
        let response = self.send(request, self.stream_timeout).await?;

        let mut decoder = SseDecoder::new();
        let mut full = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e, self.stream_timeout))?;
            let events = decoder.push(&chunk)?;
            if forward(events, &mut full, sink).await? {
                return Ok(full);
            }
        }

        // The body ended without the sentinel; accept what arrived.
        forward(decoder.finish()?, &mut full, sink).await?;
        Ok(full)
    }
}

/// Deliver decoded events, returning `true` once the sentinel is seen.
async fn forward(
    events: Vec<SseEvent>,
    full: &mut String,
    sink: &mut dyn DeltaSink,
) -> Result<bool> {
    for event in events {
        match event {
            SseEvent::Delta(delta) => {
                full.push_str(&delta);
                sink.send_delta(&delta).await?;
            }
            SseEvent::Done => return Ok(true),
        }
    }
    Ok(false)
}

/// Turn a non-2xx response into [`EngineError::Http`] with a bounded body.
async fn http_error(mut response: Response) -> EngineError {
    let status = response.status().as_u16();

    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(MAX_ERROR_BODY_BYTES);

    EngineError::Http {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Place vectors by declared index, falling back to position.
fn order_embeddings(items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for (position, item) in items.into_iter().enumerate() {
        let index = item
            .index
            .filter(|i| *i < expected && slots[*i].is_none())
            .unwrap_or(position);

        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(item.embedding),
            _ => {
                return Err(EngineError::Decode(format!(
                    "unexpected embedding at position {position} for {expected} input(s)"
                )))
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| EngineError::Decode(format!("missing embedding for input {i}")))
        })
        .collect()
}

#[async_trait]
impl Engine for UpstreamEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::UpstreamHttp
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(url = %self.embeddings_url, model, inputs = inputs.len(), "upstream embeddings");

        let request = self
            .post(&self.embeddings_url, CONTENT_TYPE_JSON)
            .timeout(self.timeout)
            .json(&EmbeddingsRequest {
                model,
                input: inputs,
            });
        let response = self.send(request, self.timeout).await?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| self.decode_error(e))?;

        order_embeddings(parsed.data, inputs.len())
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String> {
        let options = GenerateOptions {
            stream: false,
            ..options.clone()
        };

        match options.json_schema.as_ref() {
            None => {
                self.complete(model, messages, &options, None, Strategy::BestEffort)
                    .await
            }
            Some(directive) if !directive.strict => {
                let strategy = schema::strategy_for(self.json_schema.mode, 0);
                self.complete(model, messages, &options, Some(directive), strategy)
                    .await
            }
            Some(directive) => {
                let options = &options;
                schema::enforce(&self.json_schema, directive, |_, strategy| async move {
                    self.complete(model, messages, options, Some(directive), strategy)
                        .await
                })
                .await
            }
        }
    }

    async fn stream_text(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
        sink: &mut dyn DeltaSink,
    ) -> Result<String> {
        let directive = options.json_schema.as_ref();
        let strategy = match directive {
            Some(_) => schema::strategy_for(self.json_schema.mode, 0),
            None => Strategy::BestEffort,
        };

        let stream = self.stream_once(model, messages, options, directive, strategy, sink);
        let full = if self.stream_timeout.is_zero() {
            stream.await?
        } else {
            tokio::time::timeout(self.stream_timeout, stream)
                .await
                .map_err(|_| EngineError::Timeout(self.stream_timeout))??
        };

        // Deltas are already delivered, so a strict stream gets one attempt.
        if let Some(directive) = options.strict_schema() {
            if let Err(e) = parse_json_output(&full) {
                tracing::warn!(schema = %directive.name, error = %e, "streamed output is not valid JSON");
                return Err(EngineError::GenerationFailed {
                    attempts: 1,
                    last: Box::new(EngineError::InvalidJson(e.to_string())),
                });
            }
        }

        Ok(full)
    }
}
