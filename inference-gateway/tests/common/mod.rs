//! Shared helpers for the gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use inference_gateway::config::{ModelConfig, CONFIG_PATH_ENV};
use inference_gateway::{app, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Load `body` through the real config loader from a temporary file.
pub fn config_from_json(body: Value) -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inference-gateway.json");
    std::fs::write(&path, body.to_string()).unwrap();

    let path = path.to_string_lossy().into_owned();
    Config::load_with(
        |key| (key == CONFIG_PATH_ENV).then(|| path.clone()),
        dir.path(),
    )
    .unwrap()
}

/// The built-in single `mock-1` model.
pub fn mock_config(enable_oai_compat: bool) -> Config {
    let mut config = Config {
        models: vec![ModelConfig::sample_mock()],
        ..Config::default()
    };
    config.http.enable_oai_compat = enable_oai_compat;
    config
}

/// One `chat-a` model (upstream name `llama-3`) served by `base_url`.
pub fn upstream_config(base_url: &str, mode: &str) -> Config {
    config_from_json(json!({
        "http": { "enable_oai_compat": true },
        "models": [
            { "id": "mock-1", "engine": { "type": "mock" } },
            {
                "id": "chat-a",
                "upstream_model": "llama-3",
                "engine": {
                    "type": "upstream_http",
                    "base_url": base_url,
                    "api_key": "sk-test",
                    "timeout": "5s",
                    "json_schema": { "mode": mode, "max_retries": 2 }
                }
            }
        ]
    }))
}

pub fn test_app(config: Config) -> Router {
    app(Arc::new(AppState::from_config(config).unwrap()))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    post_raw(uri, body.to_string())
}

pub fn post_raw(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.body))
    }

    pub fn frames(&self) -> Vec<SseFrame> {
        parse_sse(&self.body)
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();

    TestResponse {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap()
    }

    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

pub fn parse_sse(body: &str) -> Vec<SseFrame> {
    body.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut frame = SseFrame {
                event: None,
                data: String::new(),
            };
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    frame.event = Some(name.trim().to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    if !frame.data.is_empty() {
                        frame.data.push('\n');
                    }
                    frame.data.push_str(data.strip_prefix(' ').unwrap_or(data));
                }
            }
            frame
        })
        .collect()
}

/// OpenAI-style chat completion carrying `content`.
pub fn chat_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

/// An upstream SSE body emitting `deltas`, optionally ending in `[DONE]`.
pub fn sse_body(deltas: &[&str], done: bool) -> String {
    let mut body: String = deltas
        .iter()
        .map(|d| format!("data: {}\n\n", json!({"choices": [{"delta": {"content": d}}]})))
        .collect();
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}
