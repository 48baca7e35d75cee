//! Responses endpoint (OpenAI-compatible), buffered or streamed.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use nb_gateway_common::oai::{
    ErrorBody, OutputItem, ResponseObject, ResponseStreamEvent, ResponsesInput, ResponsesRequest,
    TextConfig, TextFormat,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::{parse_role, require_messages, require_model, schema_directive, temperature};
use crate::engine::{EngineError, GenerateOptions, JsonSchemaDirective, Message, Role};
use crate::error::{CompatResult, Error, Result};
use crate::state::AppState;
use crate::stream::{json_event, sse_response, StreamEncoder, StreamJob};

/// Content part types whose `text` is kept.
const TEXT_PART_TYPES: [&str; 2] = ["input_text", "output_text"];

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/responses", post(create_response))
}

/// Flatten item content: strings pass through, text parts are joined with
/// newlines, anything else is dropped.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|part| {
                part.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| TEXT_PART_TYPES.contains(&t))
            })
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Instructions become a leading system message; a bare string input is
/// one user message.
fn build_messages(instructions: Option<&str>, input: Option<ResponsesInput>) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = instructions.and_then(Message::system).into_iter().collect();

    match input {
        None => return Err(Error::invalid_param("input", "input is required")),
        Some(ResponsesInput::Text(text)) => messages.extend(Message::user(&text)),
        Some(ResponsesInput::Items(items)) => {
            for (i, item) in items.iter().enumerate() {
                let role = if item.role.trim().is_empty() {
                    Role::User
                } else {
                    parse_role(&item.role)
                        .map_err(|e| Error::invalid_param("input", format!("input[{i}]: {e}")))?
                };
                messages.extend(Message::new(role, &content_text(&item.content)));
            }
        }
    }

    require_messages(messages)
}

fn directive(text: Option<TextConfig>) -> Result<Option<JsonSchemaDirective>> {
    match text.and_then(|t| t.format) {
        None | Some(TextFormat::Text) => Ok(None),
        Some(TextFormat::JsonObject) => Ok(Some(JsonSchemaDirective {
            name: "json_object".to_string(),
            schema: json!({"type": "object"}),
            strict: true,
        })),
        Some(TextFormat::JsonSchema {
            name,
            schema,
            strict,
        }) => schema_directive("text.format.schema", &name, schema, strict).map(Some),
    }
}

fn response_object(model: &str, text: String) -> ResponseObject {
    ResponseObject {
        id: format!("resp_{}", Uuid::new_v4().simple()),
        object: "response".to_string(),
        created_at: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        status: "completed".to_string(),
        output: vec![OutputItem::assistant_text(
            format!("msg_{}", Uuid::new_v4().simple()),
            text,
        )],
    }
}

/// Compat SSE framing: unnamed events whose payload carries a `type`.
struct CompatEncoder {
    model: String,
}

impl StreamEncoder for CompatEncoder {
    fn delta(&mut self, delta: &str) -> Event {
        json_event(
            None,
            &ResponseStreamEvent::OutputTextDelta {
                delta: delta.to_string(),
            },
        )
    }

    fn error(&mut self, err: &EngineError) -> Event {
        json_event(
            None,
            &ResponseStreamEvent::Error {
                error: ErrorBody::new(err.to_string(), "api_error", None, Some(err.code().to_string())),
            },
        )
    }

    fn completed(&mut self, full_text: &str) -> Option<Event> {
        Some(json_event(
            None,
            &ResponseStreamEvent::Completed {
                response: response_object(&self.model, full_text.to_string()),
            },
        ))
    }
}

/// POST /compat/oai/v1/responses
async fn create_response(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ResponsesRequest>, JsonRejection>,
) -> CompatResult<Response> {
    let Json(request) = payload?;

    let model = require_model(&request.model)?;
    let messages = build_messages(request.instructions.as_deref(), request.input)?;
    let options = GenerateOptions {
        temperature: temperature(request.temperature)?,
        json_schema: directive(request.text)?,
        stream: request.stream,
    };

    let route = state.route(model)?;

    if options.stream {
        let encoder = CompatEncoder {
            model: route.public_id.clone(),
        };
        let job = StreamJob {
            engine: route.engine.clone(),
            model: route.upstream_model.clone(),
            messages,
            options,
        };
        return Ok(sse_response(job, encoder));
    }

    let text = route
        .engine
        .generate_text(&route.upstream_model, &messages, &options)
        .await?;

    Ok(Json(response_object(&route.public_id, text)).into_response())
}
