//! Text generation endpoint, buffered or streamed.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use nb_gateway_common::{
    StreamErrorEvent, TextDeltaEvent, TextGenerateRequest, TextGenerateResponse,
};

use super::{normalize_messages, require_model, schema_directive, temperature};
use crate::engine::{EngineError, GenerateOptions};
use crate::error::Result;
use crate::state::AppState;
use crate::stream::{json_event, sse_response, StreamEncoder, StreamJob};

pub const DELTA_EVENT: &str = "text.delta";
pub const ERROR_EVENT: &str = "error";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/text/generate", post(generate))
}

/// Native SSE framing: named events with JSON payloads.
struct NativeEncoder;

impl StreamEncoder for NativeEncoder {
    fn delta(&mut self, delta: &str) -> Event {
        json_event(
            Some(DELTA_EVENT),
            &TextDeltaEvent {
                delta: delta.to_string(),
            },
        )
    }

    fn error(&mut self, err: &EngineError) -> Event {
        json_event(
            Some(ERROR_EVENT),
            &StreamErrorEvent {
                message: err.to_string(),
            },
        )
    }
}

/// POST /v1/text/generate
async fn generate(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TextGenerateRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload?;

    let model = require_model(&request.model)?;
    let messages = normalize_messages(&request.messages)?;
    let json_schema = request
        .json_schema
        .map(|spec| schema_directive("json_schema", &spec.name, spec.schema, spec.strict))
        .transpose()?;
    let options = GenerateOptions {
        temperature: temperature(request.temperature)?,
        json_schema,
        stream: request.stream,
    };

    let route = state.route(model)?;

    if options.stream {
        let job = StreamJob {
            engine: route.engine.clone(),
            model: route.upstream_model.clone(),
            messages,
            options,
        };
        return Ok(sse_response(job, NativeEncoder));
    }

    let output_text = route
        .engine
        .generate_text(&route.upstream_model, &messages, &options)
        .await?;

    Ok(Json(TextGenerateResponse {
        model: route.public_id.clone(),
        output_text,
    })
    .into_response())
}
