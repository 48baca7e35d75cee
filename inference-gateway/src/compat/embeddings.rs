//! Embeddings endpoint (OpenAI-compatible).

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use nb_gateway_common::oai::{Embedding, EmbeddingsRequest, EmbeddingsResponse, EmbeddingsUsage};

use crate::api::{normalize_inputs, require_model};
use crate::error::{CompatResult, Error};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(create_embeddings))
}

/// POST /compat/oai/v1/embeddings
///
/// Vectors are always returned as float arrays; `encoding_format` is ignored.
async fn create_embeddings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmbeddingsRequest>, JsonRejection>,
) -> CompatResult<Json<EmbeddingsResponse>> {
    let Json(request) = payload?;

    let model = require_model(&request.model)?;
    let inputs = request.input.map(|i| i.into_vec()).unwrap_or_default();
    if inputs.is_empty() {
        return Err(Error::invalid_param("input", "input must be a string or a non-empty array").into());
    }
    let inputs = normalize_inputs(inputs);

    let route = state.route(model)?;
    let vectors = route.engine.embed(&route.upstream_model, &inputs).await?;

    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| Embedding {
            object: "embedding".to_string(),
            embedding,
            index,
        })
        .collect();

    Ok(Json(EmbeddingsResponse {
        object: "list".to_string(),
        data,
        model: route.public_id.clone(),
        usage: EmbeddingsUsage {
            prompt_tokens: 0,
            total_tokens: 0,
        },
    }))
}
