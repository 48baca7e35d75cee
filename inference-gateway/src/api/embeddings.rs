//! Embeddings endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use nb_gateway_common::{EmbeddingData, EmbeddingsRequest, EmbeddingsResponse};

use super::{normalize_inputs, require_model};
use crate::error::{Error, Result};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(create_embeddings))
}

/// POST /v1/embeddings
async fn create_embeddings(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<EmbeddingsRequest>, JsonRejection>,
) -> Result<Json<EmbeddingsResponse>> {
    let Json(request) = payload?;

    let model = require_model(&request.model)?;
    let inputs = match request.inputs {
        Some(inputs) if !inputs.is_empty() => normalize_inputs(inputs),
        _ => return Err(Error::invalid_param("inputs", "inputs must be a non-empty array")),
    };

    let route = state.route(model)?;
    let vectors = route.engine.embed(&route.upstream_model, &inputs).await?;

    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| EmbeddingData { index, embedding })
        .collect();

    Ok(Json(EmbeddingsResponse {
        model: route.public_id.clone(),
        data,
    }))
}
