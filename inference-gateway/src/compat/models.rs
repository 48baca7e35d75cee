//! Models endpoint (OpenAI-compatible).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use nb_gateway_common::oai::{Model, ModelList};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

/// GET /compat/oai/v1/models
///
/// `owned_by` names the engine kind serving the model.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .router
        .list_models()
        .iter()
        .filter_map(|id| state.router.route_for_model(id))
        .map(|route| Model::new(route.public_id.clone(), route.engine.kind().as_str()))
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
