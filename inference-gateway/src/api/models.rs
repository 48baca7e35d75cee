//! Models endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use nb_gateway_common::{ModelEntry, ModelsResponse};

use crate::state::AppState;

/// Build the models router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

/// GET /v1/models - Configured public model IDs, sorted.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let models = state
        .router
        .list_models()
        .iter()
        .map(|id| ModelEntry { id: id.clone() })
        .collect();

    Json(ModelsResponse { models })
}
