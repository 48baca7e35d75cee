//! Compat endpoints that are reserved but not implemented.

use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::routing::{get, post};
use axum::Router;

use crate::error::{CompatError, Error};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images/generations", post(not_implemented))
        .route("/images/edits", post(not_implemented))
        .route("/images/variations", post(not_implemented))
        .route("/videos", post(not_implemented))
        .route("/videos/:id", get(not_implemented))
        .route("/videos/:id/content", get(not_implemented))
        .route("/conversations", post(not_implemented))
        .route(
            "/conversations/:id",
            get(not_implemented)
                .post(not_implemented)
                .delete(not_implemented),
        )
        .route(
            "/conversations/:id/items",
            get(not_implemented).post(not_implemented),
        )
}

async fn not_implemented(OriginalUri(uri): OriginalUri) -> CompatError {
    CompatError(Error::NotImplemented(uri.path().to_string()))
}
