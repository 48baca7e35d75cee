//! Media endpoints that are reserved but not implemented.

use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::routing::{get, post};
use axum::Router;

use crate::error::Error;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images/generate", post(not_implemented))
        .route("/videos/generate", post(not_implemented))
        .route("/videos/:id", get(not_implemented))
        .route("/videos/:id/content", get(not_implemented))
}

/// Always 501 with `code: "not_implemented"`.
pub(crate) async fn not_implemented(OriginalUri(uri): OriginalUri) -> Error {
    Error::NotImplemented(uri.path().to_string())
}
