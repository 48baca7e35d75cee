//! OpenAI-style compatibility surface, mounted at `/compat/oai/v1`.
//!
//! A thin adapter over the same router and engines as the native API; only
//! the envelopes differ.

pub mod embeddings;
pub mod models;
pub mod reserved;
pub mod responses;

use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::http::Method;
use axum::Router;

use crate::error::{CompatError, Error};
use crate::state::AppState;

pub const PREFIX: &str = "/compat/oai/v1";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(models::router())
        .merge(embeddings::router())
        .merge(responses::router())
        .merge(reserved::router())
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
}

async fn route_not_found(OriginalUri(uri): OriginalUri) -> CompatError {
    CompatError(Error::RouteNotFound(uri.path().to_string()))
}

async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> CompatError {
    CompatError(Error::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    })
}
