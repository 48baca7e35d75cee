//! Liveness and readiness endpoints.

use axum::routing::get;
use axum::Router;

/// Build the health router. Mounted at the root, outside `/v1`.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/healthz", get(ok))
        .route("/readyz", get(ok))
}

/// GET /healthz, GET /readyz
///
/// The route table is built before the listener is bound, so a process
/// that answers is ready.
async fn ok() -> &'static str {
    "ok"
}
