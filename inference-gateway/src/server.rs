//! HTTP server: middleware, accept loop and graceful shutdown.

use std::any::Any;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, OriginalUri};
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Router};
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, HttpConfig};
use crate::error::Error;
use crate::logging::{request_logger, MakeHexRequestId};
use crate::router::RouterError;
use crate::state::AppState;
use crate::{api, compat};

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Build the full application: both surfaces, health checks and middleware.
pub fn app(state: Arc<AppState>) -> Router {
    let max_request_bytes = state.config.http.max_request_bytes;

    let mut router = Router::new()
        .merge(api::health::router())
        .nest("/v1", api::router());
    if state.config.http.enable_oai_compat {
        router = router.nest(compat::PREFIX, compat::router());
    }

    // Compat routes already carry their own fallbacks.
    let router = router
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed);

    with_middleware(router.with_state(state), max_request_bytes)
}

/// Wrap `router` in the body limit and the middleware stack.
pub fn with_middleware(router: Router, max_request_bytes: usize) -> Router {
    // Outermost first: request-id stamp, panic recovery, access log.
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeHexRequestId))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(request_logger));

    router
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(middleware)
}

async fn route_not_found(OriginalUri(uri): OriginalUri) -> Error {
    Error::RouteNotFound(uri.path().to_string())
}

async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> Error {
    Error::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    tracing::error!(
        panic = %detail,
        backtrace = %std::backtrace::Backtrace::force_capture(),
        "handler panicked"
    );

    Error::Internal("internal server error".to_string()).into_response()
}

/// A bound listener plus the application it serves.
pub struct Server {
    listener: TcpListener,
    app: Router,
    http: HttpConfig,
}

impl Server {
    /// Build the route table and bind the configured address.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let http = config.http.clone();
        let addr = http.bind_addr();
        let state = Arc::new(AppState::from_config(config)?);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            app: app(state),
            http,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` is cancelled, then give open connections up
    /// to `shutdown_timeout` to finish.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let Server {
            listener,
            app,
            http,
        } = self;
        let http = Arc::new(http);
        let tracker = TaskTracker::new();

        tracing::info!(addr = %listener.local_addr()?, "Listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            tracker.spawn(serve_connection(
                stream,
                peer,
                app.clone(),
                http.clone(),
                shutdown.clone(),
            ));
        }

        drop(listener);
        tracker.close();
        tracing::info!(connections = tracker.len(), "Shutting down");

        if tokio::time::timeout(http.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                connections = tracker.len(),
                timeout = ?http.shutdown_timeout,
                "shutdown timeout elapsed with connections still open"
            );
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Requests in flight on one connection and when the last one finished.
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds after `opened` at which the connection last went idle.
    idle_since: AtomicU64,
}

impl Activity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            idle_since: AtomicU64::new(0),
        })
    }

    fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActivityGuard(self.clone())
    }

    /// When the connection may be closed, or `None` while a response is
    /// still being written.
    fn idle_deadline(&self, idle_timeout: Duration) -> Option<Instant> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        let idle_since = Duration::from_millis(self.idle_since.load(Ordering::SeqCst));
        Some(self.opened + idle_since + idle_timeout)
    }
}

/// Held by a response body; marks the connection idle once dropped.
struct ActivityGuard(Arc<Activity>);

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let activity = &self.0;
        activity
            .idle_since
            .store(activity.opened.elapsed().as_millis() as u64, Ordering::SeqCst);
        activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Response body that keeps the connection busy until it is fully written.
struct TrackedBody {
    inner: Body,
    _guard: ActivityGuard,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Drive one connection. Closes it gracefully when the server shuts down or
/// once it has been idle for `idle_timeout` after its last response.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    http: Arc<HttpConfig>,
    shutdown: CancellationToken,
) {
    let activity = Activity::new();

    let service = {
        let activity = activity.clone();
        service_fn(move |request: Request<Incoming>| {
            let guard = activity.begin();
            let app = app.clone();
            async move {
                let response = app.oneshot(request.map(Body::new)).await?;
                Ok::<_, Infallible>(response.map(|inner| TrackedBody {
                    inner,
                    _guard: guard,
                }))
            }
        })
    };

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(http.read_header_timeout)
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut closing = false;

    loop {
        // While busy, look again after one idle period.
        let wake = activity
            .idle_deadline(http.idle_timeout)
            .unwrap_or_else(|| Instant::now() + http.idle_timeout);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "connection closed with error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !closing => {
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
            _ = tokio::time::sleep_until(wake), if !closing => {
                let expired = activity
                    .idle_deadline(http.idle_timeout)
                    .is_some_and(|deadline| Instant::now() >= deadline);
                if expired {
                    tracing::debug!(%peer, "closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }
        }
    }
}

/// Serve `config` until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    Server::bind(config).await?.serve(shutdown).await
}
