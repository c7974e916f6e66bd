//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{rate_limit, RateLimitState};
use crate::error::{RateLimiterError, Result};
use crate::ratelimit::RateLimiter;

/// Wrap `downstream` so that every request, including those answered by its
/// fallback, passes through the rate limiter first.
pub fn rate_limited(downstream: Router, state: RateLimitState) -> Router {
    downstream
        .layer(axum::middleware::from_fn_with_state(state, rate_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Demo downstream service.
pub fn hello_router() -> Router {
    Router::new().route("/", get(hello)).fallback(not_found)
}

async fn hello() -> &'static str {
    "Hello, World!"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}

/// HTTP server fronting a downstream router with the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// The service behind the limiter
    downstream: Router,
    /// Deadline for each request's storage calls
    request_timeout: Option<Duration>,
}

impl HttpServer {
    /// Create a new server that fronts the demo downstream.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            addr,
            rate_limiter,
            downstream: hello_router(),
            request_timeout: None,
        }
    }

    /// Replace the downstream service.
    pub fn with_downstream(mut self, downstream: Router) -> Self {
        self.downstream = downstream;
        self
    }

    /// Bound the storage calls of each request.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves; storage
    /// calls still in flight are cancelled and their requests answer 500.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            RateLimiterError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with rate limiting"
        );

        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let state = RateLimitState::new(self.rate_limiter)
            .with_shutdown(shutdown.clone())
            .with_request_timeout(self.request_timeout);
        let app = rate_limited(self.downstream, state);

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            shutdown.cancel();
        })
        .await;

        result.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            RateLimiterError::Io(e)
        })
    }
}
