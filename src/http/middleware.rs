//! Rate limiting middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::ratelimit::{Identifier, RateLimiter};

/// Header carrying the client token.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("api_key");

/// Body of a quota denial.
pub const LIMIT_EXCEEDED_BODY: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Body of a denial caused by an internal failure.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Shared state of the middleware.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// The decision engine
    limiter: Arc<RateLimiter>,
    /// Cancelled when the server shuts down
    shutdown: CancellationToken,
    /// Deadline applied to each request's storage calls
    request_timeout: Option<Duration>,
}

impl RateLimitState {
    /// Create middleware state around a rate limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            shutdown: CancellationToken::new(),
            request_timeout: None,
        }
    }

    /// Tie in-flight storage calls to `shutdown`.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Bound the storage calls of each request by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn request_context(&self) -> RequestContext {
        let ctx = RequestContext::new(self.shutdown.child_token());
        match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Attribute a request to a client.
///
/// A non-empty `API_KEY` header wins and is used byte for byte; otherwise the
/// host of the peer address is used. Returns `None` when neither is
/// available.
pub fn classify(headers: &HeaderMap, remote: Option<&SocketAddr>) -> Option<Identifier> {
    let token = headers
        .get(&API_KEY_HEADER)
        .map(|value| value.as_bytes())
        .filter(|value| !value.is_empty());

    match token {
        Some(token) => Identifier::token(token),
        None => remote.and_then(|addr| Identifier::ip(addr.ip().to_string())),
    }
}

/// Filter every request through the rate limiter.
///
/// Allowed requests go to `next` unchanged. Quota denials answer 429 with a
/// fixed body; storage failures and unattributable requests answer 500.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(identifier) = classify(request.headers(), remote.as_ref()) else {
        return internal_error();
    };

    let ctx = state.request_context();
    match state.limiter.check(&ctx, &identifier).await {
        Ok(decision) if decision.is_allowed() => next.run(request).await,
        Ok(_) => limit_exceeded(),
        Err(_) => internal_error(),
    }
}

fn limit_exceeded() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_BODY).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
}
