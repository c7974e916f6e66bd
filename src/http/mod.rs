//! HTTP adapter: request classification, verdict translation and the server
//! that mounts it in front of a downstream router.

mod middleware;
mod server;

pub use middleware::{
    classify, rate_limit, RateLimitState, API_KEY_HEADER, INTERNAL_ERROR_BODY,
    LIMIT_EXCEEDED_BODY,
};
pub use server::{hello_router, rate_limited, HttpServer};
