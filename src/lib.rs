//! Ratelimiter - per-second request quotas for HTTP services
//!
//! This crate implements a fixed-window rate limiter that fronts an HTTP
//! service. Requests are attributed to an API token when the client sends
//! one and to the remote address otherwise; clients that exceed their quota
//! are blocked for a cooldown. Counters and blocks live in a shared store
//! (Redis, or process memory for single instances and tests).

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod storage;
