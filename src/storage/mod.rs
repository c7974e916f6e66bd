//! Counter store abstraction.
//!
//! A backend provides an atomic counter with a time-to-live and a separate
//! block flag with its own time-to-live. Counters live under `requests:` and
//! block flags under `blocked:`; the two key spaces never overlap.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{RateLimiterConfig, StorageBackend};
use crate::context::RequestContext;

pub use self::memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Key namespace for request counters.
pub const COUNTER_PREFIX: &str = "requests:";
/// Key namespace for block flags.
pub const BLOCK_PREFIX: &str = "blocked:";

/// Longest lifetime any counter or block is given; longer requests are
/// clamped.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Storage key holding the request counter of `identifier`.
pub fn counter_key(identifier: &[u8]) -> Vec<u8> {
    prefixed(COUNTER_PREFIX, identifier)
}

/// Storage key holding the block flag of `identifier`.
pub fn block_key(identifier: &[u8]) -> Vec<u8> {
    prefixed(BLOCK_PREFIX, identifier)
}

fn prefixed(prefix: &str, identifier: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + identifier.len());
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(identifier);
    key
}

/// Open the counter store selected by `config`.
///
/// The Redis backend must answer `PING` before this returns. The memory
/// backend starts its expiry sweep on the current runtime.
pub async fn open(config: &RateLimiterConfig) -> crate::error::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Redis => Arc::new(RedisStorage::connect(&config.storage_url()).await?),
        StorageBackend::Memory => {
            let storage = Arc::new(InMemoryStorage::new());
            storage.spawn_purge_loop(memory::PURGE_INTERVAL);
            storage
        }
    };
    info!(backend = ?config.storage_backend, "Counter store ready");
    Ok(storage)
}

/// Errors that can occur while talking to a counter store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// State of a block flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStatus {
    /// Whether a live block exists
    pub blocked: bool,
    /// Time left on the block, zero when not blocked
    pub remaining: Duration,
}

impl BlockStatus {
    /// No live block.
    pub const fn unblocked() -> Self {
        Self {
            blocked: false,
            remaining: Duration::ZERO,
        }
    }

    /// A live block with `remaining` time left.
    pub const fn blocked(remaining: Duration) -> Self {
        Self {
            blocked: true,
            remaining,
        }
    }
}

/// Trait for counter store implementations.
///
/// All operations honour the cancellation and deadline of the supplied
/// context and propagate backend errors unchanged.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Atomically increment the counter of `identifier` and return the new
    /// value.
    ///
    /// An absent counter is created at 1 with a lifetime of `window`; later
    /// increments inside the window keep the remaining lifetime.
    async fn increment(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        window: Duration,
    ) -> Result<u64, StorageError>;

    /// Install a block flag for `identifier` that lives for `duration`.
    async fn set_block(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        duration: Duration,
    ) -> Result<(), StorageError>;

    /// Report whether `identifier` is currently blocked.
    async fn is_blocked(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
    ) -> Result<BlockStatus, StorageError>;
}
