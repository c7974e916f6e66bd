//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

use super::{block_key, counter_key, BlockStatus, Storage, StorageError, MAX_TTL};
use crate::context::RequestContext;

/// Value stored under a block key.
const BLOCK_MARKER: &str = "1";

/// A counter store backed by a Redis-compatible server.
///
/// Holds one [`ConnectionManager`], which multiplexes concurrent requests
/// over a single connection and reconnects on failure. Requires Redis 7 or
/// later for `PEXPIRE ... NX`.
#[derive(Clone)]
pub struct RedisStorage {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage").finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Connect to the server at `url` and verify it answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!(url = %url, "Connecting to counter store");

        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!(reply = %pong, "Counter store is reachable");

        Ok(Self { connection })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn increment(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        window: Duration,
    ) -> Result<u64, StorageError> {
        let key = counter_key(identifier);
        let mut connection = self.connection.clone();

        ctx.run(async move {
            // MULTI/EXEC so the counter never exists without an expiry. NX
            // leaves the lifetime of a live window untouched.
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .incr(&key, 1u64)
                .cmd("PEXPIRE")
                .arg(&key)
                .arg(millis(window))
                .arg("NX")
                .ignore()
                .query_async(&mut connection)
                .await?;
            Ok::<_, StorageError>(count)
        })
        .await
    }

    async fn set_block(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        duration: Duration,
    ) -> Result<(), StorageError> {
        if duration.is_zero() {
            return Ok(());
        }

        let key = block_key(identifier);
        let mut connection = self.connection.clone();

        ctx.run(async move {
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(BLOCK_MARKER)
                .arg("PX")
                .arg(millis(duration))
                .query_async(&mut connection)
                .await?;
            Ok::<_, StorageError>(())
        })
        .await
    }

    async fn is_blocked(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
    ) -> Result<BlockStatus, StorageError> {
        let key = block_key(identifier);
        let mut connection = self.connection.clone();

        ctx.run(async move {
            // -2 when the key is absent, -1 when it has no expiry.
            let ttl_ms: i64 = redis::cmd("PTTL")
                .arg(&key)
                .query_async(&mut connection)
                .await?;

            let status = if ttl_ms > 0 {
                BlockStatus::blocked(Duration::from_millis(ttl_ms as u64))
            } else {
                BlockStatus::unblocked()
            };
            Ok::<_, StorageError>(status)
        })
        .await
    }
}

fn millis(duration: Duration) -> u64 {
    // Sub-millisecond durations still need a positive expiry.
    u64::try_from(duration.min(MAX_TTL).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}
