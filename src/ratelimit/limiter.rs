//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::identifier::Identifier;
use super::limits::LimitTable;
use crate::config::RateLimiterConfig;
use crate::context::RequestContext;
use crate::storage::{Storage, StorageError};

/// Length of the fixed counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within its quota
    Allowed,
    /// The identifier is serving a cooldown
    Blocked {
        /// Time left on the block
        remaining: Duration,
    },
    /// This request exceeded the quota and installed a block
    LimitExceeded {
        /// Counter value returned by the store
        count: u64,
        /// Quota that was exceeded
        limit: u64,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// The decision engine.
///
/// Holds only the immutable limit table, the cooldown and a handle to the
/// counter store, so one instance can be shared by every request. All
/// mutable state lives in the store.
pub struct RateLimiter {
    /// Counter store
    storage: Arc<dyn Storage>,
    /// Quotas per identifier
    limits: LimitTable,
    /// Cooldown installed on the first denial
    block_time: Duration,
}

impl RateLimiter {
    /// Create a rate limiter from explicit parts.
    pub fn new(storage: Arc<dyn Storage>, limits: LimitTable, block_time: Duration) -> Self {
        Self {
            storage,
            limits,
            block_time,
        }
    }

    /// Create a rate limiter from the configuration record.
    pub fn from_config(storage: Arc<dyn Storage>, config: &RateLimiterConfig) -> Self {
        Self::new(storage, LimitTable::from_config(config), config.block_time())
    }

    /// Decide whether a request from `identifier` may proceed.
    ///
    /// A live block denies without touching the counter. Otherwise the
    /// counter is incremented; the first value above the quota installs a
    /// block and is itself denied. Any storage error is returned as-is and
    /// must be treated as a denial.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        identifier: &Identifier,
    ) -> Result<Decision, StorageError> {
        let key = identifier.value();

        let block = self.storage.is_blocked(ctx, key).await?;
        if block.blocked {
            trace!(
                identifier = %identifier,
                remaining_ms = block.remaining.as_millis() as u64,
                "Identifier is blocked"
            );
            return Ok(Decision::Blocked {
                remaining: block.remaining,
            });
        }

        let limit = self.limits.resolve(identifier);
        let count = self.storage.increment(ctx, key, WINDOW).await?;

        trace!(
            identifier = %identifier,
            count = count,
            limit = limit,
            "Checked rate limit"
        );

        if count > limit {
            self.storage.set_block(ctx, key, self.block_time).await?;
            debug!(
                identifier = %identifier,
                count = count,
                limit = limit,
                block_secs = self.block_time.as_secs(),
                "Rate limit exceeded, identifier blocked"
            );
            return Ok(Decision::LimitExceeded { count, limit });
        }

        Ok(Decision::Allowed)
    }

    /// Boolean form of [`RateLimiter::check`]: `Ok(true)` allows.
    pub async fn allow(
        &self,
        ctx: &RequestContext,
        identifier: &Identifier,
    ) -> Result<bool, StorageError> {
        self.check(ctx, identifier)
            .await
            .map(|decision| decision.is_allowed())
    }

    /// The limit table in use.
    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// The cooldown installed on the first denial.
    pub fn block_time(&self) -> Duration {
        self.block_time
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits)
            .field("block_time", &self.block_time)
            .finish_non_exhaustive()
    }
}
