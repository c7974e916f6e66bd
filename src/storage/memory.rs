//! In-process counter store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use super::{block_key, counter_key, BlockStatus, Storage, StorageError, MAX_TTL};
use crate::context::RequestContext;

/// How often the expiry sweep runs when started by [`super::open`].
pub(crate) const PURGE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// A counter store held in process memory.
///
/// Entries are keyed exactly as in the remote store (`requests:<id>`,
/// `blocked:<id>`) and expire on the tokio clock, so paused-time tests can
/// step through windows and cooldowns. Expired entries are dropped lazily on
/// access and by [`InMemoryStorage::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    counters: DashMap<Vec<u8>, CounterEntry>,
    blocks: DashMap<Vec<u8>, Instant>,
}

impl InMemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live counter, by full storage key.
    pub fn counter(&self, key: impl AsRef<[u8]>) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key.as_ref())
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
    }

    /// Remaining lifetime of a live counter, by full storage key.
    pub fn counter_ttl(&self, key: impl AsRef<[u8]>) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key.as_ref())
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Whether a live block flag exists, by full storage key.
    pub fn has_block(&self, key: impl AsRef<[u8]>) -> bool {
        let now = Instant::now();
        self.blocks
            .get(key.as_ref())
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Drop every expired counter and block flag.
    ///
    /// Returns the number of entries removed. Safe to call while other tasks
    /// insert entries.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = AtomicUsize::new(0);
        let keep = |live: bool| {
            if !live {
                removed.fetch_add(1, Ordering::Relaxed);
            }
            live
        };
        self.counters.retain(|_, entry| keep(entry.expires_at > now));
        self.blocks.retain(|_, expires_at| keep(*expires_at > now));

        let removed = removed.into_inner();
        trace!(removed, "Purged expired entries");
        removed
    }

    /// Run [`InMemoryStorage::purge_expired`] every `period` until the runtime
    /// shuts down.
    pub fn spawn_purge_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = storage.purge_expired();
                trace!(removed, remaining = storage.len(), "Purge pass finished");
            }
        })
    }

    /// Number of entries currently held, live or not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len() + self.blocks.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn increment(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        window: Duration,
    ) -> Result<u64, StorageError> {
        ctx.check()?;

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(counter_key(identifier))
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now + window.min(MAX_TTL),
            });

        if entry.expires_at <= now {
            *entry = CounterEntry {
                count: 0,
                expires_at: now + window.min(MAX_TTL),
            };
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn set_block(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
        duration: Duration,
    ) -> Result<(), StorageError> {
        ctx.check()?;

        if duration.is_zero() {
            return Ok(());
        }
        self.blocks
            .insert(block_key(identifier), Instant::now() + duration.min(MAX_TTL));
        Ok(())
    }

    async fn is_blocked(
        &self,
        ctx: &RequestContext,
        identifier: &[u8],
    ) -> Result<BlockStatus, StorageError> {
        ctx.check()?;

        let key = block_key(identifier);
        let now = Instant::now();
        let remaining = self
            .blocks
            .get(&key)
            .map(|expires_at| expires_at.saturating_duration_since(now));

        match remaining {
            Some(remaining) if !remaining.is_zero() => Ok(BlockStatus::blocked(remaining)),
            Some(_) => {
                self.blocks.remove_if(&key, |_, expires_at| *expires_at <= now);
                Ok(BlockStatus::unblocked())
            }
            None => Ok(BlockStatus::unblocked()),
        }
    }
}
