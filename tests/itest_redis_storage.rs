//! Integration tests against a live Redis server.
//!
//! Skipped unless `REDIS_URL` points at a Redis 7+ instance, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379/ cargo test --test itest_redis_storage`.

use std::env;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ratelimiter::context::RequestContext;
use ratelimiter::ratelimit::{Identifier, LimitTable, RateLimiter, WINDOW};
use ratelimiter::storage::{RedisStorage, Storage, StorageError};
use tokio_util::sync::CancellationToken;

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

/// Unique identifier so parallel runs never share keys.
fn unique(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("itest-{}-{}-{}", name, std::process::id(), nanos)
}

async fn connect() -> Option<RedisStorage> {
    let url = redis_url()?;
    Some(RedisStorage::connect(&url).await.unwrap())
}

async fn pttl(url: &str, key: &str) -> i64 {
    let client = redis::Client::open(url).unwrap();
    let mut connection = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("PTTL")
        .arg(key)
        .query_async(&mut connection)
        .await
        .unwrap()
}

#[tokio::test]
async fn itest_increment_sets_ttl_once() {
    let Some(storage) = connect().await else {
        return;
    };
    let url = redis_url().unwrap();
    let ctx = RequestContext::background();
    let id = unique("incr");

    assert_eq!(storage.increment(&ctx, id.as_bytes(), WINDOW).await.unwrap(), 1);
    let first_ttl = pttl(&url, &format!("requests:{}", id)).await;
    assert!(first_ttl > 0 && first_ttl <= 1000, "ttl was {first_ttl}");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(storage.increment(&ctx, id.as_bytes(), WINDOW).await.unwrap(), 2);
    let second_ttl = pttl(&url, &format!("requests:{}", id)).await;
    assert!(second_ttl > 0 && second_ttl <= 750, "ttl was {second_ttl}");
}

#[tokio::test]
async fn itest_counter_expires_after_window() {
    let Some(storage) = connect().await else {
        return;
    };
    let ctx = RequestContext::background();
    let id = unique("expire");

    storage.increment(&ctx, id.as_bytes(), WINDOW).await.unwrap();
    storage.increment(&ctx, id.as_bytes(), WINDOW).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(storage.increment(&ctx, id.as_bytes(), WINDOW).await.unwrap(), 1);
}

#[tokio::test]
async fn itest_block_round_trip() {
    let Some(storage) = connect().await else {
        return;
    };
    let ctx = RequestContext::background();
    let id = unique("block");

    assert!(!storage.is_blocked(&ctx, id.as_bytes()).await.unwrap().blocked);

    storage
        .set_block(&ctx, id.as_bytes(), Duration::from_secs(5))
        .await
        .unwrap();
    let status = storage.is_blocked(&ctx, id.as_bytes()).await.unwrap();
    assert!(status.blocked);
    assert!(status.remaining > Duration::ZERO && status.remaining <= Duration::from_secs(5));
}

#[tokio::test]
async fn itest_binary_identifiers_are_distinct() {
    let Some(storage) = connect().await else {
        return;
    };
    let ctx = RequestContext::background();
    let mut first = unique("binary").into_bytes();
    let mut second = first.clone();
    first.push(0xff);
    second.push(0xfe);

    assert_eq!(storage.increment(&ctx, &first, WINDOW).await.unwrap(), 1);
    assert_eq!(storage.increment(&ctx, &second, WINDOW).await.unwrap(), 1);
    assert_eq!(storage.increment(&ctx, &first, WINDOW).await.unwrap(), 2);
}

#[tokio::test]
async fn itest_cancelled_context() {
    let Some(storage) = connect().await else {
        return;
    };
    let token = CancellationToken::new();
    let ctx = RequestContext::new(token.clone());
    token.cancel();

    let result = storage.increment(&ctx, unique("cancel").as_bytes(), WINDOW).await;
    assert!(matches!(result, Err(StorageError::Cancelled)));
}

#[tokio::test]
async fn itest_limiter_blocks_after_limit() {
    let Some(storage) = connect().await else {
        return;
    };
    let limiter = RateLimiter::new(
        Arc::new(storage),
        LimitTable::new(2, 10, Default::default()),
        Duration::from_secs(60),
    );
    let ctx = RequestContext::background();
    let id = Identifier::ip(unique("limiter")).unwrap();

    assert!(limiter.allow(&ctx, &id).await.unwrap());
    assert!(limiter.allow(&ctx, &id).await.unwrap());
    assert!(!limiter.allow(&ctx, &id).await.unwrap());
    assert!(!limiter.allow(&ctx, &id).await.unwrap());
}
