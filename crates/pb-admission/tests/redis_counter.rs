//! Requires Docker: `cargo test -p pb-admission -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use pb_admission::{AdmissionLimiter, CounterStore, Decision, LimitLayer, RedisCounterStore};
use pb_config::RateLimitConfig;
use testcontainers_modules::redis::Redis;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_window_counts_and_expires() {
    let container = Redis::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let store = RedisCounterStore::connect(&format!("redis://{}:{}", host, port)).await.unwrap();

    let window = Duration::from_millis(1500);
    let first = store.increment("rl:global:ip", window).await.unwrap();
    let second = store.increment("rl:global:ip", window).await.unwrap();
    assert_eq!(first.count, 1);
    assert_eq!(second.count, 2);
    assert!(second.reset_after <= window);

    tokio::time::sleep(Duration::from_millis(1700)).await;
    assert_eq!(store.increment("rl:global:ip", window).await.unwrap().count, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_limiter_over_redis() {
    let container = Redis::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let store = Arc::new(RedisCounterStore::connect(&format!("redis://{}:{}", host, port)).await.unwrap());

    let config = RateLimitConfig {
        global_max: 3,
        ..RateLimitConfig::default()
    };
    let limiter = AdmissionLimiter::new(&config, store);

    for _ in 0..3 {
        assert!(limiter.consume("u1", "/api/posts").await.is_allowed());
    }
    assert!(matches!(
        limiter.consume("u1", "/api/posts").await,
        Decision::Denied { layer: LimitLayer::Global, .. }
    ));
}
