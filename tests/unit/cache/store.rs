//! Unit tests for the partitioned TTL/LRU cache store
//!
//! All tests run with a paused clock so TTL and recency behavior is
//! exercised deterministically via simulated time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use marketflow::cache::{CacheClass, MarketCache};
use marketflow::config::{CacheConfig, ClassPolicy};

fn small_cache() -> MarketCache {
    let mut config = CacheConfig::default();
    config.price = ClassPolicy {
        ttl: Duration::from_secs(30),
        max_entries: 4,
    };
    MarketCache::new(config)
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_class_ttl() {
    let cache = MarketCache::new(CacheConfig::default());

    cache
        .set(CacheClass::Price, "BTC", json!(100.0), None, None)
        .await;
    assert_eq!(cache.get(CacheClass::Price, "BTC", None).await, Some(json!(100.0)));

    // Price TTL is 30s; one second past it the entry is gone.
    sleep(Duration::from_secs(31)).await;
    assert_eq!(cache.get(CacheClass::Price, "BTC", None).await, None);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_custom_ttl_overrides_class_default() {
    let cache = MarketCache::new(CacheConfig::default());

    // Technical class default is 10 minutes; the override wins.
    cache
        .set(
            CacheClass::Technical,
            "BTC",
            json!({ "rsi": 55.0 }),
            None,
            Some(Duration::from_secs(5)),
        )
        .await;

    sleep(Duration::from_secs(6)).await;
    assert_eq!(cache.get(CacheClass::Technical, "BTC", None).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_max_age_is_stricter_than_ttl() {
    let cache = MarketCache::new(CacheConfig::default());

    cache
        .set(CacheClass::MarketData, "ETH", json!(2500.0), None, None)
        .await;
    sleep(Duration::from_secs(10)).await;

    // Too old for a 5s window, still within the 120s TTL.
    assert_eq!(
        cache
            .get_if_fresh(CacheClass::MarketData, "ETH", None, Some(Duration::from_secs(5)))
            .await,
        None
    );
    assert_eq!(
        cache.get(CacheClass::MarketData, "ETH", None).await,
        Some(json!(2500.0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_lru_evicts_least_recently_used() {
    let cache = small_cache();

    for symbol in ["AAA", "BBB", "CCC", "DDD"] {
        cache
            .set(CacheClass::Price, symbol, json!(1.0), None, None)
            .await;
        sleep(Duration::from_secs(1)).await;
    }

    // Touch AAA so BBB becomes the least recently used entry.
    cache.get(CacheClass::Price, "AAA", None).await;
    cache
        .set(CacheClass::Price, "EEE", json!(1.0), None, None)
        .await;

    assert!(cache.get(CacheClass::Price, "AAA", None).await.is_some());
    assert!(cache.get(CacheClass::Price, "BBB", None).await.is_none());
    assert!(cache.get(CacheClass::Price, "CCC", None).await.is_some());
    assert!(cache.get(CacheClass::Price, "EEE", None).await.is_some());

    let stats = cache.stats().await;
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.class_sizes["price"], 4);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_fetch_caches_result() {
    let cache = MarketCache::new(CacheConfig::default());
    let fetches = Arc::new(AtomicU64::new(0));

    for _ in 0..2 {
        let fetches = Arc::clone(&fetches);
        let value = cache
            .get_or_fetch(CacheClass::MarketData, "BTC", None, false, None, || async move {
                fetches.fetch_add(1, Ordering::Relaxed);
                Ok(json!({ "price": 100.0 }))
            })
            .await;
        assert_eq!(value, Some(json!({ "price": 100.0 })));
    }

    assert_eq!(fetches.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_fetch_falls_back_to_stale_on_error() {
    let cache = MarketCache::new(CacheConfig::default());

    cache
        .set(CacheClass::MarketData, "BTC", json!({ "price": 100.0 }), None, None)
        .await;
    sleep(Duration::from_secs(10)).await;

    // Entry too old for the 5s window, fetch fails: stale data wins
    // over nothing.
    let value = cache
        .get_or_fetch(
            CacheClass::MarketData,
            "BTC",
            None,
            false,
            Some(Duration::from_secs(5)),
            || async { Err("upstream unavailable".into()) },
        )
        .await;

    assert_eq!(value, Some(json!({ "price": 100.0 })));
    assert_eq!(cache.stats().await.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_symbol_clears_all_classes() {
    let cache = MarketCache::new(CacheConfig::default());

    cache.set(CacheClass::Price, "BTC", json!(100.0), None, None).await;
    cache.set(CacheClass::Ohlcv, "BTC", json!([1, 2, 3]), None, None).await;
    cache.set(CacheClass::Price, "ETH", json!(2500.0), None, None).await;

    cache.invalidate_symbol("BTC").await;

    assert!(cache.get(CacheClass::Price, "BTC", None).await.is_none());
    assert!(cache.get(CacheClass::Ohlcv, "BTC", None).await.is_none());
    assert!(cache.get(CacheClass::Price, "ETH", None).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_class_clears_partition() {
    let cache = MarketCache::new(CacheConfig::default());

    cache.set(CacheClass::Price, "BTC", json!(100.0), None, None).await;
    cache.set(CacheClass::Price, "ETH", json!(2500.0), None, None).await;
    cache.set(CacheClass::Ohlcv, "BTC", json!([1]), None, None).await;

    cache.invalidate(CacheClass::Price, None, None).await;

    let stats = cache.stats().await;
    assert_eq!(stats.class_sizes["price"], 0);
    assert_eq!(stats.class_sizes["ohlcv"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_removes_only_expired_entries() {
    let cache = MarketCache::new(CacheConfig::default());

    // Price expires at 30s, market data at 120s.
    cache.set(CacheClass::Price, "BTC", json!(100.0), None, None).await;
    cache.set(CacheClass::MarketData, "BTC", json!({}), None, None).await;

    sleep(Duration::from_secs(60)).await;
    let removed = cache.sweep_expired().await;

    assert_eq!(removed, 1);
    let stats = cache.stats().await;
    assert_eq!(stats.class_sizes["price"], 0);
    assert_eq!(stats.class_sizes["market"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_reaps_expired_entries() {
    let cache = Arc::new(MarketCache::new(CacheConfig::default()));
    cache.start_sweeper().await;

    cache.set(CacheClass::Price, "BTC", json!(100.0), None, None).await;
    assert_eq!(cache.stats().await.total_entries, 1);

    // Sweep cadence is 60s; the 30s price entry is expired by then.
    sleep(Duration::from_secs(61)).await;
    assert_eq!(cache.stats().await.total_entries, 0);

    cache.stop_sweeper().await;
}

#[tokio::test(start_paused = true)]
async fn test_typed_access_round_trips_through_json() {
    let cache = MarketCache::new(CacheConfig::default());

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Snapshot {
        price: f64,
        rank: u32,
    }

    let snapshot = Snapshot { price: 100.0, rank: 1 };
    cache
        .set_as(CacheClass::MarketData, "BTC", &snapshot, None, None)
        .await;

    let read: Option<Snapshot> = cache
        .get_as(CacheClass::MarketData, "BTC", None, None)
        .await;
    assert_eq!(read, Some(snapshot));
}
