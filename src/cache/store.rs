//! Partitioned TTL/LRU cache store

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::entry::{CacheClass, CacheEntry};
use crate::cache::key::cache_key;
use crate::config::CacheConfig;
use crate::error::BoxError;
use crate::metrics::Metrics;

/// Share of a full class evicted in one LRU pass.
const EVICTION_FRACTION: usize = 4;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub total_entries: usize,
    pub class_sizes: HashMap<String, usize>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub errors: u64,
}

/// Partitioned key-value store with per-class TTL and capacity policy.
///
/// Payloads are opaque JSON values; `get_as`/`set_as` do the typed
/// conversion at the boundary. All mutations happen under one partition
/// lock, so no partial entry state is ever observable across await points.
pub struct MarketCache {
    partitions: HashMap<CacheClass, RwLock<HashMap<String, CacheEntry>>>,
    config: CacheConfig,
    counters: Counters,
    metrics: Option<Arc<Metrics>>,
    sweep_handle: RwLock<Option<JoinHandle<()>>>,
}

impl MarketCache {
    pub fn new(config: CacheConfig) -> Self {
        let partitions = CacheClass::ALL
            .into_iter()
            .map(|class| (class, RwLock::new(HashMap::new())))
            .collect();

        Self {
            partitions,
            config,
            counters: Counters::default(),
            metrics: None,
            sweep_handle: RwLock::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn partition(&self, class: CacheClass) -> &RwLock<HashMap<String, CacheEntry>> {
        // Every class is inserted in `new`, so the lookup cannot fail.
        &self.partitions[&class]
    }

    fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.cache_hits_total.inc();
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.cache_misses_total.inc();
        }
    }

    /// Get a payload; expired entries are deleted lazily and count a miss.
    pub async fn get(&self, class: CacheClass, symbol: &str, params: Option<&Value>) -> Option<Value> {
        self.get_if_fresh(class, symbol, params, None).await
    }

    /// Get a payload only if it is younger than `max_age` (which may be
    /// stricter than the class TTL).
    pub async fn get_if_fresh(
        &self,
        class: CacheClass,
        symbol: &str,
        params: Option<&Value>,
        max_age: Option<Duration>,
    ) -> Option<Value> {
        let key = cache_key(symbol, params);
        let mut partition = self.partition(class).write().await;

        let Some(entry) = partition.get_mut(&key) else {
            self.record_miss();
            return None;
        };

        if entry.is_expired() {
            partition.remove(&key);
            self.record_miss();
            return None;
        }

        if !entry.is_fresh(max_age) {
            debug!(class = %class, key = %key, "cache entry too old for requested max_age");
            self.record_miss();
            return None;
        }

        entry.touch();
        self.record_hit();
        debug!(class = %class, key = %key, "cache hit");
        Some(entry.payload.clone())
    }

    /// Typed read through serde.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        class: CacheClass,
        symbol: &str,
        params: Option<&Value>,
        max_age: Option<Duration>,
    ) -> Option<T> {
        let value = self.get_if_fresh(class, symbol, params, max_age).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                error!(class = %class, symbol = %symbol, error = %e, "cache payload deserialization failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, then enforce the class capacity.
    pub async fn set(
        &self,
        class: CacheClass,
        symbol: &str,
        payload: Value,
        params: Option<&Value>,
        custom_ttl: Option<Duration>,
    ) {
        let key = cache_key(symbol, params);
        let ttl = custom_ttl.unwrap_or(self.config.policy(class).ttl);

        let mut partition = self.partition(class).write().await;
        partition.insert(key.clone(), CacheEntry::new(payload, ttl));
        debug!(class = %class, key = %key, ttl_secs = ttl.as_secs(), "cache set");

        self.enforce_capacity(class, &mut partition);
    }

    /// Typed write through serde.
    pub async fn set_as<T: Serialize>(
        &self,
        class: CacheClass,
        symbol: &str,
        payload: &T,
        params: Option<&Value>,
        custom_ttl: Option<Duration>,
    ) {
        match serde_json::to_value(payload) {
            Ok(value) => self.set(class, symbol, value, params, custom_ttl).await,
            Err(e) => {
                error!(class = %class, symbol = %symbol, error = %e, "cache payload serialization failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Cache-aside composition: serve a fresh hit, otherwise fetch, store
    /// and return. A failed fetch falls back to whatever the cache still
    /// holds (stale-but-unexpired data) before reporting absence.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        class: CacheClass,
        symbol: &str,
        params: Option<&Value>,
        force_refresh: bool,
        max_age: Option<Duration>,
        fetch: F,
    ) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, BoxError>>,
    {
        if !force_refresh {
            if let Some(value) = self.get_if_fresh(class, symbol, params, max_age).await {
                return Some(value);
            }
        }

        debug!(class = %class, symbol = %symbol, "fetching fresh data");
        match fetch().await {
            Ok(fresh) => {
                self.set(class, symbol, fresh.clone(), params, None).await;
                Some(fresh)
            }
            Err(e) => {
                error!(class = %class, symbol = %symbol, error = %e, "fetch failed, trying stale cache");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.get(class, symbol, params).await
            }
        }
    }

    /// Invalidate one key, or the whole class when `symbol` is `None`.
    pub async fn invalidate(&self, class: CacheClass, symbol: Option<&str>, params: Option<&Value>) {
        let mut partition = self.partition(class).write().await;
        match symbol {
            Some(symbol) => {
                let key = cache_key(symbol, params);
                if partition.remove(&key).is_some() {
                    debug!(class = %class, key = %key, "cache invalidated");
                }
            }
            None => {
                partition.clear();
                info!(class = %class, "cache class cleared");
            }
        }
    }

    /// Drop every cached record for a symbol across all classes.
    pub async fn invalidate_symbol(&self, symbol: &str) {
        for class in CacheClass::ALL {
            self.invalidate(class, Some(symbol), None).await;
        }
        info!(symbol = %symbol, "cache invalidated across all classes");
    }

    /// Remove all expired entries across all classes, independent of access.
    pub async fn sweep_expired(&self) -> usize {
        let mut total_removed = 0;

        for class in CacheClass::ALL {
            let mut partition = self.partition(class).write().await;
            let before = partition.len();
            partition.retain(|_, entry| !entry.is_expired());
            let removed = before - partition.len();
            total_removed += removed;

            if removed > 0 {
                debug!(class = %class, removed = removed, "sweep removed expired entries");
            }
        }

        if total_removed > 0 {
            info!(removed = total_removed, "cache sweep completed");
        }
        total_removed
    }

    /// Start the periodic expiry sweep.
    pub async fn start_sweeper(self: &Arc<Self>) {
        let mut handle = self.sweep_handle.write().await;
        if handle.is_some() {
            return;
        }

        let cache = Arc::clone(self);
        let interval = self.config.sweep_interval;
        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cache.sweep_expired().await;
            }
        }));
        info!(interval_secs = self.config.sweep_interval.as_secs(), "cache sweeper started");
    }

    /// Stop the periodic expiry sweep.
    pub async fn stop_sweeper(&self) {
        let mut handle = self.sweep_handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("cache sweeper stopped");
        }
    }

    /// Current statistics snapshot.
    pub async fn stats(&self) -> CacheStats {
        let mut class_sizes = HashMap::new();
        let mut total_entries = 0;
        for class in CacheClass::ALL {
            let size = self.partition(class).read().await.len();
            class_sizes.insert(class.as_str().to_string(), size);
            total_entries += size;
        }

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let requests = hits + misses;
        let hit_rate = if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        };

        CacheStats {
            hit_rate,
            total_entries,
            class_sizes,
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Batched LRU eviction: when a class exceeds its capacity, drop the
    /// oldest quarter by recency in one pass.
    fn enforce_capacity(&self, class: CacheClass, partition: &mut HashMap<String, CacheEntry>) {
        let max_entries = self.config.policy(class).max_entries;
        if partition.len() <= max_entries {
            return;
        }

        let mut by_recency: Vec<(String, tokio::time::Instant)> = partition
            .iter()
            .map(|(key, entry)| (key.clone(), entry.recency()))
            .collect();
        by_recency.sort_by_key(|(_, recency)| *recency);

        let remove_count = (partition.len() / EVICTION_FRACTION).max(1);
        for (key, _) in by_recency.into_iter().take(remove_count) {
            partition.remove(&key);
        }

        self.counters
            .evictions
            .fetch_add(remove_count as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.cache_evictions_total.inc_by(remove_count as u64);
        }
        debug!(class = %class, removed = remove_count, "LRU eviction");
    }
}
