//! Cache-through market data fetching with single-flight collapsing
//!
//! Wraps a raw [`MarketDataProvider`] so that concurrent requests for the
//! same symbol share one upstream call, fresh data lands in the cache, and
//! upstream failures degrade to stale cache data instead of errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{CacheClass, MarketCache};
use crate::config::CoreConfig;
use crate::metrics::Metrics;
use crate::models::MarketRecord;
use crate::services::market_data::MarketDataProvider;

type InFlightTable = Arc<Mutex<HashMap<String, watch::Receiver<bool>>>>;

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    upstream_calls: AtomicU64,
    collapsed_calls: AtomicU64,
    stale_fallbacks: AtomicU64,
}

/// Gateway statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub requests: u64,
    /// Requests served from cache (upstream calls prevented).
    pub cache_hits: u64,
    pub upstream_calls: u64,
    /// Requests that awaited an already in-flight fetch.
    pub collapsed_calls: u64,
    pub stale_fallbacks: u64,
}

/// Owner-side marker for one in-flight fetch.
///
/// Dropping the guard signals completion to all waiters and schedules the
/// marker's removal after a grace delay. Because this runs in `Drop`, the
/// marker is released on success, failure and task cancellation alike.
struct InFlightGuard {
    key: String,
    tx: watch::Sender<bool>,
    table: InFlightTable,
    grace: Duration,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
        let table = Arc::clone(&self.table);
        let key = std::mem::take(&mut self.key);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            table.lock().await.remove(&key);
        });
    }
}

enum Registration {
    Owner(InFlightGuard),
    Waiter(watch::Receiver<bool>),
}

pub struct DedupGateway {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<MarketCache>,
    in_flight: InFlightTable,
    release_grace: Duration,
    inter_chunk_delay: Duration,
    counters: Counters,
    metrics: Option<Arc<Metrics>>,
}

impl DedupGateway {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<MarketCache>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            release_grace: config.inflight_release_grace,
            inter_chunk_delay: config.inter_chunk_delay,
            counters: Counters::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch one symbol's market record through the cache.
    ///
    /// A non-forced caller that finds another fetch in flight for the same
    /// symbol suspends on its completion and then re-reads the cache. A
    /// fresh cache hit short-circuits the upstream entirely; an upstream
    /// failure falls back to stale cache data when any exists.
    pub async fn fetch(
        &self,
        symbol: &str,
        max_age: Option<Duration>,
        force_refresh: bool,
    ) -> Option<MarketRecord> {
        let symbol = symbol.to_uppercase();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let registration = {
            let mut table = self.in_flight.lock().await;
            match table.get(&symbol) {
                Some(rx) if !force_refresh => Registration::Waiter(rx.clone()),
                _ => {
                    let (tx, rx) = watch::channel(false);
                    table.insert(symbol.clone(), rx);
                    Registration::Owner(InFlightGuard {
                        key: symbol.clone(),
                        tx,
                        table: Arc::clone(&self.in_flight),
                        grace: self.release_grace,
                    })
                }
            }
        };

        let _guard = match registration {
            Registration::Waiter(mut rx) => {
                debug!(symbol = %symbol, "waiting for in-flight fetch");
                self.counters.collapsed_calls.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.collapsed_calls_total.inc();
                }
                // The watch value latches, so a waiter arriving after
                // completion proceeds immediately.
                let _ = rx.wait_for(|done| *done).await;
                return self
                    .cache
                    .get_as::<MarketRecord>(CacheClass::MarketData, &symbol, None, None)
                    .await;
            }
            Registration::Owner(guard) => guard,
        };

        if !force_refresh {
            if let Some(record) = self
                .cache
                .get_as::<MarketRecord>(CacheClass::MarketData, &symbol, None, max_age)
                .await
            {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(record);
            }
        }

        self.counters.upstream_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.upstream_calls_total.inc();
        }

        match self.provider.fetch_one(&symbol).await {
            Ok(Some(record)) => {
                self.cache
                    .set_as(CacheClass::MarketData, &symbol, &record, None, None)
                    .await;
                debug!(symbol = %symbol, source = %record.source, "fresh market data cached");
                Some(record)
            }
            Ok(None) => {
                warn!(symbol = %symbol, "upstream returned no data, trying stale cache");
                self.stale_fallback(&symbol).await
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "upstream fetch failed, trying stale cache");
                self.stale_fallback(&symbol).await
            }
        }
    }

    /// Bulk fetch: cache-fresh symbols are served directly, the rest are
    /// fetched in fixed-size chunks with an inter-chunk delay.
    pub async fn fetch_many(
        &self,
        symbols: &[String],
        max_age: Option<Duration>,
        batch_size: usize,
    ) -> HashMap<String, MarketRecord> {
        let mut results = HashMap::new();
        let mut to_fetch = Vec::new();

        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            match self
                .cache
                .get_as::<MarketRecord>(CacheClass::MarketData, &symbol, None, max_age)
                .await
            {
                Some(record) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    results.insert(symbol, record);
                }
                None => to_fetch.push(symbol),
            }
        }

        info!(
            cached = results.len(),
            fetching = to_fetch.len(),
            "bulk fetch: {} cached, {} to fetch",
            results.len(),
            to_fetch.len()
        );

        for (index, chunk) in to_fetch.chunks(batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }

            let fetches = chunk.iter().map(|symbol| async move {
                (symbol.clone(), self.fetch(symbol, None, true).await)
            });
            for (symbol, record) in join_all(fetches).await {
                match record {
                    Some(record) => {
                        results.insert(symbol, record);
                    }
                    None => warn!(symbol = %symbol, "bulk fetch failed for {}", symbol),
                }
            }
        }

        results
    }

    async fn stale_fallback(&self, symbol: &str) -> Option<MarketRecord> {
        let stale = self
            .cache
            .get_as::<MarketRecord>(CacheClass::MarketData, symbol, None, None)
            .await;
        if stale.is_some() {
            self.counters.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.stale_fallbacks_total.inc();
            }
            info!(symbol = %symbol, "returning stale cache data for {}", symbol);
        }
        stale
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            upstream_calls: self.counters.upstream_calls.load(Ordering::Relaxed),
            collapsed_calls: self.counters.collapsed_calls.load(Ordering::Relaxed),
            stale_fallbacks: self.counters.stale_fallbacks.load(Ordering::Relaxed),
        }
    }
}
