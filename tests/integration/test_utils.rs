//! Shared test utilities for integration tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use marketflow::cache::MarketCache;
use marketflow::config::CoreConfig;
use marketflow::error::BoxError;
use marketflow::gateway::DedupGateway;
use marketflow::models::MarketRecord;
use marketflow::services::market_data::MarketDataProvider;

/// Mock upstream provider with a per-call latency and a failure switch.
pub struct MockProvider {
    calls: AtomicU64,
    failing: AtomicBool,
    delay: Duration,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(50))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            delay,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_one(&self, symbol: &str) -> Result<Option<MarketRecord>, BoxError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err("upstream unavailable".into());
        }

        tokio::time::sleep(self.delay).await;
        Ok(Some(
            MarketRecord::new(symbol, 100.0, "mock")
                .with_volume_24h(1_000_000.0)
                .with_price_change_24h(2.5),
        ))
    }
}

/// Wire a cache and gateway around the given provider with default config.
pub fn gateway_setup(provider: Arc<MockProvider>) -> (Arc<MarketCache>, Arc<DedupGateway>) {
    let config = CoreConfig::default();
    let cache = Arc::new(MarketCache::new(config.cache.clone()));
    let gateway = Arc::new(DedupGateway::new(provider, Arc::clone(&cache), &config));
    (cache, gateway)
}
