//! Runtime configuration for the coordination core
//!
//! Everything has a sensible default; individual knobs can be overridden
//! through `MARKETFLOW_*` environment variables (loaded from `.env` when
//! present).

use std::env;
use std::time::Duration;

use crate::cache::CacheClass;

/// Get the current environment (production, sandbox, development)
pub fn get_environment() -> String {
    env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
}

/// TTL and capacity policy for one cache class.
#[derive(Debug, Clone, Copy)]
pub struct ClassPolicy {
    pub ttl: Duration,
    pub max_entries: usize,
}

/// Per-class cache policies plus the expiry sweep cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub price: ClassPolicy,
    pub ohlcv: ClassPolicy,
    pub market_data: ClassPolicy,
    pub technical: ClassPolicy,
    pub global_market: ClassPolicy,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // Price changes fast, global context changes slowly.
            price: ClassPolicy { ttl: Duration::from_secs(30), max_entries: 100 },
            ohlcv: ClassPolicy { ttl: Duration::from_secs(300), max_entries: 50 },
            market_data: ClassPolicy { ttl: Duration::from_secs(120), max_entries: 200 },
            technical: ClassPolicy { ttl: Duration::from_secs(600), max_entries: 75 },
            global_market: ClassPolicy { ttl: Duration::from_secs(900), max_entries: 10 },
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn policy(&self, class: CacheClass) -> ClassPolicy {
        match class {
            CacheClass::Price => self.price,
            CacheClass::Ohlcv => self.ohlcv,
            CacheClass::MarketData => self.market_data,
            CacheClass::Technical => self.technical,
            CacheClass::GlobalMarket => self.global_market,
        }
    }
}

/// Maximum age before a stage's pipeline data is considered stale.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub scout_max_age: Duration,
    pub ia1_max_age: Duration,
    pub ia2_max_age: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            scout_max_age: Duration::from_secs(5 * 60),
            ia1_max_age: Duration::from_secs(8 * 60),
            ia2_max_age: Duration::from_secs(10 * 60),
        }
    }
}

/// Top-level configuration for cache, gateway, coordinator and event bus.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub stages: StageConfig,
    /// How long pending per-stage requests accumulate before a drain.
    pub batch_window: Duration,
    /// Extra margin callers wait past the batch window before re-reading.
    pub batch_margin: Duration,
    /// Chunk size for bulk upstream fetches.
    pub batch_size: usize,
    /// Delay between bulk fetch chunks (rate-limiting courtesy).
    pub inter_chunk_delay: Duration,
    /// Grace delay before an in-flight marker is removed after completion.
    pub inflight_release_grace: Duration,
    /// Bounded event queue capacity.
    pub queue_capacity: usize,
    /// Overall timeout for one event's handler group.
    pub handler_timeout: Duration,
    /// Rolling event history size.
    pub history_limit: usize,
    /// Pipelines untouched for longer than this are reaped.
    pub pipeline_reap_age: Duration,
    /// Cadence of the pipeline reaper.
    pub reap_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            stages: StageConfig::default(),
            batch_window: Duration::from_secs(2),
            batch_margin: Duration::from_millis(100),
            batch_size: 10,
            inter_chunk_delay: Duration::from_millis(500),
            inflight_release_grace: Duration::from_secs(1),
            queue_capacity: 1000,
            handler_timeout: Duration::from_secs(30),
            history_limit: 1000,
            pipeline_reap_age: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl CoreConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Reads `.env` first so local development picks up overrides without
    /// exporting variables.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build a config from `MARKETFLOW_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_u64("MARKETFLOW_BATCH_WINDOW_MS") {
            config.batch_window = Duration::from_millis(ms);
        }
        if let Some(size) = env_u64("MARKETFLOW_BATCH_SIZE") {
            config.batch_size = size.max(1) as usize;
        }
        if let Some(capacity) = env_u64("MARKETFLOW_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.max(1) as usize;
        }
        if let Some(secs) = env_u64("MARKETFLOW_HANDLER_TIMEOUT_SECS") {
            config.handler_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MARKETFLOW_PIPELINE_REAP_AGE_SECS") {
            config.pipeline_reap_age = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MARKETFLOW_CACHE_SWEEP_INTERVAL_SECS") {
            config.cache.sweep_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    match env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "ignoring unparseable config override");
                None
            }
        },
        Err(_) => None,
    }
}
