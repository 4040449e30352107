use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Named class of cached data. Each class has its own TTL and capacity
/// policy (see `CacheConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    /// Current price data (changes fast)
    Price,
    /// OHLCV historical data
    Ohlcv,
    /// Market cap, volume, full market records
    MarketData,
    /// Technical indicator sets
    Technical,
    /// Global market context
    GlobalMarket,
}

impl CacheClass {
    pub const ALL: [CacheClass; 5] = [
        CacheClass::Price,
        CacheClass::Ohlcv,
        CacheClass::MarketData,
        CacheClass::Technical,
        CacheClass::GlobalMarket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::Price => "price",
            CacheClass::Ohlcv => "ohlcv",
            CacheClass::MarketData => "market",
            CacheClass::Technical => "technical",
            CacheClass::GlobalMarket => "global",
        }
    }
}

impl std::fmt::Display for CacheClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single cache entry with access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_access: Option<Instant>,
}

impl CacheEntry {
    pub fn new(payload: Value, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
            ttl,
            access_count: 0,
            last_access: None,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }

    /// Fresh enough for the given maximum age; without one, the TTL applies.
    pub fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        self.age() <= max_age.unwrap_or(self.ttl)
    }

    /// Update access metadata on a hit.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Some(Instant::now());
    }

    /// Ordering key for LRU eviction: last access, falling back to
    /// creation time for entries never read.
    pub fn recency(&self) -> Instant {
        self.last_access.unwrap_or(self.created_at)
    }
}
