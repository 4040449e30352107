use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market data record as returned by an upstream provider.
///
/// This is the one record shape the coordination core interprets; stage
/// payloads built on top of it stay opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRecord {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: f64,
    pub price_change_24h: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl MarketRecord {
    pub fn new(symbol: impl Into<String>, price: f64, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume_24h: 0.0,
            price_change_24h: 0.0,
            volatility: None,
            market_cap: None,
            rank: None,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_volume_24h(mut self, volume_24h: f64) -> Self {
        self.volume_24h = volume_24h;
        self
    }

    pub fn with_price_change_24h(mut self, price_change_24h: f64) -> Self {
        self.price_change_24h = price_change_24h;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }
}
