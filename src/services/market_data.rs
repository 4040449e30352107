//! Market data provider interface consumed by the dedup gateway.

use std::collections::HashMap;

use crate::error::BoxError;
use crate::models::MarketRecord;

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the current market record for one symbol.
    ///
    /// `Ok(None)` means the upstream answered but knows nothing about the
    /// symbol; `Err` means the upstream is unavailable.
    async fn fetch_one(&self, symbol: &str) -> Result<Option<MarketRecord>, BoxError>;

    /// Fetch records for many symbols in one upstream round trip.
    ///
    /// Providers without a bulk endpoint can rely on this default, which
    /// falls back to per-symbol fetches.
    async fn fetch_many(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, MarketRecord>, BoxError> {
        let mut results = HashMap::new();
        for symbol in symbols {
            if let Some(record) = self.fetch_one(symbol).await? {
                results.insert(symbol.clone(), record);
            }
        }
        Ok(results)
    }
}

pub struct PlaceholderMarketDataProvider;

#[async_trait::async_trait]
impl MarketDataProvider for PlaceholderMarketDataProvider {
    async fn fetch_one(&self, _symbol: &str) -> Result<Option<MarketRecord>, BoxError> {
        Ok(None)
    }
}
