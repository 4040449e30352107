//! Typed TTL/LRU cache shared by the pipeline stages
//!
//! Partitioned by [`CacheClass`]; every class carries its own default TTL
//! and capacity. Payloads are opaque JSON values, typed access happens at
//! the boundary via serde.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{CacheClass, CacheEntry};
pub use key::cache_key;
pub use store::{CacheStats, MarketCache};
