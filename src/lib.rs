//! marketflow - pipeline coordination core for staged market analysis
//!
//! Sits between a market-data ingestion stage (Scout), a technical
//! analysis stage (IA1) and a strategy decision stage (IA2), eliminating
//! redundant upstream fetches and recomputation while keeping per-stage
//! data fresh:
//!
//! - [`cache`]: typed TTL/LRU cache used as the shared memoization substrate
//! - [`gateway`]: cache-through fetching with single-flight collapsing
//! - [`pipeline`]: per-symbol stage coordination with windowed batching
//! - [`events`]: prioritized pub/sub bus with per-handler fault isolation
//!
//! Everything is constructed explicitly and wired by the caller; there are
//! no global instances and lifecycle (`start`/`stop`) is explicit.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;

pub use cache::{CacheClass, MarketCache};
pub use config::CoreConfig;
pub use error::{BoxError, CoreError};
pub use events::{Event, EventBus, EventKind};
pub use gateway::DedupGateway;
pub use models::MarketRecord;
pub use pipeline::{PipelineCoordinator, Stage};
pub use services::market_data::MarketDataProvider;
