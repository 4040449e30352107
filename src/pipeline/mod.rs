//! Per-symbol stage pipeline and the coordinator that batches, dedupes
//! and freshness-checks stage data requests.

pub mod coordinator;
pub mod state;

pub use coordinator::{CoordinatorMetrics, PipelineCoordinator};
pub use state::{PipelineStatus, Stage, SymbolPipeline};
