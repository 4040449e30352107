//! Error types shared across the coordination core

use crate::events::EventKind;

/// Boxed error type used at collaborator seams (market data providers,
/// event handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the coordination core.
///
/// Nothing here is fatal: callers are expected to degrade to stale data
/// or to treat the result as absence.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The event queue is at capacity and the event was dropped.
    #[error("event queue full, dropped {kind} event")]
    QueueFull { kind: EventKind },

    /// The event bus has been stopped and no longer accepts events.
    #[error("event bus is not running")]
    BusStopped,
}
