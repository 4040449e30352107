use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed enumeration of event types flowing through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Market events
    OpportunitiesFound,
    MarketDataUpdated,
    // Analysis events
    AnalysisCompleted,
    AnalysisFailed,
    // Strategy events
    DecisionMade,
    DecisionFailed,
    // Execution events
    TradeExecuted,
    TradeFailed,
    PositionOpened,
    PositionClosed,
    // System events
    CacheInvalidated,
    PerformanceAlert,
    ErrorOccurred,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OpportunitiesFound => "market.opportunities.found",
            EventKind::MarketDataUpdated => "market.data.updated",
            EventKind::AnalysisCompleted => "analysis.ia1.completed",
            EventKind::AnalysisFailed => "analysis.ia1.failed",
            EventKind::DecisionMade => "strategy.ia2.decision",
            EventKind::DecisionFailed => "strategy.ia2.failed",
            EventKind::TradeExecuted => "execution.trade.executed",
            EventKind::TradeFailed => "execution.trade.failed",
            EventKind::PositionOpened => "execution.position.opened",
            EventKind::PositionClosed => "execution.position.closed",
            EventKind::CacheInvalidated => "system.cache.invalidated",
            EventKind::PerformanceAlert => "system.performance.alert",
            EventKind::ErrorOccurred => "system.error.occurred",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable event as published on the bus.
///
/// `priority` runs 1 (high) to 3 (low).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub priority: u8,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value, source: impl Into<String>, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            created_at: Utc::now(),
            source: source.into(),
            priority,
        }
    }
}
