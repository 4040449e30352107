//! Unit tests for event construction and naming

use serde_json::json;

use marketflow::events::{Event, EventKind};

#[test]
fn test_kind_names_follow_dotted_convention() {
    assert_eq!(EventKind::OpportunitiesFound.as_str(), "market.opportunities.found");
    assert_eq!(EventKind::AnalysisCompleted.as_str(), "analysis.ia1.completed");
    assert_eq!(EventKind::DecisionMade.as_str(), "strategy.ia2.decision");
    assert_eq!(EventKind::TradeExecuted.as_str(), "execution.trade.executed");
    assert_eq!(EventKind::CacheInvalidated.as_str(), "system.cache.invalidated");
}

#[test]
fn test_event_carries_metadata() {
    let event = Event::new(
        EventKind::MarketDataUpdated,
        json!({ "symbol": "BTC" }),
        "scout",
        2,
    );

    assert_eq!(event.kind, EventKind::MarketDataUpdated);
    assert_eq!(event.source, "scout");
    assert_eq!(event.priority, 2);
    assert_eq!(event.payload["symbol"], "BTC");
}

#[test]
fn test_event_ids_are_unique() {
    let a = Event::new(EventKind::ErrorOccurred, json!({}), "test", 1);
    let b = Event::new(EventKind::ErrorOccurred, json!({}), "test", 1);
    assert_ne!(a.id, b.id);
}
