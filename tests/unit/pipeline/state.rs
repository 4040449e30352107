//! Unit tests for per-symbol pipeline state

use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use marketflow::pipeline::{Stage, SymbolPipeline};

#[test]
fn test_stage_order_is_monotonic() {
    assert!(Stage::Scout.order() < Stage::Ia1.order());
    assert!(Stage::Ia1.order() < Stage::Ia2.order());
    assert!(Stage::Ia2.order() < Stage::Execution.order());
}

#[test]
fn test_stage_prerequisites() {
    assert_eq!(Stage::Scout.prerequisite(), None);
    assert_eq!(Stage::Ia1.prerequisite(), Some(Stage::Scout));
    assert_eq!(Stage::Ia2.prerequisite(), Some(Stage::Ia1));
    assert_eq!(Stage::Execution.prerequisite(), Some(Stage::Ia2));
}

#[test]
fn test_advance_stores_payload_and_moves_forward() {
    let mut pipeline = SymbolPipeline::new("BTC");
    assert_eq!(pipeline.current_stage(), Stage::Scout);

    pipeline.advance_stage(Stage::Scout, json!({ "price": 100.0 }));
    pipeline.advance_stage(Stage::Ia1, json!({ "analysis": "bullish" }));

    assert_eq!(pipeline.current_stage(), Stage::Ia1);
    assert!(pipeline.completed_stages().contains(&Stage::Scout));
    assert!(pipeline.completed_stages().contains(&Stage::Ia1));
    assert_eq!(
        pipeline.payload(Stage::Ia1),
        Some(&json!({ "analysis": "bullish" }))
    );
}

#[test]
fn test_current_stage_never_rolls_back() {
    let mut pipeline = SymbolPipeline::new("BTC");
    pipeline.advance_stage(Stage::Ia2, json!({ "decision": "long" }));

    // Re-entering an earlier stage refreshes its payload only.
    pipeline.advance_stage(Stage::Scout, json!({ "price": 101.0 }));

    assert_eq!(pipeline.current_stage(), Stage::Ia2);
    assert_eq!(pipeline.payload(Stage::Scout), Some(&json!({ "price": 101.0 })));
}

#[tokio::test(start_paused = true)]
async fn test_freshness_tracks_last_update() {
    let mut pipeline = SymbolPipeline::new("BTC");
    pipeline.advance_stage(Stage::Scout, json!({}));
    assert!(pipeline.is_fresh(Duration::from_secs(300)));

    sleep(Duration::from_secs(301)).await;
    assert!(!pipeline.is_fresh(Duration::from_secs(300)));

    // Any stage advance resets the clock.
    pipeline.advance_stage(Stage::Ia1, json!({}));
    assert!(pipeline.is_fresh(Duration::from_secs(300)));
}

#[tokio::test(start_paused = true)]
async fn test_status_snapshot() {
    let mut pipeline = SymbolPipeline::new("ETH");
    pipeline.advance_stage(Stage::Scout, json!({ "price": 2500.0 }));
    pipeline.advance_stage(Stage::Ia1, json!({ "analysis": "neutral" }));
    sleep(Duration::from_secs(5)).await;

    let status = pipeline.status();
    assert_eq!(status.symbol, "ETH");
    assert_eq!(status.current_stage, Stage::Ia1);
    assert_eq!(status.completed_stages, vec![Stage::Scout, Stage::Ia1]);
    assert!(status.has_scout_data);
    assert!(status.has_ia1_data);
    assert!(!status.has_ia2_data);
    assert!(status.age_secs >= 5.0);
    assert!(status.lifetime_secs >= status.age_secs);
}
