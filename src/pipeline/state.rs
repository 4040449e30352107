//! Per-symbol pipeline state across Scout -> IA1 -> IA2 -> Execution

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// One step in the per-symbol processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scout,
    Ia1,
    Ia2,
    Execution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scout => "scout",
            Stage::Ia1 => "ia1",
            Stage::Ia2 => "ia2",
            Stage::Execution => "execution",
        }
    }

    /// Position in the stage order; later stages have higher values.
    pub fn order(&self) -> u8 {
        match self {
            Stage::Scout => 0,
            Stage::Ia1 => 1,
            Stage::Ia2 => 2,
            Stage::Execution => 3,
        }
    }

    /// The stage that must be fresh before this one can be served.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Scout => None,
            Stage::Ia1 => Some(Stage::Scout),
            Stage::Ia2 => Some(Stage::Ia1),
            Stage::Execution => Some(Stage::Ia2),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline of stage payloads for one symbol.
///
/// `current_stage` only ever moves forward; re-entering the same stage
/// with fresh data is allowed, rolling back is not.
#[derive(Debug, Clone)]
pub struct SymbolPipeline {
    symbol: String,
    current_stage: Stage,
    payloads: HashMap<Stage, Value>,
    completed_stages: HashSet<Stage>,
    created_at: Instant,
    updated_at: Instant,
}

impl SymbolPipeline {
    pub fn new(symbol: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            symbol: symbol.into(),
            current_stage: Stage::Scout,
            payloads: HashMap::new(),
            completed_stages: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    pub fn completed_stages(&self) -> &HashSet<Stage> {
        &self.completed_stages
    }

    pub fn payload(&self, stage: Stage) -> Option<&Value> {
        self.payloads.get(&stage)
    }

    /// Store a stage's payload and advance the pipeline.
    ///
    /// The current stage never moves backwards: writing an earlier stage's
    /// payload (a re-entry with fresh data) updates the payload and the
    /// timestamp but leaves `current_stage` where it is.
    pub fn advance_stage(&mut self, stage: Stage, payload: Value) {
        if stage.order() >= self.current_stage.order() {
            self.current_stage = stage;
        }
        self.payloads.insert(stage, payload);
        self.completed_stages.insert(stage);
        self.updated_at = Instant::now();
    }

    /// Whether the pipeline was updated within the given window.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.updated_at.elapsed() < max_age
    }

    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }

    pub fn status(&self) -> PipelineStatus {
        let mut completed: Vec<Stage> = self.completed_stages.iter().copied().collect();
        completed.sort();

        PipelineStatus {
            symbol: self.symbol.clone(),
            current_stage: self.current_stage,
            completed_stages: completed,
            age_secs: self.age().as_secs_f64(),
            lifetime_secs: self.created_at.elapsed().as_secs_f64(),
            has_scout_data: self.payloads.contains_key(&Stage::Scout),
            has_ia1_data: self.payloads.contains_key(&Stage::Ia1),
            has_ia2_data: self.payloads.contains_key(&Stage::Ia2),
        }
    }
}

/// Observability snapshot of one pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub symbol: String,
    pub current_stage: Stage,
    pub completed_stages: Vec<Stage>,
    /// Seconds since the last stage advance.
    pub age_secs: f64,
    /// Seconds since the pipeline was created.
    pub lifetime_secs: f64,
    pub has_scout_data: bool,
    pub has_ia1_data: bool,
    pub has_ia2_data: bool,
}
