//! Pipeline coordinator: freshness-checked stage requests with batching
//!
//! A stage component asks for data at its stage; the coordinator serves
//! fresh pipeline data directly, otherwise parks the symbol in a per-stage
//! pending set that a background drainer flushes through the dedup gateway
//! once per batch window.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::{CacheClass, MarketCache};
use crate::config::CoreConfig;
use crate::gateway::{DedupGateway, GatewayStats};
use crate::metrics::Metrics;
use crate::pipeline::state::{PipelineStatus, Stage, SymbolPipeline};

/// Stages that accept data requests. Execution is advanced by external
/// collaborators only.
const REQUEST_STAGES: [Stage; 3] = [Stage::Scout, Stage::Ia1, Stage::Ia2];

#[derive(Default)]
struct Counters {
    pipeline_reuses: AtomicU64,
    batch_optimizations: AtomicU64,
    predictive_caches: AtomicU64,
}

/// Coordinator metrics snapshot, embedding the gateway's view of
/// prevented upstream calls.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorMetrics {
    pub pipeline_reuses: u64,
    pub batch_optimizations: u64,
    pub predictive_caches: u64,
    pub active_pipelines: usize,
    pub pending_batches: HashMap<String, usize>,
    pub gateway: GatewayStats,
}

pub struct PipelineCoordinator {
    cache: Arc<MarketCache>,
    gateway: Arc<DedupGateway>,
    config: CoreConfig,
    pipelines: RwLock<HashMap<String, SymbolPipeline>>,
    pending: HashMap<Stage, Mutex<HashSet<String>>>,
    drain_notify: HashMap<Stage, Notify>,
    drain_handle: RwLock<Option<JoinHandle<()>>>,
    counters: Counters,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineCoordinator {
    pub fn new(cache: Arc<MarketCache>, gateway: Arc<DedupGateway>, config: CoreConfig) -> Self {
        let pending = REQUEST_STAGES
            .into_iter()
            .map(|stage| (stage, Mutex::new(HashSet::new())))
            .collect();
        let drain_notify = REQUEST_STAGES
            .into_iter()
            .map(|stage| (stage, Notify::new()))
            .collect();

        Self {
            cache,
            gateway,
            config,
            pipelines: RwLock::new(HashMap::new()),
            pending,
            drain_notify,
            drain_handle: RwLock::new(None),
            counters: Counters::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the background batch drainer (also reaps old pipelines).
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.drain_handle.write().await;
        if handle.is_some() {
            return;
        }

        let coordinator = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            let mut since_reap = Duration::ZERO;
            loop {
                tokio::time::sleep(coordinator.config.batch_window).await;
                coordinator.drain_pending().await;

                since_reap += coordinator.config.batch_window;
                if since_reap >= coordinator.config.reap_interval {
                    since_reap = Duration::ZERO;
                    coordinator
                        .cleanup_old_pipelines(coordinator.config.pipeline_reap_age)
                        .await;
                }
            }
        }));
        info!(
            batch_window_ms = self.config.batch_window.as_millis() as u64,
            "pipeline coordinator started"
        );
    }

    /// Stop the background drainer.
    pub async fn stop(&self) {
        let mut handle = self.drain_handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("pipeline coordinator stopped");
        }
    }

    /// Request Scout-stage data for a symbol.
    ///
    /// Fresh pipeline data is reused; `force_refresh` bypasses the batch
    /// path and fetches directly through the gateway.
    pub async fn request_scout_data(&self, symbol: &str, force_refresh: bool) -> Option<Value> {
        let symbol = symbol.to_uppercase();

        if !force_refresh {
            if let Some(payload) = self
                .fresh_payload(&symbol, Stage::Scout, self.config.stages.scout_max_age)
                .await
            {
                return Some(payload);
            }
        }

        if force_refresh {
            return self.fetch_scout_direct(&symbol).await;
        }

        self.enqueue(Stage::Scout, &symbol).await;
        self.await_drained(Stage::Scout, &symbol).await
    }

    /// Request IA1-stage data. A provided `scout_data` payload advances the
    /// Scout stage first; a missing Scout payload triggers an upstream
    /// request so the forward dependency always holds.
    pub async fn request_ia1_data(&self, symbol: &str, scout_data: Option<Value>) -> Option<Value> {
        let symbol = symbol.to_uppercase();
        self.ensure_pipeline(&symbol).await;

        if let Some(scout) = scout_data {
            self.advance_stage(&symbol, Stage::Scout, scout).await;
        } else if !self.has_payload(&symbol, Stage::Scout).await {
            if let Some(scout) = self.request_scout_data(&symbol, false).await {
                self.advance_stage(&symbol, Stage::Scout, scout).await;
            }
        }

        if let Some(payload) = self
            .fresh_payload(&symbol, Stage::Ia1, self.config.stages.ia1_max_age)
            .await
        {
            return Some(payload);
        }

        self.enqueue(Stage::Ia1, &symbol).await;
        self.await_drained(Stage::Ia1, &symbol).await
    }

    /// Request IA2-stage data, with IA1 as the prerequisite.
    pub async fn request_ia2_data(&self, symbol: &str, ia1_data: Option<Value>) -> Option<Value> {
        let symbol = symbol.to_uppercase();
        self.ensure_pipeline(&symbol).await;

        if let Some(ia1) = ia1_data {
            self.advance_stage(&symbol, Stage::Ia1, ia1).await;
        } else if !self.has_payload(&symbol, Stage::Ia1).await {
            if let Some(ia1) = self.request_ia1_data(&symbol, None).await {
                self.advance_stage(&symbol, Stage::Ia1, ia1).await;
            }
        }

        if let Some(payload) = self
            .fresh_payload(&symbol, Stage::Ia2, self.config.stages.ia2_max_age)
            .await
        {
            return Some(payload);
        }

        self.enqueue(Stage::Ia2, &symbol).await;
        self.await_drained(Stage::Ia2, &symbol).await
    }

    /// Store a stage result computed by an external stage component,
    /// advancing the symbol's pipeline.
    pub async fn advance_stage(&self, symbol: &str, stage: Stage, payload: Value) {
        let symbol = symbol.to_uppercase();
        let mut pipelines = self.pipelines.write().await;
        let pipeline = pipelines
            .entry(symbol.clone())
            .or_insert_with(|| SymbolPipeline::new(symbol));
        pipeline.advance_stage(stage, payload);

        if let Some(metrics) = &self.metrics {
            metrics.active_pipelines.set(pipelines.len() as i64);
        }
    }

    /// Proactively warm the cache for a symbol set ahead of demand.
    pub async fn predict_and_cache(&self, symbols: &[String]) {
        info!(count = symbols.len(), "predictive caching for {} symbols", symbols.len());

        self.gateway
            .fetch_many(
                symbols,
                Some(self.config.stages.scout_max_age),
                self.config.batch_size,
            )
            .await;

        self.counters
            .predictive_caches
            .fetch_add(symbols.len() as u64, Ordering::Relaxed);
        info!("predictive caching completed");
    }

    /// Remove pipelines untouched for longer than `max_age`.
    pub async fn cleanup_old_pipelines(&self, max_age: Duration) -> usize {
        let mut pipelines = self.pipelines.write().await;
        let before = pipelines.len();
        pipelines.retain(|_, pipeline| pipeline.is_fresh(max_age));
        let removed = before - pipelines.len();

        if let Some(metrics) = &self.metrics {
            metrics.active_pipelines.set(pipelines.len() as i64);
        }
        if removed > 0 {
            info!(removed = removed, "cleaned up {} old pipelines", removed);
        }
        removed
    }

    /// Observability snapshot for one symbol's pipeline.
    pub async fn get_pipeline_status(&self, symbol: &str) -> Option<PipelineStatus> {
        let symbol = symbol.to_uppercase();
        let pipelines = self.pipelines.read().await;
        pipelines.get(&symbol).map(|p| p.status())
    }

    /// Coordination metrics, including the gateway's prevented-call view.
    pub async fn metrics(&self) -> CoordinatorMetrics {
        let active_pipelines = self.pipelines.read().await.len();
        let mut pending_batches = HashMap::new();
        for stage in REQUEST_STAGES {
            let size = self.pending[&stage].lock().await.len();
            pending_batches.insert(stage.as_str().to_string(), size);
        }

        CoordinatorMetrics {
            pipeline_reuses: self.counters.pipeline_reuses.load(Ordering::Relaxed),
            batch_optimizations: self.counters.batch_optimizations.load(Ordering::Relaxed),
            predictive_caches: self.counters.predictive_caches.load(Ordering::Relaxed),
            active_pipelines,
            pending_batches,
            gateway: self.gateway.stats(),
        }
    }

    async fn ensure_pipeline(&self, symbol: &str) {
        let mut pipelines = self.pipelines.write().await;
        if !pipelines.contains_key(symbol) {
            pipelines.insert(symbol.to_string(), SymbolPipeline::new(symbol));
            if let Some(metrics) = &self.metrics {
                metrics.active_pipelines.set(pipelines.len() as i64);
            }
        }
    }

    async fn has_payload(&self, symbol: &str, stage: Stage) -> bool {
        let pipelines = self.pipelines.read().await;
        pipelines
            .get(symbol)
            .map(|p| p.payload(stage).is_some())
            .unwrap_or(false)
    }

    /// Return the stage payload when the pipeline is fresh for that
    /// stage's window, counting a reuse.
    async fn fresh_payload(&self, symbol: &str, stage: Stage, max_age: Duration) -> Option<Value> {
        let pipelines = self.pipelines.read().await;
        let pipeline = pipelines.get(symbol)?;
        if pipeline.payload(stage).is_none() || !pipeline.is_fresh(max_age) {
            return None;
        }

        self.counters.pipeline_reuses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.pipeline_reuses_total.inc();
        }
        debug!(symbol = %symbol, stage = %stage, "pipeline reuse for {}", symbol);
        pipeline.payload(stage).cloned()
    }

    async fn enqueue(&self, stage: Stage, symbol: &str) {
        // Every request stage is inserted in `new`, so the lookup cannot fail.
        self.pending[&stage].lock().await.insert(symbol.to_string());
    }

    /// Wait until a drain has produced this symbol's stage payload,
    /// bounded by one batch window plus margin.
    ///
    /// A drain already in flight when the symbol was enqueued notifies
    /// without having covered it, so a single wake is not enough: keep
    /// waiting until the payload appears or the deadline passes, then
    /// re-read one last time.
    async fn await_drained(&self, stage: Stage, symbol: &str) -> Option<Value> {
        let deadline = tokio::time::Instant::now()
            + self.config.batch_window
            + self.config.batch_margin;

        loop {
            let notified = self.drain_notify[&stage].notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
            if let Some(payload) = self.stage_payload(symbol, stage).await {
                return Some(payload);
            }
        }

        self.stage_payload(symbol, stage).await
    }

    async fn stage_payload(&self, symbol: &str, stage: Stage) -> Option<Value> {
        let pipelines = self.pipelines.read().await;
        pipelines.get(symbol).and_then(|p| p.payload(stage).cloned())
    }

    async fn drain_pending(&self) {
        for stage in REQUEST_STAGES {
            let symbols: Vec<String> = {
                let mut pending = self.pending[&stage].lock().await;
                pending.drain().collect()
            };
            if symbols.is_empty() {
                continue;
            }

            if symbols.len() > 1 {
                self.counters
                    .batch_optimizations
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    stage = %stage,
                    count = symbols.len(),
                    "batch processing {} symbols for {}",
                    symbols.len(),
                    stage
                );
            }

            match stage {
                Stage::Scout => self.drain_scout(symbols).await,
                Stage::Ia1 | Stage::Ia2 => self.prewarm(stage, symbols).await,
                Stage::Execution => {}
            }

            self.drain_notify[&stage].notify_waiters();
        }
    }

    /// Bulk-fetch scout data and advance each symbol's pipeline.
    async fn drain_scout(&self, symbols: Vec<String>) {
        let results = self
            .gateway
            .fetch_many(
                &symbols,
                Some(self.config.stages.scout_max_age),
                self.config.batch_size,
            )
            .await;

        for (symbol, record) in results {
            match serde_json::to_value(&record) {
                Ok(payload) => {
                    self.advance_stage(&symbol, Stage::Scout, payload).await;
                    debug!(symbol = %symbol, "scout data cached for {}", symbol);
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "failed to encode scout payload");
                }
            }
        }
    }

    /// Immediate gateway fetch for urgent scout requests.
    async fn fetch_scout_direct(&self, symbol: &str) -> Option<Value> {
        let record = self.gateway.fetch(symbol, None, true).await?;
        match serde_json::to_value(&record) {
            Ok(payload) => {
                self.advance_stage(symbol, Stage::Scout, payload.clone()).await;
                Some(payload)
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "failed to encode scout payload");
                None
            }
        }
    }

    /// Pre-warm shared inputs for IA1/IA2 symbols. The per-symbol analysis
    /// itself stays with the stage components; this only makes sure the
    /// underlying market and indicator data is cached before they run.
    async fn prewarm(&self, stage: Stage, symbols: Vec<String>) {
        for symbol in symbols {
            let ohlcv_params = serde_json::json!({ "timeframe": "1d" });
            if self
                .cache
                .get(CacheClass::Ohlcv, &symbol, Some(&ohlcv_params))
                .await
                .is_none()
            {
                debug!(stage = %stage, symbol = %symbol, "pre-warming shared inputs for {}", symbol);
                self.gateway.fetch(&symbol, None, false).await;
            }
        }
    }
}
