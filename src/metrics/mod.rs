//! Prometheus metrics for the coordination core
//!
//! Components take an optional `Arc<Metrics>` so library users can opt in
//! and expose the registry through whatever HTTP layer they already run.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

pub struct Metrics {
    registry: Registry,

    // Cache
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub cache_evictions_total: IntCounter,

    // Gateway
    pub upstream_calls_total: IntCounter,
    pub collapsed_calls_total: IntCounter,
    pub stale_fallbacks_total: IntCounter,

    // Coordinator
    pub pipeline_reuses_total: IntCounter,
    pub active_pipelines: IntGauge,

    // Event bus
    pub events_published_total: IntCounter,
    pub events_processed_total: IntCounter,
    pub handler_errors_total: IntCounter,
    pub event_dispatch_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits_total = IntCounter::with_opts(Opts::new(
            "marketflow_cache_hits_total",
            "Cache reads served from a fresh entry",
        ))?;
        let cache_misses_total = IntCounter::with_opts(Opts::new(
            "marketflow_cache_misses_total",
            "Cache reads that found no fresh entry",
        ))?;
        let cache_evictions_total = IntCounter::with_opts(Opts::new(
            "marketflow_cache_evictions_total",
            "Entries removed by LRU capacity enforcement",
        ))?;
        let upstream_calls_total = IntCounter::with_opts(Opts::new(
            "marketflow_upstream_calls_total",
            "Fetches issued to the market data provider",
        ))?;
        let collapsed_calls_total = IntCounter::with_opts(Opts::new(
            "marketflow_collapsed_calls_total",
            "Fetches collapsed onto an already in-flight request",
        ))?;
        let stale_fallbacks_total = IntCounter::with_opts(Opts::new(
            "marketflow_stale_fallbacks_total",
            "Fetch failures served from stale cache data",
        ))?;
        let pipeline_reuses_total = IntCounter::with_opts(Opts::new(
            "marketflow_pipeline_reuses_total",
            "Stage requests served from fresh pipeline data",
        ))?;
        let active_pipelines = IntGauge::with_opts(Opts::new(
            "marketflow_active_pipelines",
            "Symbol pipelines currently tracked",
        ))?;
        let events_published_total = IntCounter::with_opts(Opts::new(
            "marketflow_events_published_total",
            "Events accepted onto the bus queue",
        ))?;
        let events_processed_total = IntCounter::with_opts(Opts::new(
            "marketflow_events_processed_total",
            "Events fanned out to handlers",
        ))?;
        let handler_errors_total = IntCounter::with_opts(Opts::new(
            "marketflow_handler_errors_total",
            "Individual handler failures during delivery",
        ))?;
        let event_dispatch_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "marketflow_event_dispatch_duration_seconds",
            "Wall time spent delivering one event to its handler group",
        ))?;

        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_evictions_total.clone()))?;
        registry.register(Box::new(upstream_calls_total.clone()))?;
        registry.register(Box::new(collapsed_calls_total.clone()))?;
        registry.register(Box::new(stale_fallbacks_total.clone()))?;
        registry.register(Box::new(pipeline_reuses_total.clone()))?;
        registry.register(Box::new(active_pipelines.clone()))?;
        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(events_processed_total.clone()))?;
        registry.register(Box::new(handler_errors_total.clone()))?;
        registry.register(Box::new(event_dispatch_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            upstream_calls_total,
            collapsed_calls_total,
            stale_fallbacks_total,
            pipeline_reuses_total,
            active_pipelines,
            events_published_total,
            events_processed_total,
            handler_errors_total,
            event_dispatch_duration_seconds,
        })
    }

    /// Gather all metric families for exposition.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
