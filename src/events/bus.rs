//! Central event bus: prioritized, fault-isolated pub/sub
//!
//! `publish` enqueues and returns immediately; a background loop fans each
//! event out to all subscribed handlers concurrently, in ascending
//! priority order, with a group delivery timeout. Handler faults are
//! counted and logged, never propagated to the publisher or to sibling
//! handlers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::error::{BoxError, CoreError};
use crate::events::event::{Event, EventKind};
use crate::metrics::Metrics;

/// Dequeue timeout so the loop can observe shutdown between events.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Uniform handler capability invoked by the bus.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), BoxError>;
}

/// Adapt an async closure into an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    struct FnHandler(Box<dyn Fn(Event) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>);

    #[async_trait::async_trait]
    impl EventHandler for FnHandler {
        async fn handle(&self, event: Event) -> Result<(), BoxError> {
            (self.0)(event).await
        }
    }

    Arc::new(FnHandler(Box::new(move |event| Box::pin(f(event)))))
}

pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

enum Delivery {
    Handled,
    Vetoed,
    Failed,
}

struct Registration {
    id: u64,
    handler: Arc<dyn EventHandler>,
    priority: u8,
    predicate: Option<Predicate>,
    calls: AtomicU64,
    errors: AtomicU64,
}

impl Registration {
    /// Deliver one event: a predicate veto is neither a call nor an
    /// error; a handler fault is counted and contained here.
    async fn deliver(&self, event: Event) -> Delivery {
        if let Some(predicate) = &self.predicate {
            if !predicate(&event) {
                return Delivery::Vetoed;
            }
        }

        let kind = event.kind;
        match self.handler.handle(event).await {
            Ok(()) => {
                self.calls.fetch_add(1, Ordering::Relaxed);
                Delivery::Handled
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %kind, error = %e, "event handler error");
                Delivery::Failed
            }
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    handlers_registered: AtomicU64,
}

/// Per-kind handler statistics.
#[derive(Debug, Clone, Serialize)]
pub struct KindStats {
    pub handlers: usize,
    pub total_calls: u64,
    pub total_errors: u64,
}

/// Event bus statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub events_published: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub handlers_registered: u64,
    pub handlers: HashMap<String, KindStats>,
    pub queue_depth: usize,
    pub running: bool,
    pub recent_events: usize,
}

pub struct EventBus {
    registrations: RwLock<HashMap<EventKind, Vec<Arc<Registration>>>>,
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    running: AtomicBool,
    task: RwLock<Option<JoinHandle<()>>>,
    history: RwLock<VecDeque<Event>>,
    history_limit: usize,
    handler_timeout: Duration,
    queue_capacity: usize,
    counters: Counters,
    next_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl EventBus {
    pub fn new(config: &CoreConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            registrations: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            running: AtomicBool::new(false),
            task: RwLock::new(None),
            history: RwLock::new(VecDeque::new()),
            history_limit: config.history_limit,
            handler_timeout: config.handler_timeout,
            queue_capacity: config.queue_capacity,
            counters: Counters::default(),
            next_id: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the event processing loop.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.write().await;
        if task.is_some() {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let bus = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            bus.process_events().await;
        }));
        info!("event bus started");
    }

    /// Stop the processing loop. Cooperative: the loop observes the flag
    /// at its next dequeue timeout.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = self.task.write().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                warn!("event loop did not stop in time, aborting");
                handle.abort();
            }
            info!("event bus stopped");
        }
    }

    /// Subscribe a handler to an event kind.
    ///
    /// Handlers for one kind run in ascending `priority` order (1=high,
    /// 3=low); a predicate can veto individual events before delivery.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
        priority: u8,
        predicate: Option<Predicate>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let registration = Arc::new(Registration {
            id,
            handler,
            priority,
            predicate,
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });

        let mut registrations = self.registrations.write().await;
        let entry = registrations.entry(kind).or_default();
        entry.push(registration);
        // Stable sort: equal priorities keep subscription order.
        entry.sort_by_key(|r| r.priority);

        self.counters
            .handlers_registered
            .fetch_add(1, Ordering::Relaxed);
        debug!(kind = %kind, priority = priority, "subscribed to {}", kind);
        SubscriptionId(id)
    }

    /// Remove a subscription.
    pub async fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        let mut registrations = self.registrations.write().await;
        if let Some(entry) = registrations.get_mut(&kind) {
            entry.retain(|r| r.id != id.0);
            debug!(kind = %kind, "unsubscribed from {}", kind);
        }
    }

    /// Publish an event. Never blocks beyond the enqueue: a full queue
    /// drops the event and surfaces the failure to the caller.
    pub async fn publish(
        &self,
        kind: EventKind,
        payload: Value,
        source: &str,
        priority: u8,
    ) -> Result<Event, CoreError> {
        let event = Event::new(kind, payload, source, priority);

        match self.tx.try_send(event.clone()) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.events_published_total.inc();
                }

                let mut history = self.history.write().await;
                history.push_back(event.clone());
                while history.len() > self.history_limit {
                    history.pop_front();
                }

                debug!(kind = %kind, source = %source, "published event");
                Ok(event)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(kind = %kind, "event queue full, dropping {} event", kind);
                Err(CoreError::QueueFull { kind })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CoreError::BusStopped),
        }
    }

    /// Publish an event and wait for all matching handlers, bypassing the
    /// queue. Returns each handler's success/failure.
    pub async fn publish_sync(&self, kind: EventKind, payload: Value, source: &str) -> Vec<bool> {
        let event = Event::new(kind, payload, source, 1);
        let registrations = self.matching(kind).await;

        let mut results = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let outcome = registration.deliver(event.clone()).await;
            results.push(matches!(outcome, Delivery::Handled));
        }
        results
    }

    /// Recently published events, most recent last.
    pub async fn recent_events(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> BusStats {
        let registrations = self.registrations.read().await;
        let mut handlers = HashMap::new();
        for (kind, entries) in registrations.iter() {
            handlers.insert(
                kind.as_str().to_string(),
                KindStats {
                    handlers: entries.len(),
                    total_calls: entries.iter().map(|r| r.calls.load(Ordering::Relaxed)).sum(),
                    total_errors: entries
                        .iter()
                        .map(|r| r.errors.load(Ordering::Relaxed))
                        .sum(),
                },
            );
        }

        BusStats {
            events_published: self.counters.published.load(Ordering::Relaxed),
            events_processed: self.counters.processed.load(Ordering::Relaxed),
            events_failed: self.counters.failed.load(Ordering::Relaxed),
            handlers_registered: self.counters.handlers_registered.load(Ordering::Relaxed),
            handlers,
            queue_depth: self.queue_capacity - self.tx.capacity(),
            running: self.running.load(Ordering::SeqCst),
            recent_events: self.history.read().await.len(),
        }
    }

    async fn matching(&self, kind: EventKind) -> Vec<Arc<Registration>> {
        let registrations = self.registrations.read().await;
        registrations.get(&kind).cloned().unwrap_or_default()
    }

    async fn process_events(self: Arc<Self>) {
        let mut rx_slot = self.rx.lock().await;
        let Some(rx) = rx_slot.as_mut() else {
            error!("event receiver already taken, loop not started");
            return;
        };
        info!("event processing loop started");

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
                // Timeout: re-check the running flag.
                Err(_) => continue,
                // All senders dropped.
                Ok(None) => break,
                Ok(Some(event)) => self.dispatch(event).await,
            }
        }
    }

    /// Fan one event out to all matching handlers concurrently, in
    /// ascending priority spawn order, bounded by the group timeout.
    async fn dispatch(&self, event: Event) {
        let registrations = self.matching(event.kind).await;
        let kind = event.kind;

        if !registrations.is_empty() {
            let timer = self
                .metrics
                .as_ref()
                .map(|m| m.event_dispatch_duration_seconds.start_timer());

            let tasks: Vec<JoinHandle<Delivery>> = registrations
                .iter()
                .map(|registration| {
                    let registration = Arc::clone(registration);
                    let event = event.clone();
                    tokio::spawn(async move { registration.deliver(event).await })
                })
                .collect();

            match tokio::time::timeout(self.handler_timeout, join_all(tasks)).await {
                Ok(outcomes) => {
                    for (outcome, registration) in outcomes.into_iter().zip(&registrations) {
                        match outcome {
                            Ok(Delivery::Failed) => {
                                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                                if let Some(metrics) = &self.metrics {
                                    metrics.handler_errors_total.inc();
                                }
                            }
                            Ok(_) => {}
                            // Handler panicked: count it against the
                            // registration like any other fault.
                            Err(_) => {
                                registration.errors.fetch_add(1, Ordering::Relaxed);
                                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(kind = %kind, "event handler panicked");
                            }
                        }
                    }
                }
                // Handlers still in flight are detached, not killed.
                Err(_) => warn!(kind = %kind, "event handler group timed out for {}", kind),
            }

            drop(timer);
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.events_processed_total.inc();
        }
    }
}
