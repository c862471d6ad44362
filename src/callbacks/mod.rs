//! Lifecycle callback manager (§4.11), grounded on
//! `original_source/semantic_layer/monitoring/callback_manager.py`: an
//! ordered collection of observers, each with per-category suppression,
//! exceptions caught and logged rather than propagated.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Event {
    QueryStart { request_id: String },
    QueryEnd { request_id: String, row_count: usize, execution_time_ms: f64 },
    QueryError { request_id: String, message: String },
    CacheHit { key: String },
    CacheMiss { key: String },
    PreAggUsed { cube: String, table: String },
    PreAggSkipped { cube: String, reason: String },
    SqlGenerated { sql: String, elapsed: Duration },
    CustomEvent { name: String, data: Value },
}

/// The fixed event categories an observer can suppress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Query,
    Cache,
    PreAgg,
    Sql,
    Custom,
}

impl Event {
    fn category(&self) -> Category {
        match self {
            Event::QueryStart { .. } | Event::QueryEnd { .. } | Event::QueryError { .. } => Category::Query,
            Event::CacheHit { .. } | Event::CacheMiss { .. } => Category::Cache,
            Event::PreAggUsed { .. } | Event::PreAggSkipped { .. } => Category::PreAgg,
            Event::SqlGenerated { .. } => Category::Sql,
            Event::CustomEvent { .. } => Category::Custom,
        }
    }
}

/// An observer may suppress entire categories and may opt in to re-raising
/// (propagating) its own panics/errors instead of having them swallowed.
static NO_SUPPRESSIONS: once_cell::sync::Lazy<HashSet<Category>> = once_cell::sync::Lazy::new(HashSet::new);

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);

    fn suppressed(&self) -> &HashSet<Category> {
        &NO_SUPPRESSIONS
    }

    fn reraise_on_error(&self) -> bool {
        false
    }
}

pub struct CallbackManager {
    observers: RwLock<Vec<Box<dyn Observer>>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self { observers: RwLock::new(Vec::new()) }
    }

    pub fn register(&self, observer: Box<dyn Observer>) {
        self.observers.write().expect("observer registry lock poisoned").push(observer);
    }

    /// Delivers `event` to every registered observer in registration order,
    /// skipping observers that suppress its category. An observer panic is
    /// caught and logged unless the observer opted in to re-raising.
    pub fn emit(&self, event: Event) {
        let category = event.category();
        let observers = self.observers.read().expect("observer registry lock poisoned");
        for observer in observers.iter() {
            if observer.suppressed().contains(&category) {
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer.on_event(&event)));
            if let Err(panic) = result {
                if observer.reraise_on_error() {
                    std::panic::resume_unwind(panic);
                }
                tracing::error!("callback observer panicked while handling {category:?} event");
            }
        }
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one structured log line per event, grounded on the original's
/// per-query log observer (request, timing, user id, SQL, status).
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::QueryStart { request_id } => tracing::info!(request_id, "query_start"),
            Event::QueryEnd { request_id, row_count, execution_time_ms } => {
                tracing::info!(request_id, row_count, execution_time_ms, "query_end")
            }
            Event::QueryError { request_id, message } => tracing::error!(request_id, message, "query_error"),
            Event::CacheHit { key } => tracing::debug!(key, "cache_hit"),
            Event::CacheMiss { key } => tracing::debug!(key, "cache_miss"),
            Event::PreAggUsed { cube, table } => tracing::debug!(cube, table, "pre_agg_used"),
            Event::PreAggSkipped { cube, reason } => tracing::debug!(cube, reason, "pre_agg_skipped"),
            Event::SqlGenerated { sql, elapsed } => {
                tracing::debug!(sql, elapsed_ms = elapsed.as_millis() as u64, "sql_generated")
            }
            Event::CustomEvent { name, data } => tracing::debug!(name, %data, "custom_event"),
        }
    }
}

/// Updates in-process counters/histograms, grounded on the original's
/// metrics observer (query counts by status, cache hits/misses, duration
/// percentiles). Percentile computation is left to whatever exporter reads
/// these fields; this observer only accumulates raw counts and a duration
/// sample list.
#[derive(Default)]
pub struct MetricsObserver {
    inner: RwLock<Metrics>,
}

#[derive(Default, Debug, Clone)]
pub struct Metrics {
    pub queries_started: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub durations_ms: Vec<f64>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Metrics {
        self.inner.read().expect("metrics lock poisoned").clone()
    }
}

impl Observer for MetricsObserver {
    fn on_event(&self, event: &Event) {
        let mut metrics = self.inner.write().expect("metrics lock poisoned");
        match event {
            Event::QueryStart { .. } => metrics.queries_started += 1,
            Event::QueryEnd { execution_time_ms, .. } => {
                metrics.queries_completed += 1;
                metrics.durations_ms.push(*execution_time_ms);
            }
            Event::QueryError { .. } => metrics.queries_failed += 1,
            Event::CacheHit { .. } => metrics.cache_hits += 1,
            Event::CacheMiss { .. } => metrics.cache_misses += 1,
            _ => {}
        }
    }
}
