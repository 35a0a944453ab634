//! Queue metrics.
//!
//! Queues report through a [`MetricsProvider`] keyed by queue name. Unnamed
//! queues report nothing. The default provider forwards to OpenTelemetry.

use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Sink for per-queue observations.
pub trait MetricsProvider: Send + Sync {
    /// An item was accepted by `add`.
    fn add(&self, queue: &str);

    /// The number of pending items changed by `delta`.
    fn depth(&self, queue: &str, delta: i64);

    /// Time an item waited between `add` and `get`.
    fn queue_latency(&self, queue: &str, latency: Duration);

    /// Time between `get` and `done`.
    fn work_duration(&self, queue: &str, duration: Duration);

    /// An item was re-added through `add_after`.
    fn retry(&self, queue: &str);
}

/// Reports queue metrics through the global OpenTelemetry meter.
pub struct OtelMetricsProvider {
    adds: Counter<u64>,
    depth: UpDownCounter<i64>,
    latency: Histogram<f64>,
    work_duration: Histogram<f64>,
    retries: Counter<u64>,
}

impl OtelMetricsProvider {
    pub fn new() -> Self {
        Self {
            adds: metrics::queue_adds(),
            depth: metrics::queue_depth(),
            latency: metrics::queue_latency_seconds(),
            work_duration: metrics::work_duration_seconds(),
            retries: metrics::queue_retries(),
        }
    }
}

impl Default for OtelMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn labels(queue: &str) -> [KeyValue; 1] {
    [KeyValue::new("name", queue.to_string())]
}

impl MetricsProvider for OtelMetricsProvider {
    fn add(&self, queue: &str) {
        self.adds.add(1, &labels(queue));
    }

    fn depth(&self, queue: &str, delta: i64) {
        self.depth.add(delta, &labels(queue));
    }

    fn queue_latency(&self, queue: &str, latency: Duration) {
        self.latency.record(latency.as_secs_f64(), &labels(queue));
    }

    fn work_duration(&self, queue: &str, duration: Duration) {
        self.work_duration
            .record(duration.as_secs_f64(), &labels(queue));
    }

    fn retry(&self, queue: &str) {
        self.retries.add(1, &labels(queue));
    }
}

static PROVIDER: OnceLock<Arc<dyn MetricsProvider>> = OnceLock::new();

/// Install the process-wide provider used by named queues built without
/// an explicit one. Only the first call takes effect; returns whether this
/// call did.
pub fn set_provider(provider: Arc<dyn MetricsProvider>) -> bool {
    let installed = PROVIDER.set(provider).is_ok();
    if !installed {
        tracing::warn!("queue metrics provider already set, ignoring");
    }
    installed
}

/// The provider installed by [`set_provider`], or an [`OtelMetricsProvider`].
pub fn global_provider() -> Arc<dyn MetricsProvider> {
    match PROVIDER.get() {
        Some(provider) => Arc::clone(provider),
        None => Arc::new(OtelMetricsProvider::new()),
    }
}

/// A queue's handle on its provider. Disabled when the queue is unnamed.
#[derive(Clone)]
pub(crate) struct QueueMetrics {
    sink: Option<(Arc<str>, Arc<dyn MetricsProvider>)>,
}

impl QueueMetrics {
    pub(crate) fn new(name: &str, provider: Option<Arc<dyn MetricsProvider>>) -> Self {
        let sink = match provider {
            Some(provider) if !name.is_empty() => Some((Arc::from(name), provider)),
            _ => None,
        };
        Self { sink }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn name(&self) -> &str {
        self.sink.as_ref().map_or("", |(name, _)| &**name)
    }

    pub(crate) fn add(&self) {
        if let Some((name, provider)) = &self.sink {
            provider.add(name);
            provider.depth(name, 1);
        }
    }

    /// An item left the pending set after waiting `latency`.
    pub(crate) fn get(&self, latency: Option<Duration>) {
        if let Some((name, provider)) = &self.sink {
            provider.depth(name, -1);
            if let Some(latency) = latency {
                provider.queue_latency(name, latency);
            }
        }
    }

    pub(crate) fn done(&self, duration: Duration) {
        if let Some((name, provider)) = &self.sink {
            provider.work_duration(name, duration);
        }
    }

    pub(crate) fn retry(&self) {
        if let Some((name, provider)) = &self.sink {
            provider.retry(name);
        }
    }
}
