//! Shared test doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use workq::queue::MetricsProvider;
use workq::rate_limiter::RateLimiter;

/// `when` returns `count * step` after bumping the item's count.
pub struct CountingRateLimiter<T> {
    step: Duration,
    counts: Mutex<HashMap<T, usize>>,
}

impl<T: Eq + Hash + Clone> CountingRateLimiter<T> {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter whose delay is always zero but which still counts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl<T: Eq + Hash + Clone + Send> RateLimiter<T> for CountingRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(item.clone()).or_insert(0);
        *count += 1;
        self.step * (*count as u32)
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.counts.lock().unwrap().get(item).copied().unwrap_or(0)
    }

    fn forget(&self, item: &T) {
        self.counts.lock().unwrap().remove(item);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Add,
    Depth(i64),
    QueueLatency(Duration),
    WorkDuration(Duration),
    Retry,
}

/// Records every observation, tagged with the queue name.
#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<(String, Observed)>>,
}

impl RecordingMetrics {
    pub fn events(&self) -> Vec<(String, Observed)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Observed) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, o)| o == wanted)
            .count()
    }

    fn push(&self, queue: &str, observed: Observed) {
        self.events
            .lock()
            .unwrap()
            .push((queue.to_string(), observed));
    }
}

impl MetricsProvider for RecordingMetrics {
    fn add(&self, queue: &str) {
        self.push(queue, Observed::Add);
    }

    fn depth(&self, queue: &str, delta: i64) {
        self.push(queue, Observed::Depth(delta));
    }

    fn queue_latency(&self, queue: &str, latency: Duration) {
        self.push(queue, Observed::QueueLatency(latency));
    }

    fn work_duration(&self, queue: &str, duration: Duration) {
        self.push(queue, Observed::WorkDuration(duration));
    }

    fn retry(&self, queue: &str) {
        self.push(queue, Observed::Retry);
    }
}
