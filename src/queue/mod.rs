//! Work queues: the base dedup queue, delayed visibility, and rate-limited
//! re-delivery.
//!
//! The layers compose by ownership. [`RateLimitingQueue`] owns a
//! [`Delaying`] queue (by default a [`DelayingQueue`]), which owns a
//! [`WorkQueue`]. Each layer forwards the operations it does not change.

pub mod delaying;
pub mod fifo;
pub mod metrics;
pub mod rate_limiting;

pub use delaying::DelayingQueue;
pub use fifo::WorkQueue;
pub use metrics::{MetricsProvider, OtelMetricsProvider, global_provider, set_provider};
pub use rate_limiting::{RateLimitingQueue, RateLimitingQueueConfig};

use crate::clock::{Clock, RealClock};
use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Anything usable as a work item: compared by identity, cheap to clone.
///
/// Blanket-implemented; resource keys such as `String` or small `Copy`
/// structs all qualify.
pub trait Item: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> Item for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// The base queue contract.
///
/// An item is held at most once while pending. An item re-added while a
/// consumer is processing it is handed out again only after [`Queue::done`].
#[async_trait]
pub trait Queue<T: Item>: Send + Sync {
    /// Make `item` available to consumers. Dropped if shutting down.
    fn add(&self, item: T);

    /// Number of items ready to be handed out.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next item. `None` once the queue is shut down and
    /// nothing is left to hand out.
    async fn get(&self) -> Option<T>;

    /// Mark `item` as finished processing.
    fn done(&self, item: &T);

    /// Stop accepting items and release every waiting consumer.
    fn shut_down(&self);

    /// Like [`Queue::shut_down`], then wait until every item handed out
    /// has been marked done.
    async fn shut_down_with_drain(&self);

    fn shutting_down(&self) -> bool;
}

/// A queue that can hold an item back until a delay has elapsed.
pub trait Delaying<T: Item>: Queue<T> {
    /// Add `item` once `delay` has passed. A zero delay is a plain
    /// [`Queue::add`].
    fn add_after(&self, item: T, delay: Duration);
}

/// A delaying queue whose re-delivery delay is chosen by a rate limiter.
pub trait RateLimiting<T: Item>: Delaying<T> {
    /// Add `item` after the delay the rate limiter asks for.
    fn add_rate_limited(&self, item: T);

    /// Stop tracking retries for `item`. Does not replace [`Queue::done`].
    fn forget(&self, item: &T);

    /// How many times `item` has been rate-limited since it was last
    /// forgotten.
    fn num_requeues(&self, item: &T) -> usize;
}

/// Options shared by [`WorkQueue`] and [`DelayingQueue`].
///
/// Unset fields are resolved once at construction: an empty `name` disables
/// metrics, a missing provider means [`global_provider`], a missing clock
/// means [`RealClock`].
#[derive(Clone, Default)]
pub struct QueueConfig {
    pub name: String,
    pub metrics_provider: Option<Arc<dyn MetricsProvider>>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metrics_provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fill in defaults so layers built from the same config share one clock
    /// and one provider.
    pub(crate) fn resolve(self) -> Self {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(RealClock) as Arc<dyn Clock>);
        let metrics_provider = if self.name.is_empty() {
            None
        } else {
            Some(self.metrics_provider.unwrap_or_else(global_provider))
        };
        Self {
            name: self.name,
            metrics_provider,
            clock: Some(clock),
        }
    }
}

impl std::fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("name", &self.name)
            .field("metrics_provider", &self.metrics_provider.is_some())
            .field("clock", &self.clock.is_some())
            .finish()
    }
}
