//! Rate-limited re-delivery.
//!
//! [`RateLimitingQueue`] turns "this item failed again" into "hand it out
//! after the delay the rate limiter picks". It keeps no state of its own:
//! the delay and the failure count both come from the [`RateLimiter`], and
//! the scheduling is the delaying queue's.
//!
//! Remember to call [`RateLimiting::forget`] once an item succeeds or is
//! given up on, or its failures stay tracked forever.

use super::metrics::MetricsProvider;
use super::{Delaying, DelayingQueue, Item, Queue, QueueConfig, RateLimiting};
use crate::clock::Clock;
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Construction options for [`RateLimitingQueue`].
///
/// Resolved once in [`RateLimitingQueue::with_config`]:
///
/// | field              | when unset                                    |
/// |--------------------|-----------------------------------------------|
/// | `name`             | empty: metrics are not reported               |
/// | `metrics_provider` | [`super::global_provider`]                    |
/// | `clock`            | [`crate::clock::RealClock`]                   |
/// | `delaying_queue`   | a [`DelayingQueue`] built from the fields above |
pub struct RateLimitingQueueConfig<T: Item> {
    pub name: String,
    pub metrics_provider: Option<Arc<dyn MetricsProvider>>,
    pub clock: Option<Arc<dyn Clock>>,
    pub delaying_queue: Option<Box<dyn Delaying<T>>>,
}

impl<T: Item> Default for RateLimitingQueueConfig<T> {
    fn default() -> Self {
        Self {
            name: String::new(),
            metrics_provider: None,
            clock: None,
            delaying_queue: None,
        }
    }
}

impl<T: Item> RateLimitingQueueConfig<T> {
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

    /// Use `queue` instead of building a [`DelayingQueue`]. The other
    /// options are then ignored.
    pub fn delaying_queue(mut self, queue: impl Delaying<T> + 'static) -> Self {
        self.delaying_queue = Some(Box::new(queue));
        self
    }
}

/// A delaying queue with rate-limited re-adds.
pub struct RateLimitingQueue<T: Item> {
    queue: Box<dyn Delaying<T>>,
    rate_limiter: Box<dyn RateLimiter<T>>,
}

impl<T: Item> RateLimitingQueue<T> {
    /// An unnamed queue on the wall clock. Reports no metrics; use
    /// [`RateLimitingQueue::with_config`] with a name for that.
    pub fn new(rate_limiter: impl RateLimiter<T> + 'static) -> Self {
        Self::with_config(rate_limiter, RateLimitingQueueConfig::default())
    }

    pub fn with_config(
        rate_limiter: impl RateLimiter<T> + 'static,
        config: RateLimitingQueueConfig<T>,
    ) -> Self {
        let queue = match config.delaying_queue {
            Some(queue) => queue,
            None => Box::new(DelayingQueue::with_config(QueueConfig {
                name: config.name,
                metrics_provider: config.metrics_provider,
                clock: config.clock,
            })),
        };

        Self {
            queue,
            rate_limiter: Box::new(rate_limiter),
        }
    }
}

#[async_trait]
impl<T: Item> Queue<T> for RateLimitingQueue<T> {
    fn add(&self, item: T) {
        self.queue.add(item);
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    fn done(&self, item: &T) {
        self.queue.done(item);
    }

    fn shut_down(&self) {
        self.queue.shut_down();
    }

    async fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain().await;
    }

    fn shutting_down(&self) -> bool {
        self.queue.shutting_down()
    }
}

impl<T: Item> Delaying<T> for RateLimitingQueue<T> {
    fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay);
    }
}

impl<T: Item> RateLimiting<T> for RateLimitingQueue<T> {
    /// Asks the rate limiter for a delay, then schedules the item with it.
    ///
    /// The limiter is consulted even while the queue shuts down, so the
    /// failure still counts; the add itself is then dropped. Scheduling an
    /// item that is already waiting keeps whichever ready time the delaying
    /// queue prefers (the earlier one for [`DelayingQueue`]).
    fn add_rate_limited(&self, item: T) {
        let delay = self.rate_limiter.when(&item);
        trace!(?item, delay_ms = delay.as_millis() as u64, "rate limited requeue");
        self.queue.add_after(item, delay);
    }

    fn forget(&self, item: &T) {
        self.rate_limiter.forget(item);
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.rate_limiter.num_requeues(item)
    }
}
