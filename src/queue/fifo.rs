//! The base work queue: FIFO order, pending-set dedup, processing tracking.

use super::metrics::QueueMetrics;
use super::{Item, Queue, QueueConfig};
use crate::clock::{Clock, RealClock};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, trace};

/// A FIFO work queue.
///
/// * An item is pending at most once. Adding a pending item is a no-op.
/// * An item that is being processed is never handed to a second consumer.
///   Re-adding it marks it dirty and it is queued again on [`Queue::done`].
/// * After shutdown, adds are dropped, but items already queued are still
///   handed out until the queue is empty.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    /// Signalled when items become ready or the queue shuts down.
    ready: Notify,
    /// Signalled when the processing set empties or a drain is cancelled.
    drained: Notify,
    clock: Arc<dyn Clock>,
    metrics: QueueMetrics,
}

struct State<T> {
    queue: VecDeque<T>,
    /// Items that need processing, queued or waiting for `done`.
    dirty: HashSet<T>,
    /// Items handed out by `get` and not yet `done`.
    processing: HashSet<T>,
    add_times: HashMap<T, Instant>,
    start_times: HashMap<T, Instant>,
    shutting_down: bool,
    drain: bool,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            add_times: HashMap::new(),
            start_times: HashMap::new(),
            shutting_down: false,
            drain: false,
        }
    }
}

/// Result of a non-waiting pop.
pub(crate) enum Next<T> {
    Item(T),
    Empty,
    Closed,
}

impl<T: Item> WorkQueue<T> {
    /// An unnamed queue on the wall clock. Reports no metrics.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let config = config.resolve();
        let clock = config
            .clock
            .unwrap_or_else(|| Arc::new(RealClock) as Arc<dyn Clock>);
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            drained: Notify::new(),
            clock,
            metrics: QueueMetrics::new(&config.name, config.metrics_provider),
        }
    }

    /// Metrics name, empty when unnamed.
    pub fn name(&self) -> &str {
        self.metrics.name()
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next ready item without waiting.
    pub(crate) fn try_next(&self) -> Next<T> {
        let mut state = self.state();
        let Some(item) = state.queue.pop_front() else {
            return if state.shutting_down {
                Next::Closed
            } else {
                Next::Empty
            };
        };

        if self.metrics.enabled() {
            let now = self.clock.now();
            let latency = state
                .add_times
                .remove(&item)
                .map(|added| now.saturating_duration_since(added));
            self.metrics.get(latency);
            state.start_times.insert(item.clone(), now);
        }

        state.processing.insert(item.clone());
        state.dirty.remove(&item);
        Next::Item(item)
    }

    /// A wake-up for the next time items become ready. Enable it before
    /// checking the queue so no signal is missed in between.
    pub(crate) fn ready_notified(&self) -> Notified<'_> {
        self.ready.notified()
    }

    /// Wake every waiting consumer so it re-checks the queue.
    pub(crate) fn wake(&self) {
        self.ready.notify_waiters();
    }
}

impl<T: Item> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Item> Queue<T> for WorkQueue<T> {
    fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down {
            trace!(queue = self.name(), ?item, "queue shutting down, dropping add");
            return;
        }
        if state.dirty.contains(&item) {
            return;
        }

        if self.metrics.enabled() {
            self.metrics.add();
            let now = self.clock.now();
            state.add_times.entry(item.clone()).or_insert(now);
        }

        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        drop(state);
        self.ready.notify_waiters();
    }

    fn len(&self) -> usize {
        self.state().queue.len()
    }

    async fn get(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.ready.notified());
            notified.as_mut().enable();

            match self.try_next() {
                Next::Item(item) => return Some(item),
                Next::Closed => return None,
                Next::Empty => notified.await,
            }
        }
    }

    fn done(&self, item: &T) {
        let mut state = self.state();

        if let Some(started) = state.start_times.remove(item) {
            self.metrics
                .done(self.clock.now().saturating_duration_since(started));
        }

        if !state.processing.remove(item) {
            return;
        }

        let requeued = state.dirty.contains(item);
        if requeued {
            state.queue.push_back(item.clone());
        }
        let drained = state.processing.is_empty();
        drop(state);

        if requeued {
            self.ready.notify_waiters();
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.drain = false;
        }
        debug!(queue = self.name(), "queue shutting down");
        self.ready.notify_waiters();
        self.drained.notify_waiters();
    }

    async fn shut_down_with_drain(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.drain = true;
        }
        debug!(queue = self.name(), "queue shutting down, draining");
        self.ready.notify_waiters();

        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();

            let finished = {
                let state = self.state();
                state.processing.is_empty() || !state.drain
            };
            if finished {
                return;
            }
            notified.await;
        }
    }

    fn shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
