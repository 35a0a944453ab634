//! Delayed visibility on top of [`WorkQueue`].

use super::fifo::{Next, WorkQueue};
use super::metrics::QueueMetrics;
use super::{Delaying, Item, Queue, QueueConfig};
use crate::clock::{Clock, RealClock};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A [`WorkQueue`] that can hold items back until a ready time.
///
/// Waiting items are moved into the queue lazily, whenever a consumer or
/// [`Queue::len`] looks at it, so there is no timer task. If an item is
/// scheduled twice, the earlier ready time wins.
pub struct DelayingQueue<T> {
    queue: WorkQueue<T>,
    waiting: Mutex<Waiting<T>>,
    clock: Arc<dyn Clock>,
    metrics: QueueMetrics,
}

struct Entry<T> {
    ready_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.seq).cmp(&(other.ready_at, other.seq))
    }
}

/// Min-heap of scheduled items. Superseded heap entries are skipped lazily:
/// an entry is live only while `scheduled` still points at its `seq`.
struct Waiting<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    scheduled: HashMap<T, (Instant, u64)>,
    next_seq: u64,
}

impl<T: Item> Waiting<T> {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            scheduled: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Returns false when the item already waits for an earlier or equal time.
    fn insert(&mut self, item: T, ready_at: Instant) -> bool {
        if let Some(&(existing, _)) = self.scheduled.get(&item) {
            if existing <= ready_at {
                return false;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.insert(item.clone(), (ready_at, seq));
        self.heap.push(Reverse(Entry {
            ready_at,
            seq,
            item,
        }));
        true
    }

    fn is_live(&self, entry: &Entry<T>) -> bool {
        self.scheduled.get(&entry.item) == Some(&(entry.ready_at, entry.seq))
    }

    /// Remove every live entry due at or before `now`, in ready order.
    fn pop_ready(&mut self, now: Instant) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.ready_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.is_live(&entry) {
                self.scheduled.remove(&entry.item);
                ready.push(entry.item);
            }
        }
        ready
    }

    fn next_ready_at(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.ready_at);
            }
            self.heap.pop();
        }
        None
    }

    fn len(&self) -> usize {
        self.scheduled.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.scheduled.clear();
    }
}

impl<T: Item> DelayingQueue<T> {
    /// An unnamed delaying queue on the wall clock. Reports no metrics.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let config = config.resolve();
        let clock = config
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(RealClock) as Arc<dyn Clock>);
        let metrics = QueueMetrics::new(&config.name, config.metrics_provider.clone());
        Self {
            queue: WorkQueue::with_config(config),
            waiting: Mutex::new(Waiting::new()),
            clock,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Number of items scheduled for the future and not yet ready.
    pub fn num_waiting(&self) -> usize {
        self.waiting().len()
    }

    fn waiting(&self) -> MutexGuard<'_, Waiting<T>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every item whose ready time has passed into the queue.
    fn promote_ready(&self) {
        let now = self.clock.now();
        let ready = self.waiting().pop_ready(now);
        for item in ready {
            self.queue.add(item);
        }
    }
}

impl<T: Item> Default for DelayingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Item> Queue<T> for DelayingQueue<T> {
    fn add(&self, item: T) {
        self.queue.add(item);
    }

    fn len(&self) -> usize {
        self.promote_ready();
        self.queue.len()
    }

    async fn get(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.queue.ready_notified());
            notified.as_mut().enable();

            self.promote_ready();
            match self.queue.try_next() {
                Next::Item(item) => return Some(item),
                Next::Closed => return None,
                Next::Empty => {}
            }

            let next_ready_at = self.waiting().next_ready_at();
            match next_ready_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = self.clock.sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn done(&self, item: &T) {
        self.queue.done(item);
    }

    fn shut_down(&self) {
        self.queue.shut_down();
        self.waiting().clear();
    }

    async fn shut_down_with_drain(&self) {
        self.waiting().clear();
        self.queue.shut_down_with_drain().await;
    }

    fn shutting_down(&self) -> bool {
        self.queue.shutting_down()
    }
}

impl<T: Item> Delaying<T> for DelayingQueue<T> {
    fn add_after(&self, item: T, delay: Duration) {
        if self.queue.shutting_down() {
            return;
        }

        self.metrics.retry();

        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let ready_at = self.clock.now() + delay;
        let scheduled = self.waiting().insert(item, ready_at);
        if scheduled {
            // Waiting consumers may need an earlier wake-up.
            self.queue.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting_at(base: Instant, entries: &[(&'static str, u64)]) -> Waiting<&'static str> {
        let mut waiting = Waiting::new();
        for (item, secs) in entries {
            waiting.insert(*item, base + Duration::from_secs(*secs));
        }
        waiting
    }

    #[test]
    fn pops_in_ready_order() {
        let base = Instant::now();
        let mut waiting = waiting_at(base, &[("c", 3), ("a", 1), ("b", 2)]);

        assert_eq!(waiting.next_ready_at(), Some(base + Duration::from_secs(1)));
        assert_eq!(
            waiting.pop_ready(base + Duration::from_secs(2)),
            vec!["a", "b"]
        );
        assert_eq!(waiting.len(), 1);
    }

    #[test]
    fn earlier_schedule_replaces_later() {
        let base = Instant::now();
        let mut waiting = waiting_at(base, &[("a", 10)]);

        assert!(waiting.insert("a", base + Duration::from_secs(2)));
        assert!(!waiting.insert("a", base + Duration::from_secs(5)));

        assert_eq!(waiting.next_ready_at(), Some(base + Duration::from_secs(2)));
        assert_eq!(waiting.pop_ready(base + Duration::from_secs(2)), vec!["a"]);
        // The superseded 10s entry is stale and never resurfaces.
        assert!(waiting.pop_ready(base + Duration::from_secs(60)).is_empty());
        assert_eq!(waiting.next_ready_at(), None);
    }
}
