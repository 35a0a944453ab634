//! Worker loops: take items off a rate-limited queue and reconcile them.
//!
//! Each loop runs the standard cycle: `get`, reconcile, then either
//! `forget` (success) or `add_rate_limited` (failure), and always `done`.

use crate::queue::{Item, Queue, RateLimiting};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_item_span};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

/// Processes one item. An error sends the item back through the rate
/// limiter.
#[async_trait]
pub trait Reconcile<T>: Send + Sync {
    async fn reconcile(&self, item: &T) -> anyhow::Result<()>;
}

/// Configuration for a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue name used in spans and metrics.
    pub name: String,
    /// Number of concurrent loops started by [`Worker::run`].
    pub workers: usize,
    /// Requeues after which a failing item is forgotten and dropped.
    /// `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "workq".to_string(),
            workers: 2,
            max_retries: None,
        }
    }
}

/// How one processing cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Requeued,
    Dropped,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "ok",
            Outcome::Requeued => "requeued",
            Outcome::Dropped => "dropped",
        }
    }
}

/// Drives a [`Reconcile`] implementation from a shared queue.
pub struct Worker<T: Item> {
    queue: Arc<dyn RateLimiting<T>>,
    reconciler: Arc<dyn Reconcile<T>>,
    config: WorkerConfig,
}

impl<T: Item> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            reconciler: Arc::clone(&self.reconciler),
            config: self.config.clone(),
        }
    }
}

impl<T: Item> Worker<T> {
    pub fn new(
        queue: Arc<dyn RateLimiting<T>>,
        reconciler: Arc<dyn Reconcile<T>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            reconciler,
            config,
        }
    }

    /// Run `config.workers` loops until the queue shuts down and empties.
    pub async fn run(&self) {
        let mut loops = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            let worker = self.clone();
            loops.spawn(async move {
                while worker.process_next_item().await.is_some() {}
                info!(queue = %worker.config.name, worker = id, "worker stopped");
            });
        }

        info!(
            queue = %self.config.name,
            workers = self.config.workers.max(1),
            "workers started"
        );

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(queue = %self.config.name, "worker task failed: {e}");
            }
        }
    }

    /// Take one item and process it. `None` once the queue is shut down and
    /// has nothing left to hand out.
    pub async fn process_next_item(&self) -> Option<Outcome> {
        let item = self.queue.get().await?;
        let span = start_item_span(&self.config.name, &item);

        let outcome = async {
            let outcome = match self.reconciler.reconcile(&item).await {
                Ok(()) => {
                    self.queue.forget(&item);
                    Outcome::Succeeded
                }
                Err(e) => self.handle_error(&item, e),
            };
            self.queue.done(&item);
            outcome
        }
        .instrument(span.clone())
        .await;

        record_outcome(&span, outcome.as_str(), self.queue.num_requeues(&item));
        metrics::items_processed().add(
            1,
            &[
                KeyValue::new("name", self.config.name.clone()),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
        Some(outcome)
    }

    fn handle_error(&self, item: &T, e: anyhow::Error) -> Outcome {
        let requeues = self.queue.num_requeues(item);
        match self.config.max_retries {
            Some(max) if requeues >= max => {
                error!(?item, requeues, "dropping item after too many retries: {e:#}");
                self.queue.forget(item);
                Outcome::Dropped
            }
            _ => {
                warn!(?item, requeues, "reconcile failed, requeueing: {e:#}");
                self.queue.add_rate_limited(item.clone());
                Outcome::Requeued
            }
        }
    }
}
