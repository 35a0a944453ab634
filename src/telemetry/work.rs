//! Work item processing span helpers.
//!
//! Provides span creation and outcome recording for items flowing through
//! a [`crate::worker::Worker`].

use std::fmt::Debug;
use tracing::Span;

/// Start a span for processing one item.
///
/// The `work.outcome` and `work.requeues` fields are declared empty and are
/// filled in by [`record_outcome`].
pub fn start_item_span(queue: &str, item: &dyn Debug) -> Span {
    tracing::info_span!(
        "workqueue.process",
        "work.queue" = queue,
        "work.item" = ?item,
        "work.outcome" = tracing::field::Empty,
        "work.requeues" = tracing::field::Empty,
    )
}

/// Record how processing ended and how many requeues the item had.
///
/// Emits a tracing `debug` event scoped to the given span.
pub fn record_outcome(span: &Span, outcome: &str, requeues: usize) {
    span.record("work.outcome", outcome);
    span.record("work.requeues", requeues as u64);
    span.in_scope(|| {
        tracing::debug!(outcome = outcome, requeues = requeues as u64, "item processed");
    });
}
