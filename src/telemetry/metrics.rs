//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created from the `"workq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: items added to a queue.
/// Labels: `name`.
pub fn queue_adds() -> Counter<u64> {
    meter()
        .u64_counter("workq.queue.adds")
        .with_description("Total number of adds handled by the workqueue")
        .build()
}

/// Up/down counter: items waiting in a queue.
/// Labels: `name`.
pub fn queue_depth() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("workq.queue.depth")
        .with_description("Current depth of the workqueue")
        .build()
}

/// Histogram: seconds an item stays in the queue before being requested.
/// Labels: `name`.
pub fn queue_latency_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.queue.latency")
        .with_description("How long an item stays in the workqueue before being requested")
        .with_unit("s")
        .build()
}

/// Histogram: seconds spent processing an item.
/// Labels: `name`.
pub fn work_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.queue.work_duration")
        .with_description("How long processing an item from the workqueue takes")
        .with_unit("s")
        .build()
}

/// Counter: delayed re-adds (retries) handled by a queue.
/// Labels: `name`.
pub fn queue_retries() -> Counter<u64> {
    meter()
        .u64_counter("workq.queue.retries")
        .with_description("Total number of retries handled by the workqueue")
        .build()
}

/// Counter: items processed by a worker.
/// Labels: `name`, `outcome` ("ok" | "requeued" | "dropped").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("workq.worker.items_processed")
        .with_description("Number of items processed by workers")
        .build()
}
