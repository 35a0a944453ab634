//! Integration tests for rate-limited re-delivery.

mod common;

use common::CountingRateLimiter;
use std::sync::Arc;
use std::time::Duration;
use workq::clock::FakeClock;
use workq::queue::{
    Delaying, DelayingQueue, Queue, QueueConfig, RateLimiting, RateLimitingQueue,
    RateLimitingQueueConfig,
};
use workq::rate_limiter::RateLimiter;

type Limiter = Arc<CountingRateLimiter<&'static str>>;

fn test_queue(step: Duration) -> (RateLimitingQueue<&'static str>, Limiter, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new());
    let limiter = Arc::new(CountingRateLimiter::new(step));
    let queue = RateLimitingQueue::with_config(
        Arc::clone(&limiter),
        RateLimitingQueueConfig::default().clock(clock.clone()),
    );
    (queue, limiter, clock)
}

async fn assert_no_item(queue: &RateLimitingQueue<&'static str>) {
    let got = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
    assert!(got.is_err(), "expected no item, got {got:?}");
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn item_is_hidden_until_delay_elapses() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    queue.add_rate_limited("x");
    assert_eq!(queue.len(), 0);

    clock.step(Duration::from_millis(999));
    assert_eq!(queue.len(), 0);

    clock.step(Duration::from_millis(1));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some("x"));
}

#[tokio::test]
async fn zero_delay_is_immediately_visible() {
    let (queue, limiter, _) = test_queue(Duration::ZERO);

    queue.add_rate_limited("x");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.num_requeues(&"x"), 1);
    assert_eq!(limiter.num_requeues(&"x"), 1);
}

#[tokio::test]
async fn waiting_get_wakes_when_clock_reaches_ready_time() {
    let (queue, _, clock) = test_queue(Duration::from_secs(5));
    let queue = Arc::new(queue);

    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.get().await })
    };

    queue.add_rate_limited("x");
    clock.step(Duration::from_secs(4));
    tokio::task::yield_now().await;
    assert!(!consumer.is_finished());

    clock.step(Duration::from_secs(1));
    let got = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer should wake")
        .unwrap();
    assert_eq!(got, Some("x"));
}

// ---------------------------------------------------------------------------
// Requeue bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counts_requeues_until_forgotten() {
    let (queue, limiter, clock) = test_queue(Duration::from_secs(1));

    for n in 1..=3u32 {
        queue.add_rate_limited("x");
        assert_eq!(queue.num_requeues(&"x"), n as usize);

        // Hidden until its own delay (n seconds) has passed.
        clock.step(Duration::from_secs(n.into()) - Duration::from_millis(1));
        assert!(queue.is_empty());
        clock.step(Duration::from_millis(1));
        assert_eq!(queue.len(), 1);

        let item = queue.get().await.unwrap();
        assert_eq!(item, "x");
        queue.done(&item);
    }

    assert_eq!(queue.num_requeues(&"x"), 3);
    assert_eq!(queue.num_requeues(&"x"), limiter.num_requeues(&"x"));

    queue.forget(&"x");
    assert_eq!(queue.num_requeues(&"x"), 0);

    // A fresh failure starts from the first delay again.
    queue.add_rate_limited("x");
    clock.step(Duration::from_secs(1));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn forget_without_failures_is_a_no_op() {
    let (queue, _, _) = test_queue(Duration::from_secs(1));
    queue.forget(&"never-seen");
    assert_eq!(queue.num_requeues(&"never-seen"), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn forget_does_not_touch_pending_items() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    queue.add_rate_limited("x");
    queue.forget(&"x");
    assert_eq!(queue.num_requeues(&"x"), 0);

    clock.step(Duration::from_secs(1));
    assert_eq!(queue.get().await, Some("x"));
}

#[tokio::test]
async fn items_are_tracked_independently() {
    let (queue, _, _) = test_queue(Duration::from_secs(1));

    queue.add_rate_limited("a");
    for _ in 0..5 {
        queue.add_rate_limited("b");
    }
    queue.forget(&"b");
    queue.add_rate_limited("b");

    assert_eq!(queue.num_requeues(&"a"), 1);
    assert_eq!(queue.num_requeues(&"b"), 1);
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_retries_deliver_once() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    // 1s then 2s: the earlier ready time wins.
    queue.add_rate_limited("x");
    queue.add_rate_limited("x");
    assert_eq!(queue.num_requeues(&"x"), 2);

    clock.step(Duration::from_secs(1));
    assert_eq!(queue.len(), 1);

    clock.step(Duration::from_secs(5));
    assert_eq!(queue.len(), 1);

    assert_eq!(queue.get().await, Some("x"));
    assert_no_item(&queue).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_deliver_once() {
    let (queue, limiter, clock) = test_queue(Duration::from_secs(1));
    let queue = Arc::new(queue);

    let retries: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add_rate_limited("x") })
        })
        .collect();
    for retry in retries {
        retry.await.unwrap();
    }
    assert_eq!(limiter.num_requeues(&"x"), 8);
    assert_eq!(queue.num_requeues(&"x"), 8);

    clock.step(Duration::from_secs(60));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some("x"));
    assert_no_item(&queue).await;
}

#[tokio::test]
async fn retry_of_pending_item_collapses_into_it() {
    let (queue, _, clock) = test_queue(Duration::ZERO);

    queue.add("x");
    queue.add_rate_limited("x");
    clock.step(Duration::from_secs(1));

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some("x"));
    assert_no_item(&queue).await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_rate_limited_after_shutdown_is_dropped() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    queue.shut_down();
    assert!(queue.shutting_down());

    queue.add_rate_limited("x");
    queue.add_rate_limited("y");
    clock.step(Duration::from_secs(60));

    assert_eq!(queue.len(), 0);
    assert_eq!(queue.get().await, None);
}

#[tokio::test]
async fn shutdown_discards_scheduled_retries() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    queue.add_rate_limited("x");
    queue.shut_down();
    clock.step(Duration::from_secs(10));

    assert_eq!(queue.get().await, None);
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn injected_delaying_queue_is_used() {
    let injected_clock = Arc::new(FakeClock::new());
    let ignored_clock = Arc::new(FakeClock::new());
    let delaying =
        DelayingQueue::with_config(QueueConfig::default().clock(injected_clock.clone()));

    let queue = RateLimitingQueue::with_config(
        CountingRateLimiter::<&'static str>::new(Duration::from_secs(1)),
        RateLimitingQueueConfig::default()
            .clock(ignored_clock.clone())
            .delaying_queue(delaying),
    );

    queue.add_rate_limited("x");

    ignored_clock.step(Duration::from_secs(10));
    assert_eq!(queue.len(), 0);

    injected_clock.step(Duration::from_secs(1));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn default_construction_uses_wall_clock() {
    let queue = RateLimitingQueue::new(CountingRateLimiter::<&'static str>::new(
        Duration::from_millis(20),
    ));

    queue.add_rate_limited("x");
    assert_eq!(queue.len(), 0);

    let got = tokio::time::timeout(Duration::from_secs(2), queue.get()).await;
    assert_eq!(got.expect("item should become ready"), Some("x"));
}

#[tokio::test]
async fn pass_through_operations_reach_the_delaying_queue() {
    let (queue, _, clock) = test_queue(Duration::from_secs(1));

    queue.add("now");
    queue.add_after("later", Duration::from_secs(3));
    assert_eq!(queue.len(), 1);

    let item = queue.get().await.unwrap();
    assert_eq!(item, "now");
    queue.done(&item);

    clock.step(Duration::from_secs(3));
    assert_eq!(queue.get().await, Some("later"));
    // add_after does not consult the rate limiter.
    assert_eq!(queue.num_requeues(&"later"), 0);
}

#[tokio::test]
async fn usable_as_trait_object() {
    let (queue, _, _) = test_queue(Duration::ZERO);
    let queue: Arc<dyn RateLimiting<&'static str>> = Arc::new(queue);

    queue.add_rate_limited("x");
    assert_eq!(queue.num_requeues(&"x"), 1);
    assert_eq!(queue.get().await, Some("x"));
}
