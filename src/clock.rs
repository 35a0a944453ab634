//! Time sources for delay scheduling.
//!
//! Queues read the current time and wait for deadlines through [`Clock`],
//! so tests can swap the wall clock for a [`FakeClock`] and step time by
//! hand.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// A source of "now" that can also wait for a deadline.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Resolve once [`Clock::now`] has reached `deadline`.
    async fn sleep_until(&self, deadline: Instant);
}

/// The wall clock, backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

/// A manually driven clock.
///
/// Time only moves through [`FakeClock::step`] or [`FakeClock::set`].
/// Pending sleepers are woken whenever it moves.
#[derive(Debug)]
pub struct FakeClock {
    now: watch::Sender<Instant>,
}

impl FakeClock {
    /// Start a fake clock at the current wall-clock instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Advance time by `delta`.
    pub fn step(&self, delta: Duration) {
        self.now.send_modify(|now| *now += delta);
    }

    /// Jump to `t`. Moving backwards is ignored.
    pub fn set(&self, t: Instant) {
        self.now.send_if_modified(|now| {
            if t > *now {
                *now = t;
                true
            } else {
                false
            }
        });
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut rx = self.now.subscribe();
        while *rx.borrow_and_update() < deadline {
            if rx.changed().await.is_err() {
                // Clock dropped: time can never reach the deadline.
                std::future::pending::<()>().await;
            }
        }
    }
}
