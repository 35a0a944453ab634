//! The retry strategy seam.
//!
//! A [`RateLimiter`] decides how long a failed item waits before it is
//! handed out again, and owns the per-item failure count. Strategies
//! (token bucket, exponential backoff, fixed delay, max-of-several) are
//! supplied by the caller; the queue only talks to this trait.

use std::sync::Arc;
use std::time::Duration;

pub trait RateLimiter<T>: Send + Sync {
    /// How long `item` should wait before it is processed again.
    ///
    /// Standard strategies count this call as one more failure of `item`.
    fn when(&self, item: &T) -> Duration;

    /// Failures recorded for `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> usize;

    /// Drop everything tracked for `item`.
    fn forget(&self, item: &T);
}

impl<T, R> RateLimiter<T> for Arc<R>
where
    R: RateLimiter<T> + ?Sized,
{
    fn when(&self, item: &T) -> Duration {
        (**self).when(item)
    }

    fn num_requeues(&self, item: &T) -> usize {
        (**self).num_requeues(item)
    }

    fn forget(&self, item: &T) {
        (**self).forget(item)
    }
}

impl<T, R> RateLimiter<T> for Box<R>
where
    R: RateLimiter<T> + ?Sized,
{
    fn when(&self, item: &T) -> Duration {
        (**self).when(item)
    }

    fn num_requeues(&self, item: &T) -> usize {
        (**self).num_requeues(item)
    }

    fn forget(&self, item: &T) {
        (**self).forget(item)
    }
}
