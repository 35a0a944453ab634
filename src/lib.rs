//! # workq
//!
//! A work item queue with rate-limited re-delivery, for reconciliation-style
//! workers that process discrete keys and retry failures after an
//! increasing delay.
//!
//! Provides the base dedup queue, delayed visibility, the rate-limited
//! adapter over a pluggable [`rate_limiter::RateLimiter`], worker loops, and
//! OpenTelemetry observability.

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod rate_limiter;
pub mod telemetry;
pub mod worker;
