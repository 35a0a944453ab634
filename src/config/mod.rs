//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. Queue-level
//! options live on [`crate::queue::RateLimitingQueueConfig`]; this covers
//! the process around it.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Queue name used for metrics. Empty disables queue metrics.
    pub queue_name: String,
    /// Number of concurrent worker loops.
    pub workers: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            queue_name: std::env::var("WORKQ_QUEUE_NAME").unwrap_or_else(|_| "workq".to_string()),
            workers: positive_var("WORKQ_WORKERS", 2)?,
        })
    }
}

fn positive_var(name: &str, default: usize) -> Result<usize> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
