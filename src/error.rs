//! Error types for workq.
//!
//! Queue operations are total and never return these; they cover the
//! ambient surface (environment configuration and telemetry setup).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
