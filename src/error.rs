//! Error types for jiradw
//!
//! Defines one error enum covering every failure mode in the pipeline and
//! classifies each variant for the retry loop. Uses thiserror for ergonomic
//! error handling.

use crate::retry::{RetryDecision, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for jiradw operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Comprehensive error type for jiradw operations
#[derive(Error, Debug)]
pub enum EtlError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the Jira REST API
    #[error("Jira API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Authentication failures (bad or expired PAT)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limited; carries the Retry-After hint in seconds when Jira sent one
    #[error("Rate limited by Jira")]
    RateLimited { retry_after: Option<u64> },

    /// SQLite warehouse errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Issue payloads the transform cannot use (missing/non-numeric id)
    #[error("Transform error: {0}")]
    Transform(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl RetryableError for EtlError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            EtlError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 | 500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else {
                    // Body decode failures and request-build errors are not
                    // going to get better on a second attempt.
                    RetryDecision::NoRetry
                }
            }
            EtlError::Api { status, .. } => match status {
                429 | 500..=599 => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            // A Retry-After hint is a floor on the wait; a bare 429 falls
            // back to the normal backoff schedule.
            EtlError::RateLimited {
                retry_after: Some(secs),
            } => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            EtlError::RateLimited { retry_after: None } => RetryDecision::Retry,
            // Everything else fails the run immediately: configuration and
            // auth problems need an operator, database errors roll the page
            // back, transform errors are handled per issue by the loader.
            EtlError::Config(_)
            | EtlError::Io(_)
            | EtlError::Yaml(_)
            | EtlError::Json(_)
            | EtlError::Auth(_)
            | EtlError::Database(_)
            | EtlError::Transform(_)
            | EtlError::Other(_)
            | EtlError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}
