// src/error.rs

//! Unified error handling for the comment relay.

use std::fmt;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Remote comment source exhausted its retries
    #[error("Fetch failed for {endpoint} after {attempts} attempt(s): {message}")]
    FetchFailed {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    /// A sink exhausted its retries
    #[error("Upload to {sink} failed after {attempts} attempt(s): {message}")]
    UploadFailed {
        sink: String,
        attempts: u32,
        message: String,
    },

    /// Persisted state is unreadable or malformed
    #[error("State file {path} is corrupt: {message}")]
    StateCorrupt { path: String, message: String },

    /// Remote API answered with an error
    #[error("{endpoint} returned {}: {message}", describe_status(.status))]
    Remote {
        endpoint: String,
        status: Option<u16>,
        message: String,
        transient: bool,
    },

    /// Shutdown was requested while an operation was waiting to retry
    #[error("Operation cancelled by shutdown")]
    Cancelled,

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV encoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "an error".to_string(),
    }
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a remote API error, classifying the status code.
    pub fn remote(endpoint: impl Into<String>, status: u16, message: impl fmt::Display) -> Self {
        Self::Remote {
            endpoint: endpoint.into(),
            status: Some(status),
            message: message.to_string(),
            transient: status == 429 || status >= 500,
        }
    }

    /// Create a state corruption error.
    pub fn state_corrupt(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::StateCorrupt {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the failed call may succeed.
    ///
    /// Transient: timeouts, connection failures, HTTP 429/5xx, local I/O.
    /// Everything else is fatal and must not be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote { transient, .. } => *transient,
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            Self::Io(_) => true,
            _ => false,
        }
    }
}
