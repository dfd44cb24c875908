//! Exponential backoff for remote calls.
//!
//! Each logical endpoint (post fetch, comment pages, every sink) owns one
//! [`BackoffController`], so failures on one endpoint never slow another.
//!
//! ```text
//!            success                       failure (retries left)
//!   Ready ─────────────► Ready     Ready ─────────────────────────► Waiting(d)
//!     ▲                                                               │
//!     └──────────────────────── delay elapsed ────────────────────────┘
//! ```
//!
//! `d = base × 2^min(consecutive_failures, exponent_cap)`, clamped to `max_delay`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::BackoffConfig;

/// Delay computation and retry bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub exponent_cap: u32,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Delay after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.min(self.exponent_cap).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            exponent_cap: config.exponent_cap,
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_retries: config.max_retries,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

/// Whether the controller currently permits an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    Ready,
    Waiting(Duration),
}

/// A call that ended without success.
#[derive(Debug)]
pub struct Exhausted {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Error of the last attempt (or `Cancelled`)
    pub error: AppError,
}

impl Exhausted {
    /// Convert into the terminal fetch error for `endpoint`.
    pub fn into_fetch_failed(self, endpoint: &str) -> AppError {
        match self.error {
            AppError::Cancelled => AppError::Cancelled,
            error => AppError::FetchFailed {
                endpoint: endpoint.to_string(),
                attempts: self.attempts,
                message: error.to_string(),
            },
        }
    }

    /// Convert into the terminal upload error for `sink`.
    pub fn into_upload_failed(self, sink: &str) -> AppError {
        match self.error {
            AppError::Cancelled => AppError::Cancelled,
            error => AppError::UploadFailed {
                sink: sink.to_string(),
                attempts: self.attempts,
                message: error.to_string(),
            },
        }
    }
}

/// Failure tracking and retry scheduling for one endpoint.
#[derive(Debug, Clone)]
pub struct BackoffController {
    endpoint: String,
    policy: BackoffPolicy,
    consecutive_failures: u32,
    next_delay: Duration,
    state: BackoffState,
}

impl BackoffController {
    pub fn new(endpoint: impl Into<String>, policy: BackoffPolicy) -> Self {
        let next_delay = policy.delay_for(0);
        Self {
            endpoint: endpoint.into(),
            policy,
            consecutive_failures: 0,
            next_delay,
            state: BackoffState::Ready,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    pub fn state(&self) -> BackoffState {
        self.state
    }

    /// Reset after a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_delay = self.policy.delay_for(0);
        self.state = BackoffState::Ready;
    }

    /// Count a failure and schedule the next wait.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_delay = self.policy.delay_for(self.consecutive_failures);
        self.state = BackoffState::Waiting(self.next_delay);
        self.next_delay
    }

    /// Sleep out a pending wait. Returns `Cancelled` if shutdown fires first.
    pub async fn wait(&mut self, shutdown: &CancellationToken) -> Result<(), AppError> {
        if let BackoffState::Waiting(delay) = self.state {
            tokio::select! {
                _ = shutdown.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            self.state = BackoffState::Ready;
        }
        Ok(())
    }

    /// Run `op` until it succeeds, fails fatally, or runs out of retries.
    ///
    /// Shutdown is checked before every attempt and during every wait.
    pub async fn call<T, F, Fut>(
        &mut self,
        shutdown: &CancellationToken,
        mut op: F,
    ) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut attempts = 0u32;
        loop {
            if shutdown.is_cancelled() {
                self.state = BackoffState::Ready;
                return Err(Exhausted {
                    attempts,
                    error: AppError::Cancelled,
                });
            }

            attempts += 1;
            let error = match op().await {
                Ok(value) => {
                    if self.consecutive_failures > 0 {
                        log::info!(
                            "{}: recovered after {} failure(s)",
                            self.endpoint,
                            self.consecutive_failures
                        );
                    }
                    self.record_success();
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = self.record_failure();

            if !error.is_transient() {
                log::error!("{}: fatal error, not retrying: {}", self.endpoint, error);
                self.state = BackoffState::Ready;
                return Err(Exhausted { attempts, error });
            }
            if attempts > self.policy.max_retries {
                log::error!(
                    "{}: giving up after {} attempt(s): {}",
                    self.endpoint,
                    attempts,
                    error
                );
                self.state = BackoffState::Ready;
                return Err(Exhausted { attempts, error });
            }

            log::warn!(
                "{}: attempt {} failed ({}), retrying in {:?}",
                self.endpoint,
                attempts,
                error,
                delay
            );
            if let Err(cancelled) = self.wait(shutdown).await {
                self.state = BackoffState::Ready;
                return Err(Exhausted {
                    attempts,
                    error: cancelled,
                });
            }
        }
    }
}
