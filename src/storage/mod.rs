//! Durable destinations for committed batches, and the monitor's own state.
//!
//! ## Sinks
//!
//! ```text
//! BatchAccumulator ──► [SinkSlot(local), SinkSlot(spreadsheet), ...]   (configured order)
//!                          │ backoff                │ backoff
//!                          ▼                        ▼
//!                     LocalFileSink           SpreadsheetSink ──► TabularStore
//! ```
//!
//! Each slot owns its own [`BackoffController`], so a failing spreadsheet
//! never slows the local files or the comment fetches.

pub mod local;
pub mod sheets;
pub mod state;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Batch, Config, SinkKind};
use crate::pipeline::backoff::{BackoffController, BackoffPolicy};
use crate::services::SheetsClient;

// Re-export for convenience
pub use local::LocalFileSink;
pub use sheets::SpreadsheetSink;
pub use state::{PersistentState, StateStore};

/// A destination that durably records batches.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Make one attempt at recording the whole batch.
    ///
    /// Retrying is the caller's job; transient errors should be reported as
    /// such (see [`crate::error::AppError::is_transient`]).
    async fn commit(&self, batch: &Batch) -> Result<()>;
}

/// A sink paired with the backoff controller that guards it.
pub struct SinkSlot {
    pub sink: Box<dyn UploadSink>,
    pub backoff: BackoffController,
}

impl SinkSlot {
    pub fn new(sink: Box<dyn UploadSink>, policy: BackoffPolicy) -> Self {
        let backoff = BackoffController::new(format!("sink:{}", sink.name()), policy);
        Self { sink, backoff }
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }
}

/// Build the configured sinks in commit order.
pub fn build_sinks(config: &Config) -> Result<Vec<SinkSlot>> {
    let policy = BackoffPolicy::from(&config.backoff);
    let mut slots = Vec::with_capacity(config.sinks.len());

    for kind in &config.sinks {
        let sink: Box<dyn UploadSink> = match kind {
            SinkKind::Local => Box::new(LocalFileSink::new(&config.output.dir)),
            SinkKind::Spreadsheet => {
                let client = SheetsClient::from_config(&config.spreadsheet, &config.source)?;
                Box::new(SpreadsheetSink::new(Arc::new(client)))
            }
        };
        log::info!("Sink enabled: {}", sink.name());
        slots.push(SinkSlot::new(sink, policy.clone()));
    }

    Ok(slots)
}
