//! Event buffering with size and age triggers.
//!
//! Events wait in one [`Batch`] until either trigger fires, then the whole
//! batch is committed to every sink in order. The batch is only cleared once
//! all sinks accepted it; a failure puts it back untouched, so the next
//! trigger resends the same events (sinks that already succeeded may see
//! them twice).

use std::mem;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Batch, BatchConfig, DetectedEvent};
use crate::storage::SinkSlot;

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached its maximum size
    Size,
    /// The maximum time since the last flush passed
    Age,
    /// Requested explicitly (shutdown, single run)
    Forced,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Age => "age",
            FlushTrigger::Forced => "forced",
        }
    }
}

/// Summary of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub events: usize,
    pub sinks: usize,
    pub flushed_at: DateTime<Utc>,
}

/// Buffers detected events until a trigger fires.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch: Batch,
    max_size: usize,
    max_age: TimeDelta,
    /// Start of the current age window: the last flush, or startup
    window_start: DateTime<Utc>,
    last_flush: Option<DateTime<Utc>>,
}

impl BatchAccumulator {
    pub fn new(config: &BatchConfig, last_flush: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let max_age = i64::try_from(config.max_age_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        Self {
            batch: Batch::new(),
            max_size: config.max_size.max(1),
            max_age,
            window_start: last_flush.unwrap_or(now),
            last_flush,
        }
    }

    /// Put back events that were pending when the state was saved.
    pub fn restore(&mut self, pending: Batch) {
        if pending.is_empty() {
            return;
        }
        log::info!("Restored {} pending event(s)", pending.len());
        let newer = mem::replace(&mut self.batch, pending);
        for entry in newer.entries() {
            self.batch.push(entry.clone());
        }
    }

    pub fn push(&mut self, entry: DetectedEvent) {
        self.batch.push(entry);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Events waiting for the next flush.
    pub fn pending(&self) -> &Batch {
        &self.batch
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.last_flush
    }

    /// Which trigger, if any, has fired. An empty batch never flushes.
    pub fn should_flush(&self, now: DateTime<Utc>) -> Option<FlushTrigger> {
        if self.batch.is_empty() {
            None
        } else if self.batch.len() >= self.max_size {
            Some(FlushTrigger::Size)
        } else if now.signed_duration_since(self.window_start) >= self.max_age {
            Some(FlushTrigger::Age)
        } else {
            None
        }
    }

    /// Commit the batch to every sink, in order.
    ///
    /// Each sink is retried through its own backoff controller. Once shutdown
    /// has been signalled every sink gets exactly one attempt instead.
    pub async fn flush(
        &mut self,
        sinks: &mut [SinkSlot],
        trigger: FlushTrigger,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<FlushReport> {
        let batch = mem::take(&mut self.batch);
        let report = FlushReport {
            trigger,
            events: batch.len(),
            sinks: sinks.len(),
            flushed_at: now,
        };
        if batch.is_empty() {
            return Ok(report);
        }

        log::info!(
            "Flushing {} event(s) to {} sink(s) ({} trigger)",
            batch.len(),
            sinks.len(),
            trigger.as_str()
        );

        for slot in sinks.iter_mut() {
            if let Err(error) = commit_to(slot, &batch, shutdown).await {
                log::error!("Batch kept for retry: {}", error);
                self.batch = batch;
                return Err(error);
            }
        }

        self.last_flush = Some(now);
        self.window_start = now;
        Ok(report)
    }
}

async fn commit_to(slot: &mut SinkSlot, batch: &Batch, shutdown: &CancellationToken) -> Result<()> {
    let sink = &slot.sink;

    if shutdown.is_cancelled() {
        return match sink.commit(batch).await {
            Ok(()) => {
                slot.backoff.record_success();
                Ok(())
            }
            Err(error) => {
                slot.backoff.record_failure();
                Err(AppError::UploadFailed {
                    sink: sink.name().to_string(),
                    attempts: 1,
                    message: error.to_string(),
                })
            }
        };
    }

    slot.backoff
        .call(shutdown, || sink.commit(batch))
        .await
        .map_err(|exhausted| exhausted.into_upload_failed(sink.name()))
}
