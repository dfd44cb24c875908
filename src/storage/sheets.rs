//! Spreadsheet sink: appends one row per event to a remote table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Batch, TABLE_HEADER};
use crate::services::TabularStore;
use crate::storage::UploadSink;

/// Sink that appends batch rows to a [`TabularStore`].
pub struct SpreadsheetSink {
    store: Arc<dyn TabularStore>,
    header_ready: AtomicBool,
}

impl SpreadsheetSink {
    pub fn new(store: Arc<dyn TabularStore>) -> Self {
        Self {
            store,
            header_ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl UploadSink for SpreadsheetSink {
    fn name(&self) -> &str {
        "spreadsheet"
    }

    async fn commit(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        if !self.header_ready.load(Ordering::Acquire) {
            self.store.ensure_header(&TABLE_HEADER).await?;
            self.header_ready.store(true, Ordering::Release);
        }

        self.store.append_rows(&batch.rows()).await?;
        log::info!("Uploaded {} row(s) to spreadsheet", batch.len());
        Ok(())
    }
}
