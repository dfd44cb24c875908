//! Local filesystem sink.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── events.jsonl                 # Structured: one DetectedEvent per line
//! ├── comments.csv                 # Tabular: one row per event
//! ├── post_content_{post_id}.json  # Latest post text (atomic rewrite)
//! └── state.json                   # Monitor state (see StateStore)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Batch, Event, TABLE_HEADER};
use crate::storage::UploadSink;

const EVENTS_FILE: &str = "events.jsonl";
const CSV_FILE: &str = "comments.csv";

/// Last known text of the post, as written to `post_content_{post_id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostSnapshot {
    pub post_id: String,
    pub message: String,
    pub previous: String,
    pub detected_at: DateTime<Utc>,
}

/// Local filesystem sink writing JSON lines and CSV.
#[derive(Debug, Clone)]
pub struct LocalFileSink {
    root_dir: PathBuf,
}

impl LocalFileSink {
    /// Create a new LocalFileSink rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Append bytes to a file, creating it if needed.
    async fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read JSON data, returning None if the file doesn't exist.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn snapshot_key(post_id: &str) -> String {
        format!("post_content_{post_id}.json")
    }

    /// Load the last written post snapshot.
    pub async fn load_post_snapshot(&self, post_id: &str) -> Result<Option<PostSnapshot>> {
        self.read_json(&Self::snapshot_key(post_id)).await
    }

    fn encode_jsonl(batch: &Batch) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in batch {
            serde_json::to_writer(&mut out, entry)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    fn encode_csv(batch: &Batch, with_header: bool) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if with_header {
            writer.write_record(TABLE_HEADER)?;
        }
        for row in batch.rows() {
            writer.write_record(&row)?;
        }
        writer
            .into_inner()
            .map_err(|e| AppError::Io(e.into_error()))
    }
}

#[async_trait]
impl UploadSink for LocalFileSink {
    fn name(&self) -> &str {
        "local"
    }

    async fn commit(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.append_bytes(EVENTS_FILE, &Self::encode_jsonl(batch)?)
            .await?;

        let csv_exists = tokio::fs::try_exists(self.path(CSV_FILE)).await?;
        self.append_bytes(CSV_FILE, &Self::encode_csv(batch, !csv_exists)?)
            .await?;

        // Only the newest snapshot per post matters.
        let latest_post_change = batch.iter().rev().find_map(|entry| match &entry.event {
            Event::PostContentChanged { post_id, old, new } => {
                Some((post_id, old, new, entry.detected_at))
            }
            _ => None,
        });
        if let Some((post_id, old, new, detected_at)) = latest_post_change {
            let snapshot = PostSnapshot {
                post_id: post_id.clone(),
                message: new.clone(),
                previous: old.clone(),
                detected_at,
            };
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            self.write_bytes(&Self::snapshot_key(post_id), &bytes).await?;
            log::info!("Post content saved to {}", Self::snapshot_key(post_id));
        }

        log::info!(
            "Wrote {} record(s) to {}",
            batch.len(),
            self.root_dir.display()
        );
        Ok(())
    }
}
