//! Persisted monitor state.
//!
//! The state file is the only record of which comments were already
//! relayed. A missing file means a fresh start; a damaged one stops the
//! process, since guessing would either re-send or silently drop comments.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Batch;

/// Everything the monitor needs to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Every comment id ever emitted as new
    #[serde(default)]
    pub seen_comment_ids: BTreeSet<String>,

    /// Post text at the last comparison; `None` before the first one
    #[serde(default)]
    pub last_post_content: Option<String>,

    /// Time of the last batch committed to every sink
    #[serde(default)]
    pub last_flush: Option<DateTime<Utc>>,

    /// Detected events not yet committed
    #[serde(default)]
    pub pending: Batch,
}

/// JSON file holding a [`PersistentState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or a fresh one if the file does not exist.
    pub async fn load(&self) -> Result<PersistentState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No state file at {}, starting fresh",
                    self.path.display()
                );
                return Ok(PersistentState::default());
            }
            Err(e) => return Err(AppError::state_corrupt(self.display(), e)),
        };

        let state: PersistentState = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::state_corrupt(self.display(), e))?;

        log::info!(
            "Loaded state: {} seen comment(s), {} pending event(s)",
            state.seen_comment_ids.len(),
            state.pending.len()
        );
        Ok(state)
    }

    /// Write the state atomically (write to temp, then rename).
    pub async fn save(&self, state: &PersistentState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        log::debug!("State saved to {}", self.path.display());
        Ok(())
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}
