//! Remote collaborators for the relay.
//!
//! This module contains the narrow interfaces the core depends on and their
//! HTTP implementations:
//! - Comment source (`CommentSource`, implemented by `GraphApiClient`)
//! - Tabular store (`TabularStore`, implemented by `SheetsClient`)

mod graph;
mod sheets;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CommentPage, Post};

pub use graph::GraphApiClient;
pub use sheets::SheetsClient;

/// Read access to a post and its paginated comments.
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Fetch the current snapshot of the post.
    async fn fetch_post(&self, post_id: &str) -> Result<Post>;

    /// Fetch one page of comments; `cursor == None` means the first page.
    async fn fetch_comments_page(&self, post_id: &str, cursor: Option<&str>)
    -> Result<CommentPage>;
}

/// Append-only remote table.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Append rows after the last non-empty row.
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()>;

    /// Write `header` as the first row if the table is empty.
    async fn ensure_header(&self, header: &[&str]) -> Result<()>;
}
