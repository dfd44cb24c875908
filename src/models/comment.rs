//! Post and comment data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the monitored post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Graph object id (`{page_id}_{post_id}`)
    pub id: String,

    /// Post text at the time of the fetch (empty if the post has no text)
    pub message: String,

    /// When the post was published
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,

    /// Last modification marker reported by the API
    #[serde(default)]
    pub updated_time: Option<DateTime<Utc>>,

    /// Public link to the post
    #[serde(default)]
    pub permalink_url: Option<String>,
}

/// Author of a comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    /// Placeholder used when the API withholds the author.
    pub fn unknown() -> Self {
        Self {
            id: "Unknown".to_string(),
            name: "Unknown".to_string(),
        }
    }
}

/// A comment on the monitored post.
///
/// Comments are read-only; `id` is stable across fetches and is the
/// deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: String,

    pub message: String,

    pub author: Author,

    pub created_time: DateTime<Utc>,

    /// Parent comment id for threaded replies
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Image URL of the attachment, if any
    #[serde(default)]
    pub attachment_url: Option<String>,
}

/// One page of a cursor-based comment listing.
#[derive(Debug, Clone, Default)]
pub struct CommentPage {
    pub items: Vec<Comment>,

    /// Cursor for the following page; `None` on the last page
    pub next_cursor: Option<String>,
}
