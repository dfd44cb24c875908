//! Detected events and the batches that carry them to sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Comment;

/// Column layout shared by every tabular sink.
pub const TABLE_HEADER: [&str; 8] = [
    "event",
    "comment_id",
    "user_id",
    "user_name",
    "created_time",
    "message",
    "attachment",
    "detected_time",
];

/// A change observed on the monitored post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A comment whose id was never seen before
    NewComment { comment: Comment },

    /// An edit to a known comment. Reserved: the listing carries no edit
    /// signal, so detection never produces it.
    CommentChanged { old: Comment, new: Comment },

    /// The post text differs from the last recorded text
    PostContentChanged {
        post_id: String,
        old: String,
        new: String,
    },
}

impl Event {
    /// Short label used in logs and in the `event` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewComment { .. } => "new_comment",
            Event::CommentChanged { .. } => "comment_changed",
            Event::PostContentChanged { .. } => "post_content_changed",
        }
    }

    /// Id of the comment this event is about, if any.
    pub fn comment_id(&self) -> Option<&str> {
        match self {
            Event::NewComment { comment } => Some(&comment.id),
            Event::CommentChanged { new, .. } => Some(&new.id),
            Event::PostContentChanged { .. } => None,
        }
    }
}

/// An event stamped with the moment it was detected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedEvent {
    pub detected_at: DateTime<Utc>,
    pub event: Event,
}

impl DetectedEvent {
    pub fn new(event: Event, detected_at: DateTime<Utc>) -> Self {
        Self { detected_at, event }
    }

    /// Render as a row matching [`TABLE_HEADER`].
    pub fn to_row(&self) -> Vec<String> {
        let detected = self.detected_at.format("%Y-%m-%d %H:%M:%S").to_string();
        match &self.event {
            Event::NewComment { comment } | Event::CommentChanged { new: comment, .. } => vec![
                self.event.kind().to_string(),
                comment.id.clone(),
                comment.author.id.clone(),
                comment.author.name.clone(),
                comment.created_time.to_rfc3339(),
                comment.message.clone(),
                comment
                    .attachment_url
                    .clone()
                    .unwrap_or_else(|| "No".to_string()),
                detected,
            ],
            Event::PostContentChanged { post_id, new, .. } => vec![
                self.event.kind().to_string(),
                post_id.clone(),
                String::new(),
                String::new(),
                String::new(),
                new.clone(),
                "No".to_string(),
                detected,
            ],
        }
    }
}

/// Ordered group of events awaiting delivery, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    entries: Vec<DetectedEvent>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DetectedEvent) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectedEvent> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[DetectedEvent] {
        &self.entries
    }

    /// All entries rendered as tabular rows, in batch order.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.entries.iter().map(DetectedEvent::to_row).collect()
    }
}

impl From<Vec<DetectedEvent>> for Batch {
    fn from(entries: Vec<DetectedEvent>) -> Self {
        Self { entries }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a DetectedEvent;
    type IntoIter = std::slice::Iter<'a, DetectedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
