//! Cursor-based pagination over a post's comments.
//!
//! A walk always starts at the first page and moves forward until the
//! listing has no next cursor or the page bound is hit. Every page request
//! goes through the caller's [`BackoffController`].

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Comment;
use crate::pipeline::backoff::BackoffController;
use crate::services::CommentSource;

/// Result of a full walk.
///
/// Comments from pages fetched before a failure are kept alongside the error.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Comments in the order the API produced them
    pub comments: Vec<Comment>,
    /// Pages fetched successfully
    pub pages: usize,
    /// The page bound stopped the walk before the listing ended
    pub truncated: bool,
    /// Terminal error that ended the walk early
    pub error: Option<AppError>,
}

impl WalkOutcome {
    /// Whether the walk reached the end of the listing without error.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.truncated
    }
}

/// Lazy, forward-only walker over comment pages.
pub struct PaginationWalker<'a> {
    source: &'a dyn CommentSource,
    post_id: &'a str,
    backoff: &'a mut BackoffController,
    shutdown: &'a CancellationToken,
    max_pages: usize,
    page_delay: Duration,
    cursor: Option<String>,
    pages_fetched: usize,
    finished: bool,
    truncated: bool,
}

impl<'a> PaginationWalker<'a> {
    /// Create a walker positioned before the first page.
    pub fn new(
        source: &'a dyn CommentSource,
        post_id: &'a str,
        backoff: &'a mut BackoffController,
        shutdown: &'a CancellationToken,
    ) -> Self {
        Self {
            source,
            post_id,
            backoff,
            shutdown,
            max_pages: usize::MAX,
            page_delay: Duration::ZERO,
            cursor: None,
            pages_fetched: 0,
            finished: false,
            truncated: false,
        }
    }

    /// Stop after this many pages even if the listing continues.
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Pause between consecutive page requests.
    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Fetch the next page. `None` once the walk is over.
    pub async fn next_page(&mut self) -> Option<Result<Vec<Comment>>> {
        if self.finished {
            return None;
        }

        if self.pages_fetched > 0 && !self.page_delay.is_zero() {
            let shutdown = self.shutdown;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.finished = true;
                    return Some(Err(AppError::Cancelled));
                }
                _ = tokio::time::sleep(self.page_delay) => {}
            }
        }

        let source = self.source;
        let post_id = self.post_id;
        let cursor = self.cursor.clone();
        let result = self
            .backoff
            .call(self.shutdown, || {
                source.fetch_comments_page(post_id, cursor.as_deref())
            })
            .await;

        match result {
            Ok(page) => {
                self.pages_fetched += 1;
                log::debug!(
                    "Comment page {} returned {} item(s)",
                    self.pages_fetched,
                    page.items.len()
                );

                match page.next_cursor {
                    None => self.finished = true,
                    Some(next) if self.pages_fetched >= self.max_pages => {
                        log::warn!(
                            "Stopping pagination at {} page(s); listing continues after cursor {}",
                            self.pages_fetched,
                            next
                        );
                        self.finished = true;
                        self.truncated = true;
                    }
                    Some(next) => self.cursor = Some(next),
                }
                Some(Ok(page.items))
            }
            Err(exhausted) => {
                self.finished = true;
                Some(Err(exhausted.into_fetch_failed(self.backoff.endpoint())))
            }
        }
    }

    /// Walk every remaining page, keeping partial results on failure.
    pub async fn collect(mut self) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        while let Some(page) = self.next_page().await {
            match page {
                Ok(items) => outcome.comments.extend(items),
                Err(error) => {
                    outcome.error = Some(error);
                    break;
                }
            }
        }
        outcome.pages = self.pages_fetched;
        outcome.truncated = self.truncated;
        outcome
    }

    /// Flatten the walk into a stream of comments.
    ///
    /// A failure is yielded once as the final item.
    pub fn into_stream(self) -> impl Stream<Item = Result<Comment>> + 'a {
        stream::unfold(
            (self, VecDeque::new()),
            |(mut walker, mut buffer)| async move {
                loop {
                    if let Some(comment) = buffer.pop_front() {
                        return Some((Ok(comment), (walker, buffer)));
                    }
                    match walker.next_page().await? {
                        Ok(items) => buffer.extend(items),
                        Err(error) => return Some((Err(error), (walker, buffer))),
                    }
                }
            },
        )
    }
}
