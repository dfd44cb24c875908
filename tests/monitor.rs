//! End-to-end ticks against in-memory collaborators and a temp directory.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use comment_relay::error::{AppError, Result};
use comment_relay::models::{Author, Comment, CommentPage, Config, Post, SinkKind};
use comment_relay::pipeline::{BackoffPolicy, MonitorLoop};
use comment_relay::services::{CommentSource, TabularStore};
use comment_relay::storage::{LocalFileSink, SinkSlot, SpreadsheetSink, StateStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A post whose comment list grows between ticks; served two per page.
struct LivePost {
    message: Mutex<String>,
    comments: Mutex<Vec<Comment>>,
}

impl LivePost {
    fn new(message: &str) -> Self {
        Self {
            message: Mutex::new(message.to_string()),
            comments: Mutex::new(Vec::new()),
        }
    }

    fn add_comment(&self, id: &str, message: &str) {
        let mut comments = self.comments.lock().unwrap();
        let minute = comments.len() as u32;
        comments.push(Comment {
            id: id.to_string(),
            message: message.to_string(),
            author: Author {
                id: format!("u-{id}"),
                name: format!("User {id}"),
            },
            created_time: Utc.with_ymd_and_hms(2025, 4, 2, 10, minute, 0).unwrap(),
            parent_id: None,
            attachment_url: None,
        });
    }
}

#[async_trait]
impl CommentSource for LivePost {
    async fn fetch_post(&self, post_id: &str) -> Result<Post> {
        Ok(Post {
            id: post_id.to_string(),
            message: self.message.lock().unwrap().clone(),
            created_time: None,
            updated_time: None,
            permalink_url: None,
        })
    }

    async fn fetch_comments_page(&self, _post_id: &str, cursor: Option<&str>) -> Result<CommentPage> {
        let start: usize = match cursor {
            None => 0,
            Some(c) => c
                .parse()
                .map_err(|_| AppError::validation(format!("bad cursor {c}")))?,
        };
        let comments = self.comments.lock().unwrap();
        let end = (start + 2).min(comments.len());
        Ok(CommentPage {
            items: comments[start..end].to_vec(),
            next_cursor: (end < comments.len()).then(|| end.to_string()),
        })
    }
}

/// Spreadsheet stand-in that can be switched off.
#[derive(Default)]
struct Table {
    rows: Mutex<Vec<Vec<String>>>,
    down: Mutex<bool>,
}

#[async_trait]
impl TabularStore for Table {
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        if *self.down.lock().unwrap() {
            return Err(AppError::remote("table", 503, "backend unavailable"));
        }
        self.rows.lock().unwrap().extend(rows.iter().cloned());
        Ok(())
    }

    async fn ensure_header(&self, header: &[&str]) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.is_empty() {
            rows.push(header.iter().map(|h| h.to_string()).collect());
        }
        Ok(())
    }
}

fn config(dir: &TempDir) -> Arc<Config> {
    let mut config = Config::default();
    config.source.page_id = "100".into();
    config.source.post_id = "200".into();
    config.source.access_token = "token".into();
    config.output.dir = dir.path().to_path_buf();
    config.sinks = vec![SinkKind::Local, SinkKind::Spreadsheet];
    config.monitor.page_delay_ms = 0;
    config.batch.max_size = 3;
    Arc::new(config)
}

fn sinks(dir: &TempDir, table: &Arc<Table>) -> Vec<SinkSlot> {
    let policy = BackoffPolicy {
        base: Duration::from_millis(5),
        exponent_cap: 2,
        max_delay: Duration::from_millis(50),
        max_retries: 1,
    };
    vec![
        SinkSlot::new(Box::new(LocalFileSink::new(dir.path())), policy.clone()),
        SinkSlot::new(Box::new(SpreadsheetSink::new(table.clone())), policy),
    ]
}

async fn csv_rows(dir: &TempDir) -> Vec<String> {
    tokio::fs::read_to_string(dir.path().join("comments.csv"))
        .await
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_comments_flow_to_both_sinks() {
    let dir = TempDir::new().unwrap();
    let post = Arc::new(LivePost::new("Giveaway! Comment to enter"));
    let table = Arc::new(Table::default());
    for (id, text) in [("a", "me!"), ("b", "count me in"), ("c", "yes"), ("d", "hi")] {
        post.add_comment(id, text);
    }

    let mut monitor = MonitorLoop::start(
        config(&dir),
        post.clone(),
        sinks(&dir, &table),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let report = monitor.tick().await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.new_comments, 4);
    assert_eq!(report.flushes.len(), 1);
    assert_eq!(report.pending, 1);

    // Header + first three comments in both places.
    assert_eq!(csv_rows(&dir).await.len(), 4);
    {
        let rows = table.rows.lock().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][0], "event");
        assert_eq!(rows[1][1], "a");
        assert_eq!(rows[3][1], "c");
    }

    // Nothing new: no events, the leftover stays buffered.
    let report = monitor.tick().await.unwrap();
    assert_eq!(report.new_comments, 0);
    assert_eq!(report.pending, 1);

    monitor.finish().await.unwrap();
    assert_eq!(csv_rows(&dir).await.len(), 5);
    assert_eq!(table.rows.lock().unwrap().len(), 5);

    let state = StateStore::new(dir.path().join("state.json"))
        .load()
        .await
        .unwrap();
    assert_eq!(state.seen_comment_ids.len(), 4);
    assert!(state.pending.is_empty());
    assert!(state.last_flush.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_spreadsheet_outage_delays_but_never_drops() {
    let dir = TempDir::new().unwrap();
    let post = Arc::new(LivePost::new("Ask me anything"));
    let table = Arc::new(Table::default());
    *table.down.lock().unwrap() = true;

    let mut monitor = MonitorLoop::start(
        config(&dir),
        post.clone(),
        sinks(&dir, &table),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    for id in ["q1", "q2", "q3"] {
        post.add_comment(id, "question");
    }
    let report = monitor.tick().await.unwrap();
    assert!(report.flushes.is_empty());
    assert_eq!(report.pending, 3);
    // The local sink succeeded before the spreadsheet failed.
    assert_eq!(csv_rows(&dir).await.len(), 4);

    *table.down.lock().unwrap() = false;
    post.add_comment("q4", "another");
    let report = monitor.tick().await.unwrap();
    assert_eq!(report.new_comments, 1);
    assert_eq!(report.flushes.len(), 1);
    assert_eq!(report.flushes[0].events, 4);

    // The retried events reach the local files a second time.
    assert_eq!(csv_rows(&dir).await.len(), 8);
    let ids: Vec<String> = table.rows.lock().unwrap()[1..]
        .iter()
        .map(|r| r[1].clone())
        .collect();
    assert_eq!(ids, vec!["q1", "q2", "q3", "q4"]);
    assert_eq!(monitor.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_post_edit_and_restart() {
    let dir = TempDir::new().unwrap();
    let post = Arc::new(LivePost::new("v1"));
    let table = Arc::new(Table::default());
    post.add_comment("a", "first");

    {
        let mut monitor = MonitorLoop::start(
            config(&dir),
            post.clone(),
            sinks(&dir, &table),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let report = monitor.tick().await.unwrap();
        assert!(!report.post_changed);
        assert_eq!(report.pending, 1);
    }

    *post.message.lock().unwrap() = "v2".into();
    let mut monitor = MonitorLoop::start(
        config(&dir),
        post.clone(),
        sinks(&dir, &table),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(monitor.pending(), 1);

    let report = monitor.tick().await.unwrap();
    assert!(report.post_changed);
    assert_eq!(report.new_comments, 0);
    monitor.finish().await.unwrap();

    let snapshot = LocalFileSink::new(dir.path())
        .load_post_snapshot("100_200")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.previous, "v1");
    assert_eq!(snapshot.message, "v2");

    let rows = table.rows.lock().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2][0], "post_content_changed");
}

#[tokio::test]
async fn test_corrupt_state_aborts_start() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("state.json"), b"not json")
        .await
        .unwrap();

    let err = MonitorLoop::start(
        config(&dir),
        Arc::new(LivePost::new("x")),
        Vec::new(),
        CancellationToken::new(),
    )
    .await
    .err()
    .unwrap();

    assert!(matches!(err, AppError::StateCorrupt { .. }));
}
