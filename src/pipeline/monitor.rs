// src/pipeline/monitor.rs

//! The polling loop.
//!
//! One tick is: fetch post → walk comment pages → detect → buffer → flush on
//! trigger → save state. Ticks are strictly sequential; the state is saved
//! (pending events included) at the end of every tick that fetched the post,
//! and after any overdue flush attempted while the post was unreachable.

use std::mem;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, Event};
use crate::pipeline::backoff::{BackoffController, BackoffPolicy};
use crate::pipeline::batch::{BatchAccumulator, FlushReport, FlushTrigger};
use crate::pipeline::detect::ChangeDetector;
use crate::pipeline::paginate::PaginationWalker;
use crate::services::CommentSource;
use crate::storage::{PersistentState, SinkSlot, StateStore};
use crate::utils::preview;

/// What a single tick observed and did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub pages: usize,
    pub comments_seen: usize,
    pub new_comments: usize,
    pub post_changed: bool,
    /// The comment walk ended early; detection ran on partial results
    pub degraded: bool,
    pub flushes: Vec<FlushReport>,
    /// Events still buffered after the tick
    pub pending: usize,
}

/// Top-level driver owning the state, the buffer and the sinks.
pub struct MonitorLoop {
    config: Arc<Config>,
    post_id: String,
    source: Arc<dyn CommentSource>,
    store: StateStore,
    state: PersistentState,
    accumulator: BatchAccumulator,
    sinks: Vec<SinkSlot>,
    post_backoff: BackoffController,
    page_backoff: BackoffController,
    detector: ChangeDetector,
    shutdown: CancellationToken,
}

impl MonitorLoop {
    /// Load persisted state and assemble the loop.
    ///
    /// Fails with `Validation` on an unusable schedule and with
    /// `StateCorrupt` if the state file cannot be trusted.
    pub async fn start(
        config: Arc<Config>,
        source: Arc<dyn CommentSource>,
        sinks: Vec<SinkSlot>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate_schedule()?;
        let store = StateStore::new(config.state_path());
        let mut state = store.load().await?;

        let mut accumulator = BatchAccumulator::new(&config.batch, state.last_flush, Utc::now());
        accumulator.restore(mem::take(&mut state.pending));

        let policy = BackoffPolicy::from(&config.backoff);
        let post_id = config.post_key();
        log::info!(
            "Monitoring post {} every {}s ({} sink(s))",
            post_id,
            config.monitor.interval_secs,
            sinks.len()
        );

        Ok(Self {
            post_backoff: BackoffController::new("graph:post", policy.clone()),
            page_backoff: BackoffController::new("graph:comments", policy),
            detector: ChangeDetector::new(),
            config,
            post_id,
            source,
            store,
            state,
            accumulator,
            sinks,
            shutdown,
        })
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn pending(&self) -> usize {
        self.accumulator.len()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one fetch-detect-accumulate cycle.
    ///
    /// A failed post fetch returns `FetchFailed`. Nothing is detected then,
    /// but a batch whose trigger already fired is still flushed and saved.
    pub async fn tick(&mut self) -> Result<TickReport> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let source = &self.source;
        let post_id = self.post_id.as_str();
        let fetched = self
            .post_backoff
            .call(&self.shutdown, || source.fetch_post(post_id))
            .await;
        let post = match fetched {
            Ok(post) => post,
            Err(exhausted) => {
                let error = exhausted.into_fetch_failed("graph:post");
                if matches!(error, AppError::FetchFailed { .. }) {
                    self.flush_overdue().await?;
                }
                return Err(error);
            }
        };

        let outcome = PaginationWalker::new(
            self.source.as_ref(),
            &self.post_id,
            &mut self.page_backoff,
            &self.shutdown,
        )
        .max_pages(self.config.monitor.max_pages)
        .page_delay(self.config.monitor.page_delay())
        .collect()
        .await;

        let mut report = TickReport {
            pages: outcome.pages,
            comments_seen: outcome.comments.len(),
            degraded: outcome.error.is_some(),
            ..TickReport::default()
        };
        if let Some(error) = &outcome.error {
            log::warn!(
                "Comment walk ended after {} page(s), using partial results: {}",
                outcome.pages,
                error
            );
        }

        let detection = self.detector.detect(&post, &outcome.comments, &self.state);
        report.new_comments = detection.new_comment_count();
        report.post_changed = detection.post_changed();
        for event in &detection.events {
            log_event(event);
        }

        let now = Utc::now();
        let mut flush_failed = false;
        for entry in detection.stamped(now) {
            self.accumulator.push(entry);
            if !flush_failed && self.accumulator.should_flush(now) == Some(FlushTrigger::Size) {
                flush_failed = !self.try_flush(FlushTrigger::Size, &mut report).await;
            }
        }
        detection.apply_to(&mut self.state);

        if !flush_failed {
            if let Some(trigger) = self.accumulator.should_flush(Utc::now()) {
                self.try_flush(trigger, &mut report).await;
            }
        }

        report.pending = self.accumulator.len();
        self.persist().await?;

        log::info!(
            "Tick: {} page(s), {} comment(s), {} new, {} pending",
            report.pages,
            report.comments_seen,
            report.new_comments,
            report.pending
        );
        Ok(report)
    }

    /// Flush; a failure keeps the batch and is only logged.
    async fn try_flush(&mut self, trigger: FlushTrigger, report: &mut TickReport) -> bool {
        match self
            .accumulator
            .flush(&mut self.sinks, trigger, Utc::now(), &self.shutdown)
            .await
        {
            Ok(flush) => {
                report.flushes.push(flush);
                true
            }
            Err(error) => {
                log::error!("Flush deferred to next trigger: {}", error);
                false
            }
        }
    }

    /// Flush a buffered batch whose trigger has fired, outside a full tick.
    async fn flush_overdue(&mut self) -> Result<()> {
        let Some(trigger) = self.accumulator.should_flush(Utc::now()) else {
            return Ok(());
        };
        log::info!(
            "Post unreachable, flushing {} buffered event(s) ({} trigger)",
            self.accumulator.len(),
            trigger.as_str()
        );
        let mut report = TickReport::default();
        self.try_flush(trigger, &mut report).await;
        self.persist().await
    }

    /// Flush whatever is buffered, regardless of triggers.
    pub async fn flush_pending(&mut self) -> Result<Option<FlushReport>> {
        if self.accumulator.is_empty() {
            return Ok(None);
        }
        let report = self
            .accumulator
            .flush(
                &mut self.sinks,
                FlushTrigger::Forced,
                Utc::now(),
                &self.shutdown,
            )
            .await?;
        Ok(Some(report))
    }

    /// Final flush attempt, then save. Unflushed events stay pending on disk.
    pub async fn finish(&mut self) -> Result<()> {
        if let Err(error) = self.flush_pending().await {
            log::error!(
                "Final flush failed, {} event(s) kept for next start: {}",
                self.accumulator.len(),
                error
            );
        }
        self.persist().await
    }

    /// Tick on the configured interval until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.monitor.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(_) => {}
                Err(AppError::Cancelled) => break,
                Err(error @ AppError::FetchFailed { .. }) => {
                    log::error!("Cycle skipped: {}", error);
                }
                Err(error) if error.is_transient() => {
                    log::error!("Cycle failed, retrying next tick: {}", error);
                }
                Err(error) => return Err(error),
            }
        }

        log::info!("Shutdown requested, flushing before exit");
        self.finish().await
    }

    async fn persist(&mut self) -> Result<()> {
        self.state.pending = self.accumulator.pending().clone();
        self.state.last_flush = self.accumulator.last_flush();
        self.store.save(&self.state).await
    }
}

fn log_event(event: &Event) {
    match event {
        Event::NewComment { comment } => log::info!(
            "New comment from {}: {}",
            comment.author.name,
            preview(&comment.message, 80)
        ),
        Event::PostContentChanged { new, .. } => {
            log::info!("Post content changed: {}", preview(new, 80))
        }
        Event::CommentChanged { new, .. } => log::info!("Comment {} changed", new.id),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{Batch, DetectedEvent};
    use crate::pipeline::batch::tests::{FlakySink, slot};
    use crate::pipeline::paginate::tests::{FakeSource, make_comment};

    fn config(dir: &TempDir, max_size: usize) -> Arc<Config> {
        let mut config = Config::default();
        config.source.page_id = "page".into();
        config.source.post_id = "post".into();
        config.source.access_token = "t".into();
        config.output.dir = dir.path().to_path_buf();
        config.monitor.page_delay_ms = 0;
        config.backoff.base_ms = 10;
        config.backoff.max_retries = 1;
        config.batch.max_size = max_size;
        Arc::new(config)
    }

    async fn monitor(
        dir: &TempDir,
        max_size: usize,
        source: Arc<FakeSource>,
        sink: &FlakySink,
    ) -> MonitorLoop {
        MonitorLoop::start(
            config(dir, max_size),
            source,
            vec![slot(sink, 1)],
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    /// Write a state file as a previous run would have left it.
    async fn seed_state(dir: &TempDir, pending: &[&str], flushed_ago: TimeDelta) {
        let mut batch = Batch::new();
        for id in pending {
            let event = Event::NewComment {
                comment: make_comment(id),
            };
            batch.push(DetectedEvent::new(event, Utc::now() - flushed_ago));
        }
        let state = PersistentState {
            last_flush: Some(Utc::now() - flushed_ago),
            pending: batch,
            ..PersistentState::default()
        };
        StateStore::new(dir.path().join("state.json"))
            .save(&state)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_buffers_and_saves() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1", "c2"]]));
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 5, source, &sink).await;

        let report = monitor.tick().await.unwrap();

        assert_eq!(report.new_comments, 2);
        assert!(!report.post_changed);
        assert_eq!(report.pending, 2);
        assert!(sink.committed_ids().is_empty());

        let saved = StateStore::new(dir.path().join("state.json")).load().await.unwrap();
        assert_eq!(saved.seen_comment_ids.len(), 2);
        assert_eq!(saved.pending.len(), 2);
        assert_eq!(saved.last_post_content.as_deref(), Some("launch day text"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_flushes_mid_tick() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1", "c2", "c3", "c4"]]));
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 3, source, &sink).await;

        let report = monitor.tick().await.unwrap();

        assert_eq!(report.flushes.len(), 1);
        assert_eq!(sink.committed_ids(), vec![vec!["c1", "c2", "c3"]]);
        assert_eq!(report.pending, 1);
        assert!(monitor.state().last_flush.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_post_fetch_skips_cycle() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"]]));
        *source.post_failures.lock().unwrap() = 5;
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 5, source.clone(), &sink).await;

        let err = monitor.tick().await.unwrap_err();

        assert!(matches!(err, AppError::FetchFailed { attempts: 2, .. }));
        assert!(source.requests.lock().unwrap().is_empty());
        assert!(!dir.path().join("state.json").exists());

        *source.post_failures.lock().unwrap() = 0;
        let report = monitor.tick().await.unwrap();
        assert_eq!(report.new_comments, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_batch_flushes_while_post_fetch_fails() {
        let dir = TempDir::new().unwrap();
        seed_state(&dir, &["old"], TimeDelta::hours(2)).await;
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"]]));
        *source.post_failures.lock().unwrap() = 1000;
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 5, source, &sink).await;
        assert_eq!(monitor.pending(), 1);

        let err = monitor.tick().await.unwrap_err();

        assert!(matches!(err, AppError::FetchFailed { .. }));
        assert_eq!(sink.committed_ids(), vec![vec!["old"]]);
        assert_eq!(monitor.pending(), 0);

        let saved = StateStore::new(dir.path().join("state.json")).load().await.unwrap();
        assert!(saved.pending.is_empty());
        assert!(saved.last_flush.unwrap() > Utc::now() - TimeDelta::minutes(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_trigger_flushes_at_end_of_tick() {
        let dir = TempDir::new().unwrap();
        seed_state(&dir, &[], TimeDelta::minutes(10)).await;
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"]]));
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 5, source, &sink).await;

        let report = monitor.tick().await.unwrap();

        assert_eq!(report.flushes.len(), 1);
        assert_eq!(report.flushes[0].trigger, FlushTrigger::Age);
        assert_eq!(sink.committed_ids(), vec![vec!["c1"]]);
        assert_eq!(report.pending, 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected_at_start() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::clone(&config(&dir, 5));
        config.monitor.interval_secs = 0;

        let err = MonitorLoop::start(
            Arc::new(config),
            Arc::new(FakeSource::with_pages(vec![])),
            Vec::new(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_walk_still_detects() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"], vec!["c2"]]));
        source.fail_cursor("c1", 10);
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 5, source, &sink).await;

        let report = monitor.tick().await.unwrap();

        assert!(report.degraded);
        assert_eq!(report.pages, 1);
        assert_eq!(report.new_comments, 1);
        assert!(monitor.state().seen_comment_ids.contains("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_change_detected_on_later_tick() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"]]));
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 10, source.clone(), &sink).await;

        monitor.tick().await.unwrap();
        source.post.lock().unwrap().message = "edited text".into();
        let report = monitor.tick().await.unwrap();

        assert!(report.post_changed);
        assert_eq!(report.new_comments, 0);
        assert_eq!(report.pending, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_events_pending() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1", "c2"]]));
        let sink = FlakySink::named("spreadsheet").failing(10);
        let mut monitor = monitor(&dir, 2, source, &sink).await;

        let report = monitor.tick().await.unwrap();

        assert!(report.flushes.is_empty());
        assert_eq!(report.pending, 2);
        assert!(monitor.state().last_flush.is_none());
        assert_eq!(monitor.state().seen_comment_ids.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_restores_pending_and_seen() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1", "c2"]]));
        let sink = FlakySink::named("local");

        {
            let mut first = monitor(&dir, 10, source.clone(), &sink).await;
            first.tick().await.unwrap();
        }

        let mut second = monitor(&dir, 10, source, &sink).await;
        assert_eq!(second.pending(), 2);

        let report = second.tick().await.unwrap();
        assert_eq!(report.new_comments, 0);

        second.finish().await.unwrap();
        assert_eq!(sink.committed_ids(), vec![vec!["c1", "c2"]]);
        assert_eq!(second.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_and_flushes() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::with_pages(vec![vec!["c1"]]));
        let sink = FlakySink::named("local");
        let mut monitor = monitor(&dir, 10, source, &sink).await;
        let shutdown = monitor.shutdown_token().clone();

        let handle = tokio::spawn(async move {
            monitor.run().await.unwrap();
            monitor
        });
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        shutdown.cancel();
        let monitor = handle.await.unwrap();

        assert_eq!(sink.committed_ids(), vec![vec!["c1"]]);
        assert_eq!(monitor.pending(), 0);
        assert!(monitor.state().pending.is_empty());
    }
}
