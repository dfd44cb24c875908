//! Change detection for the monitored post.
//!
//! Compares a freshly fetched post and its full comment listing against the
//! persisted state and reports what is new. Comments are keyed by id only:
//! the listing offers no edit signal, so known ids are never reported again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::{Comment, DetectedEvent, Event, Post};
use crate::storage::PersistentState;

/// Events found in one cycle plus the state changes they imply.
///
/// Nothing here is committed until [`Detection::apply_to`] is called.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Comment events in listing order, then at most one post event
    pub events: Vec<Event>,
    /// Ids to add to the seen set
    pub newly_seen: Vec<String>,
    /// New post baseline, if it differs from the recorded one
    pub post_content: Option<String>,
}

impl Detection {
    /// Check if there are any events.
    pub fn has_changes(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn new_comment_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::NewComment { .. }))
            .count()
    }

    pub fn post_changed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, Event::PostContentChanged { .. }))
    }

    /// Stamp every event with the detection time.
    pub fn stamped(&self, detected_at: DateTime<Utc>) -> Vec<DetectedEvent> {
        self.events
            .iter()
            .cloned()
            .map(|event| DetectedEvent::new(event, detected_at))
            .collect()
    }

    /// Record the detected changes in `state`.
    pub fn apply_to(&self, state: &mut PersistentState) {
        state
            .seen_comment_ids
            .extend(self.newly_seen.iter().cloned());
        if let Some(content) = &self.post_content {
            state.last_post_content = Some(content.clone());
        }
    }
}

/// Stateless comparator between fetched data and persisted state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Compare `post` and `comments` against `state`.
    pub fn detect(&self, post: &Post, comments: &[Comment], state: &PersistentState) -> Detection {
        let mut detection = Detection::default();
        let mut emitted: HashSet<&str> = HashSet::new();

        for comment in comments {
            let id = comment.id.as_str();
            if state.seen_comment_ids.contains(id) || !emitted.insert(id) {
                continue;
            }
            detection.newly_seen.push(comment.id.clone());
            detection.events.push(Event::NewComment {
                comment: comment.clone(),
            });
        }

        match &state.last_post_content {
            // First observation only sets the baseline.
            None => detection.post_content = Some(post.message.clone()),
            Some(previous) if previous.as_bytes() != post.message.as_bytes() => {
                detection.events.push(Event::PostContentChanged {
                    post_id: post.id.clone(),
                    old: previous.clone(),
                    new: post.message.clone(),
                });
                detection.post_content = Some(post.message.clone());
            }
            Some(_) => {}
        }

        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::paginate::tests::make_comment;

    fn make_post(message: &str) -> Post {
        Post {
            id: "page_post".into(),
            message: message.into(),
            created_time: None,
            updated_time: None,
            permalink_url: None,
        }
    }

    fn state_with(ids: &[&str], content: Option<&str>) -> PersistentState {
        PersistentState {
            seen_comment_ids: ids.iter().map(|s| s.to_string()).collect(),
            last_post_content: content.map(str::to_string),
            ..PersistentState::default()
        }
    }

    fn new_comment_ids(detection: &Detection) -> Vec<&str> {
        detection
            .events
            .iter()
            .filter_map(|e| match e {
                Event::NewComment { comment } => Some(comment.id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fresh_state_emits_all_comments_in_order() {
        let comments = vec![make_comment("c1"), make_comment("c2"), make_comment("c3")];
        let state = state_with(&[], Some("text"));

        let detection = ChangeDetector::new().detect(&make_post("text"), &comments, &state);

        assert_eq!(detection.events.len(), 3);
        assert_eq!(new_comment_ids(&detection), vec!["c1", "c2", "c3"]);
        assert!(!detection.post_changed());
    }

    #[test]
    fn test_post_change_emits_single_event() {
        let comments = vec![make_comment("c1")];
        let state = state_with(&["c1"], Some("A"));

        let detection = ChangeDetector::new().detect(&make_post("B"), &comments, &state);

        assert_eq!(
            detection.events,
            vec![Event::PostContentChanged {
                post_id: "page_post".into(),
                old: "A".into(),
                new: "B".into(),
            }]
        );
        assert_eq!(detection.post_content.as_deref(), Some("B"));
    }

    #[test]
    fn test_second_cycle_is_idempotent() {
        let comments = vec![make_comment("c1"), make_comment("c2")];
        let post = make_post("text");
        let mut state = state_with(&[], Some("text"));
        let detector = ChangeDetector::new();

        let first = detector.detect(&post, &comments, &state);
        first.apply_to(&mut state);
        let second = detector.detect(&post, &comments, &state);

        assert_eq!(first.new_comment_count(), 2);
        assert!(!second.has_changes());
        assert!(second.newly_seen.is_empty());
    }

    #[test]
    fn test_comment_events_precede_post_event() {
        let comments = vec![make_comment("c9"), make_comment("c4")];
        let state = state_with(&[], Some("old"));

        let detection = ChangeDetector::new().detect(&make_post("new"), &comments, &state);

        assert_eq!(detection.events.len(), 3);
        assert_eq!(new_comment_ids(&detection), vec!["c9", "c4"]);
        assert!(matches!(
            detection.events.last(),
            Some(Event::PostContentChanged { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_within_walk_emitted_once() {
        let comments = vec![make_comment("c1"), make_comment("c2"), make_comment("c1")];
        let state = state_with(&[], Some("text"));

        let detection = ChangeDetector::new().detect(&make_post("text"), &comments, &state);

        assert_eq!(new_comment_ids(&detection), vec!["c1", "c2"]);
        assert_eq!(detection.newly_seen, vec!["c1", "c2"]);
    }

    #[test]
    fn test_first_observation_sets_baseline_without_event() {
        let state = state_with(&[], None);

        let detection = ChangeDetector::new().detect(&make_post("hello"), &[], &state);

        assert!(!detection.has_changes());
        assert_eq!(detection.post_content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_apply_records_seen_ids_and_content() {
        let comments = vec![make_comment("c1")];
        let mut state = state_with(&["c0"], Some("A"));

        let detection = ChangeDetector::new().detect(&make_post("B"), &comments, &state);
        detection.apply_to(&mut state);

        assert!(state.seen_comment_ids.contains("c0"));
        assert!(state.seen_comment_ids.contains("c1"));
        assert_eq!(state.last_post_content.as_deref(), Some("B"));
    }
}
