//! Hydration planning: which completed tasks need a corrective detail fetch.
//!
//! The planner is pure. It observes the reconciled timeline and marks each
//! planned correlation id as visited, so repeated recomputation before a
//! fetch resolves never plans the same id twice within one session.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::buffer::TaskStreamBuffer;
use crate::snapshot::{TaskDetail, TaskRecord};
use crate::types::{Role, TimelineEntry};

/// Result content recovered by a detail fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedResult {
    pub correlation_id: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Per-session visited set.
#[derive(Debug, Clone, Default)]
pub struct HydrationTracker {
    session_id: Option<String>,
    visited: HashSet<String>,
}

/// Whether a record's session belongs to the active one. With no active
/// session every record belongs.
pub fn in_session(record_session: Option<&str>, active: Option<&str>) -> bool {
    match active {
        None => true,
        Some(active) => record_session == Some(active),
    }
}

impl HydrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the correlation ids that need a detail fetch now.
    ///
    /// A task qualifies when it is completed, belongs to the active session,
    /// has no assistant entry with content in `timeline`, has no live stream
    /// holding a result, and has not been visited this session.
    pub fn plan(
        &mut self,
        active_session: Option<&str>,
        tasks: &[TaskRecord],
        timeline: &[TimelineEntry],
        streams: &HashMap<String, TaskStreamBuffer>,
    ) -> Vec<String> {
        if self.session_id.as_deref() != active_session {
            self.session_id = active_session.map(String::from);
            self.visited.clear();
        }

        let answered: HashSet<&str> = timeline
            .iter()
            .filter(|e| e.role == Role::Assistant && e.has_content())
            .filter_map(|e| e.correlation_id.as_deref())
            .collect();

        let mut planned = Vec::new();
        for task in tasks {
            let cid = task.correlation_id.as_str();
            if !task.is_completed()
                || !in_session(task.session_id(), active_session)
                || answered.contains(cid)
                || streams.get(cid).is_some_and(TaskStreamBuffer::has_result)
                || self.visited.contains(cid)
            {
                continue;
            }
            self.visited.insert(cid.to_owned());
            planned.push(cid.to_owned());
        }
        planned
    }

    /// Turn a fetched detail into a mergeable result, or `None` when it
    /// belongs to another session or carries no result text.
    pub fn accept(
        correlation_id: &str,
        detail: &TaskDetail,
        active_session: Option<&str>,
    ) -> Option<HydratedResult> {
        if !in_session(detail.session_id(), active_session) {
            return None;
        }
        let content = detail.result.as_deref().unwrap_or("");
        if content.trim().is_empty() {
            return None;
        }
        Some(HydratedResult {
            correlation_id: correlation_id.to_owned(),
            content: content.to_owned(),
            timestamp: detail.timestamp(),
        })
    }

    pub fn is_visited(&self, correlation_id: &str) -> bool {
        self.visited.contains(correlation_id)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Forget every visited id (session reset).
    pub fn reset(&mut self) {
        self.visited.clear();
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RuntimeContext;
    use crate::types::TaskStatus;

    fn task(cid: &str, status: TaskStatus, session: &str) -> TaskRecord {
        TaskRecord {
            correlation_id: cid.to_owned(),
            status: Some(status),
            result: None,
            created_at: None,
            updated_at: None,
            runtime_context: Some(RuntimeContext {
                session_id: Some(session.to_owned()),
                session: None,
            }),
            context_used: None,
        }
    }

    fn detail(result: Option<&str>, session: Option<&str>) -> TaskDetail {
        TaskDetail {
            correlation_id: None,
            result: result.map(String::from),
            created_at: None,
            runtime_context: session.map(|s| RuntimeContext {
                session_id: Some(s.to_owned()),
                session: None,
            }),
        }
    }

    #[test]
    fn completed_unanswered_task_planned_once() {
        let mut tracker = HydrationTracker::new();
        let tasks = vec![task("xyz", TaskStatus::Completed, "s1")];
        let streams = HashMap::new();

        let mut total = Vec::new();
        for _ in 0..3 {
            total.extend(tracker.plan(Some("s1"), &tasks, &[], &streams));
        }
        assert_eq!(total, vec!["xyz".to_owned()]);
        assert!(tracker.is_visited("xyz"));
    }

    #[test]
    fn skips_non_completed_other_session_and_answered() {
        let mut tracker = HydrationTracker::new();
        let tasks = vec![
            task("running", TaskStatus::Processing, "s1"),
            task("failed", TaskStatus::Failed, "s1"),
            task("elsewhere", TaskStatus::Completed, "s2"),
            task("answered", TaskStatus::Completed, "s1"),
            task("streamed", TaskStatus::Completed, "s1"),
        ];
        let timeline = vec![TimelineEntry::assistant("hi", Some("answered".into()))];
        let mut streams = HashMap::new();
        let mut buf = TaskStreamBuffer::new("streamed");
        buf.result = Some("from stream".into());
        streams.insert("streamed".to_owned(), buf);

        let planned = tracker.plan(Some("s1"), &tasks, &timeline, &streams);
        assert!(planned.is_empty(), "planned: {planned:?}");
    }

    #[test]
    fn empty_assistant_entry_does_not_count_as_answered() {
        let mut tracker = HydrationTracker::new();
        let tasks = vec![task("xyz", TaskStatus::Completed, "s1")];
        let timeline = vec![TimelineEntry::assistant("  ", Some("xyz".into()))];
        let planned = tracker.plan(Some("s1"), &tasks, &timeline, &HashMap::new());
        assert_eq!(planned, vec!["xyz".to_owned()]);
    }

    #[test]
    fn session_change_and_reset_clear_visited() {
        let mut tracker = HydrationTracker::new();
        let tasks = vec![task("xyz", TaskStatus::Completed, "s1")];
        tracker.plan(Some("s1"), &tasks, &[], &HashMap::new());
        assert_eq!(tracker.visited_count(), 1);

        tracker.plan(Some("s2"), &tasks, &[], &HashMap::new());
        assert_eq!(tracker.visited_count(), 0);

        tracker.plan(Some("s1"), &tasks, &[], &HashMap::new());
        assert_eq!(tracker.visited_count(), 1);
        tracker.reset();
        assert_eq!(tracker.visited_count(), 0);
        let again = tracker.plan(Some("s1"), &tasks, &[], &HashMap::new());
        assert_eq!(again, vec!["xyz".to_owned()]);
    }

    #[test]
    fn accept_requires_session_match_and_content() {
        let ok = HydrationTracker::accept("xyz", &detail(Some("Hello"), Some("s1")), Some("s1"));
        assert_eq!(ok.map(|r| r.content), Some("Hello".to_owned()));

        assert!(HydrationTracker::accept("xyz", &detail(Some("Hello"), Some("s2")), Some("s1")).is_none());
        assert!(HydrationTracker::accept("xyz", &detail(Some(""), Some("s1")), Some("s1")).is_none());
        assert!(HydrationTracker::accept("xyz", &detail(None, Some("s1")), Some("s1")).is_none());
        assert!(HydrationTracker::accept("xyz", &detail(Some("Hello"), None), Some("s1")).is_none());
    }
}
