//! Per-task stream buffer and the reducer that folds push events into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime_meta::RuntimeMeta;
use crate::stream_event::{StreamEvent, StreamEventKind};
use crate::types::TaskStatus;

/// Live state of one tracked task, as seen through its push connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStreamBuffer {
    pub task_id: String,
    pub status: TaskStatus,
    /// Append-only, arrival order, no exact duplicates.
    pub logs: Vec<String>,
    pub result: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub connected: bool,
    pub last_error: Option<String>,
    pub runtime: RuntimeMeta,
}

/// What [`TaskStreamBuffer::apply`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: bool,
    /// The connection for this task should be closed now.
    pub should_close: bool,
}

impl TaskStreamBuffer {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Self::default()
        }
    }

    /// Fold one event into the buffer.
    ///
    /// `update`/`finished`/`missing` merge logs (append if absent), overwrite
    /// status, result and last-event time, and mark the buffer connected.
    /// `heartbeat` only touches liveness and runtime metadata. With
    /// `auto_close`, a closing kind or a terminal resulting status asks the
    /// caller to close the connection and flips `connected` off.
    pub fn apply(&mut self, event: &StreamEvent, now: DateTime<Utc>, auto_close: bool) -> ApplyOutcome {
        let body = &event.body;
        let before = self.clone();

        if let Some(runtime) = &body.runtime {
            self.runtime.merge(runtime);
        }

        if event.kind == StreamEventKind::Heartbeat {
            self.heartbeat_at = Some(body.timestamp().unwrap_or(now));
            return ApplyOutcome {
                changed: *self != before,
                should_close: false,
            };
        }

        for line in &body.logs {
            self.push_log(line);
        }

        self.status = match (event.kind, body.status) {
            (_, Some(status)) => status,
            (StreamEventKind::Finished, None) if !self.status.is_terminal() => TaskStatus::Completed,
            (StreamEventKind::Missing, None) if !self.status.is_terminal() => TaskStatus::Lost,
            (_, None) => self.status,
        };
        if body.result.is_some() {
            self.result.clone_from(&body.result);
        }
        self.last_event_at = Some(body.timestamp().unwrap_or(now));
        self.connected = true;
        self.last_error = None;

        let should_close = auto_close && (event.kind.closes_stream() || self.status.is_terminal());
        if should_close {
            self.connected = false;
        }

        ApplyOutcome {
            changed: *self != before,
            should_close,
        }
    }

    /// Append a log line unless an identical line is already present.
    /// Returns whether the line was appended.
    pub fn push_log(&mut self, line: &str) -> bool {
        if self.logs.iter().any(|existing| existing == line) {
            return false;
        }
        self.logs.push(line.to_owned());
        true
    }

    /// Connection opened; no event received yet.
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.last_error = None;
    }

    /// Transport failed. The buffer keeps its data; only an explicit reopen
    /// reconnects.
    pub fn mark_transport_error(&mut self, message: impl Into<String>) {
        self.connected = false;
        self.last_error = Some(message.into());
    }

    /// Connection ended without error (server closed or auto-close).
    pub fn mark_closed(&mut self) {
        self.connected = false;
    }

    pub fn content(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn has_result(&self) -> bool {
        !self.content().trim().is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ─── Tests ───────────────────────────────────────────────────────
