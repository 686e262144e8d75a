//! Typed push events for one task.
//!
//! The transport delivers `(event name, data)` frames; [`parse_event`] turns
//! them into a [`StreamEvent`]. Anything undecodable is reported as
//! [`StreamError::Malformed`] and dropped by the caller.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::runtime_meta::RuntimeMeta;
use crate::time::RawTimestamp;
use crate::types::{TaskStatus, lenient_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// Incremental status/log/result delta.
    Update,
    /// Task reached a terminal state.
    Finished,
    /// Id no longer resolvable server-side.
    Missing,
    /// Liveness plus runtime metadata.
    Heartbeat,
}

impl StreamEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Finished => "finished",
            Self::Missing => "missing",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// The server says no further events follow.
    pub fn closes_stream(self) -> bool {
        matches!(self, Self::Finished | Self::Missing)
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamEventKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            // SSE frames without an `event:` line default to "message"
            "update" | "message" | "" => Ok(Self::Update),
            "finished" => Ok(Self::Finished),
            "missing" => Ok(Self::Missing),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(StreamError::UnknownEvent(other.to_owned())),
        }
    }
}

/// JSON body shared by all event kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEventBody {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default, alias = "metadata")]
    pub runtime: Option<RuntimeMeta>,
}

impl TaskEventBody {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(RawTimestamp::parse)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub body: TaskEventBody,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind, body: TaskEventBody) -> Self {
        Self { kind, body }
    }
}

/// Decode one transport frame. An empty data section is an empty body.
pub fn parse_event(name: Option<&str>, data: &str) -> Result<StreamEvent, StreamError> {
    let kind: StreamEventKind = name.unwrap_or("").parse()?;
    let body = if data.trim().is_empty() {
        TaskEventBody::default()
    } else {
        serde_json::from_str(data)
            .map_err(|e| StreamError::Malformed(format!("{kind} event: {e}")))?
    };
    Ok(StreamEvent { kind, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_event_full_body() {
        let data = r#"{
            "task_id": "abc",
            "status": "PROCESSING",
            "logs": ["step 1", "step 2"],
            "result": "partial",
            "timestamp": "2026-01-01T00:00:00Z",
            "runtime": {"provider": "p", "model": "m", "endpoint": "/e", "status": "ok"}
        }"#;
        let ev = parse_event(Some("update"), data).expect("parse");
        assert_eq!(ev.kind, StreamEventKind::Update);
        assert_eq!(ev.body.task_id.as_deref(), Some("abc"));
        assert_eq!(ev.body.status, Some(TaskStatus::Processing));
        assert_eq!(ev.body.logs, vec!["step 1", "step 2"]);
        assert_eq!(ev.body.result.as_deref(), Some("partial"));
        assert!(ev.body.timestamp().is_some());
        let runtime = ev.body.runtime.expect("runtime");
        assert_eq!(runtime.model.as_deref(), Some("m"));
    }

    #[test]
    fn default_sse_name_is_update() {
        let ev = parse_event(None, r#"{"status": "PENDING"}"#).expect("parse");
        assert_eq!(ev.kind, StreamEventKind::Update);
        let ev = parse_event(Some("message"), "{}").expect("parse");
        assert_eq!(ev.kind, StreamEventKind::Update);
    }

    #[test]
    fn missing_with_empty_body() {
        let ev = parse_event(Some("missing"), "").expect("parse");
        assert_eq!(ev.kind, StreamEventKind::Missing);
        assert_eq!(ev.body, TaskEventBody::default());
    }

    #[test]
    fn malformed_json_is_error() {
        let err = parse_event(Some("update"), "{not json").expect_err("should fail");
        assert!(matches!(err, StreamError::Malformed(_)));
    }

    #[test]
    fn wrong_shape_is_error() {
        let err = parse_event(Some("update"), r#"{"logs": "one line"}"#).expect_err("should fail");
        assert!(matches!(err, StreamError::Malformed(_)));
    }

    #[test]
    fn unknown_name_is_error() {
        let err = parse_event(Some("telemetry"), "{}").expect_err("should fail");
        assert_eq!(err, StreamError::UnknownEvent("telemetry".to_owned()));
    }

    #[test]
    fn closing_kinds() {
        assert!(StreamEventKind::Finished.closes_stream());
        assert!(StreamEventKind::Missing.closes_stream());
        assert!(!StreamEventKind::Update.closes_stream());
        assert!(!StreamEventKind::Heartbeat.closes_stream());
    }
}
