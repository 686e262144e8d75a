//! Poll snapshot payloads: the history list, the task list and task detail.
//!
//! Snapshots arrive as JSON. Decoding is per record: one undecodable record
//! is skipped and the rest of the snapshot is kept.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::time::RawTimestamp;
use crate::types::{ContextUsage, TaskStatus, lenient_status};

/// Envelope keys under which a list endpoint may nest its records.
const LIST_ENVELOPE_KEYS: [&str; 4] = ["items", "data", "tasks", "history"];

// ─── Session linkage ─────────────────────────────────────────────

/// Session reference nested inside a task's runtime context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLink {
    #[serde(default, alias = "session_id")]
    pub id: Option<String>,
}

/// Execution context the backend attaches to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session: Option<SessionLink>,
}

impl RuntimeContext {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or_else(|| self.session.as_ref().and_then(|s| s.id.as_deref()))
    }
}

fn nested_session_id(context: Option<&RuntimeContext>) -> Option<&str> {
    context.and_then(RuntimeContext::session_id)
}

// ─── History ─────────────────────────────────────────────────────

/// One user prompt as recorded by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(alias = "task_id")]
    pub correlation_id: String,
    #[serde(default, alias = "content")]
    pub prompt: String,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl HistoryRecord {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_ref().and_then(RawTimestamp::parse)
    }
}

// ─── Tasks ───────────────────────────────────────────────────────

/// One task (assistant side) as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(alias = "task_id")]
    pub correlation_id: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub updated_at: Option<RawTimestamp>,
    #[serde(default)]
    pub runtime_context: Option<RuntimeContext>,
    #[serde(default)]
    pub context_used: Option<ContextUsage>,
}

impl TaskRecord {
    pub fn session_id(&self) -> Option<&str> {
        nested_session_id(self.runtime_context.as_ref())
    }

    /// Creation time, falling back to last update.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_ref()
            .and_then(RawTimestamp::parse)
            .or_else(|| self.updated_at.as_ref().and_then(RawTimestamp::parse))
    }

    pub fn result_text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn is_completed(&self) -> bool {
        self.status == Some(TaskStatus::Completed)
    }
}

/// Detail-by-id response used for hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(default, alias = "task_id")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub runtime_context: Option<RuntimeContext>,
}

impl TaskDetail {
    pub fn session_id(&self) -> Option<&str> {
        nested_session_id(self.runtime_context.as_ref())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_ref().and_then(RawTimestamp::parse)
    }
}

// ─── Decoding ────────────────────────────────────────────────────

/// Decode a list snapshot. Accepts a bare array or an object wrapping the
/// array under one of the usual envelope keys. Records that fail to decode
/// are skipped.
pub fn decode_list<T: DeserializeOwned>(value: &serde_json::Value) -> Result<Vec<T>, FetchError> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => LIST_ENVELOPE_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(serde_json::Value::as_array))
            .ok_or_else(|| FetchError::Decode("snapshot object has no record list".into()))?,
        other => {
            return Err(FetchError::Decode(format!(
                "expected list snapshot, got {}",
                json_kind(other)
            )));
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_accepts_task_id_alias() {
        let records: Vec<HistoryRecord> = decode_list(&json!([
            {"task_id": "abc", "prompt": "Explain X", "created_at": "2026-01-01T00:00:00Z", "session_id": "s1"}
        ]))
        .expect("decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, "abc");
        assert_eq!(records[0].prompt, "Explain X");
        assert!(records[0].timestamp().is_some());
    }

    #[test]
    fn task_session_from_nested_context() {
        let direct: TaskRecord = serde_json::from_value(json!({
            "correlation_id": "a",
            "runtime_context": {"session_id": "s1"}
        }))
        .expect("decode");
        assert_eq!(direct.session_id(), Some("s1"));

        let nested: TaskRecord = serde_json::from_value(json!({
            "correlation_id": "b",
            "runtime_context": {"session": {"id": "s2"}}
        }))
        .expect("decode");
        assert_eq!(nested.session_id(), Some("s2"));
    }

    #[test]
    fn unknown_status_is_none_not_an_error() {
        let task: TaskRecord = serde_json::from_value(json!({
            "correlation_id": "a",
            "status": "WOBBLING"
        }))
        .expect("decode");
        assert_eq!(task.status, None);
    }

    #[test]
    fn envelope_and_bad_records() {
        let tasks: Vec<TaskRecord> = decode_list(&json!({
            "tasks": [
                {"correlation_id": "a", "status": "COMPLETED", "result": "ok"},
                {"status": "COMPLETED"},
                "garbage"
            ]
        }))
        .expect("decode");
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_completed());
    }

    #[test]
    fn non_list_snapshot_is_decode_error() {
        let err = decode_list::<TaskRecord>(&json!("nope")).expect_err("should fail");
        assert!(matches!(err, FetchError::Decode(_)));
        let err = decode_list::<TaskRecord>(&json!({"rows": []})).expect_err("should fail");
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn task_timestamp_falls_back_to_updated_at() {
        let task: TaskRecord = serde_json::from_value(json!({
            "correlation_id": "a",
            "updated_at": 1767225600
        }))
        .expect("decode");
        assert!(task.timestamp().is_some());
    }
}
