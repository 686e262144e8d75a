use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StreamError;

// ─── Role ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Position of the role inside one correlation group.
    pub fn group_rank(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Assistant => 1,
            Self::System => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Task Status ──────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Lost,
}

impl TaskStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Lost,
    ];

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Lost)
    }

    /// Work is queued or running; the timeline shows it as pending.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Lost => "LOST",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Ok(Self::Pending),
            "processing" | "running" | "in_progress" => Ok(Self::Processing),
            "completed" | "complete" | "succeeded" | "done" => Ok(Self::Completed),
            "failed" | "error" => Ok(Self::Failed),
            "lost" => Ok(Self::Lost),
            other => Err(StreamError::Malformed(format!("unknown task status: {other}"))),
        }
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helper: unknown or non-string statuses become `None` instead of
/// failing the whole payload.
pub(crate) fn lenient_status<'de, D>(deserializer: D) -> Result<Option<TaskStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}

// ─── Timeline Entry ───────────────────────────────────────────────

/// Context the backend reports as used to produce a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUsage {
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// One displayable request or response. Derived, never stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub role: Role,
    pub content: String,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub pending: bool,
    pub status: Option<TaskStatus>,
    pub context_used: Option<ContextUsage>,
}

impl TimelineEntry {
    pub fn user(content: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self::new(Role::User, content, correlation_id)
    }

    pub fn assistant(content: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self::new(Role::Assistant, content, correlation_id)
    }

    fn new(role: Role, content: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            correlation_id,
            timestamp: None,
            pending: false,
            status: None,
            context_used: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self.pending = status.is_in_flight();
        self
    }

    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

// ─── Timeline ─────────────────────────────────────────────────────

/// Reconciled, display-ready view handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    /// Some source is serving last-known-good data after a failure.
    pub stale: bool,
    /// A poll key is inside its transient-outage suspension window.
    pub retrying: bool,
    pub computed_at: DateTime<Utc>,
    pub version: u64,
}

impl Timeline {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            stale: false,
            retrying: false,
            computed_at: now,
            version: 0,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
