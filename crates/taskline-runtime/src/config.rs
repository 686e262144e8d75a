//! Engine tuning and backend endpoint layout.

use std::time::Duration;

pub const DEFAULT_TASK_POLL_MS: u64 = 3000;
pub const DEFAULT_HISTORY_POLL_MS: u64 = 5000;

/// Poll cache keys double as request paths.
pub const TASKS_PATH: &str = "/tasks";
pub const HISTORY_PATH: &str = "/history";
pub const DETAIL_PATH: &str = "/tasks/{id}";
pub const EVENTS_PATH: &str = "/tasks/{id}/events";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub task_poll_interval: Duration,
    pub history_poll_interval: Duration,
    /// Close a task's push connection once it reaches a terminal status.
    pub auto_close: bool,
    pub tasks_path: String,
    pub history_path: String,
    /// `{id}` is replaced by the correlation id.
    pub detail_path: String,
    pub events_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_poll_interval: Duration::from_millis(DEFAULT_TASK_POLL_MS),
            history_poll_interval: Duration::from_millis(DEFAULT_HISTORY_POLL_MS),
            auto_close: true,
            tasks_path: TASKS_PATH.to_string(),
            history_path: HISTORY_PATH.to_string(),
            detail_path: DETAIL_PATH.to_string(),
            events_path: EVENTS_PATH.to_string(),
        }
    }
}
