use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Shared state of one resource key. Every subscriber of the key sees the
/// same `Arc<PollState>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    /// Last successfully fetched snapshot. Kept across failures.
    pub data: Option<Arc<Value>>,
    pub loading: bool,
    pub error: Option<String>,
    /// Inside a suspension window after a transient-unavailable response.
    pub suspended: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PollState {
    /// A hard (non-transient) failure is being shown over last-known data.
    pub fn is_stale(&self) -> bool {
        self.error.is_some() && !self.suspended
    }

    pub fn is_retrying(&self) -> bool {
        self.suspended
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_vs_retrying() {
        let hard = PollState {
            error: Some("HTTP 500".into()),
            ..PollState::default()
        };
        assert!(hard.is_stale());
        assert!(!hard.is_retrying());

        let soft = PollState {
            error: Some("service unavailable, retry in 15s".into()),
            suspended: true,
            ..PollState::default()
        };
        assert!(!soft.is_stale());
        assert!(soft.is_retrying());
    }
}
