//! Locally originated (optimistic) timeline entries and the bookkeeping for
//! requests that are still waiting on the server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{TaskStatus, TimelineEntry};

#[derive(Debug, Clone, PartialEq)]
struct LocalEntry {
    local_id: String,
    entry: TimelineEntry,
}

/// A submitted prompt the server has not finished with yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub local_id: String,
    pub correlation_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// UI-originated entries: the highest-trust input of the Reconciler.
#[derive(Debug, Clone, Default)]
pub struct LocalTimeline {
    entries: Vec<LocalEntry>,
    pending: BTreeMap<String, PendingRequest>,
    next_local: u64,
}

impl LocalTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prompt before the server has assigned it a correlation id.
    /// Returns the local id used to confirm it later.
    pub fn push_prompt(&mut self, content: impl Into<String>, now: DateTime<Utc>) -> String {
        self.next_local += 1;
        let local_id = format!("local-{}", self.next_local);
        let mut entry = TimelineEntry::user(content, None).at(now);
        entry.pending = true;
        self.entries.push(LocalEntry {
            local_id: local_id.clone(),
            entry,
        });
        self.pending.insert(
            local_id.clone(),
            PendingRequest {
                local_id: local_id.clone(),
                correlation_id: None,
                submitted_at: now,
            },
        );
        local_id
    }

    /// Attach the server-assigned correlation id to an optimistic prompt.
    /// Returns `false` if the local id is unknown.
    pub fn confirm(&mut self, local_id: &str, correlation_id: impl Into<String>) -> bool {
        let correlation_id = correlation_id.into();
        let Some(local) = self.entries.iter_mut().find(|e| e.local_id == local_id) else {
            return false;
        };
        local.entry.correlation_id = Some(correlation_id.clone());
        local.entry.pending = false;
        if let Some(request) = self.pending.get_mut(local_id) {
            request.correlation_id = Some(correlation_id);
        }
        true
    }

    /// Insert or replace a locally known entry keyed by (role, correlation id).
    pub fn upsert(&mut self, entry: TimelineEntry) {
        let existing = entry.correlation_id.as_ref().and_then(|cid| {
            self.entries.iter_mut().find(|e| {
                e.entry.role == entry.role && e.entry.correlation_id.as_ref() == Some(cid)
            })
        });
        match existing {
            Some(local) => local.entry = entry,
            None => {
                self.next_local += 1;
                self.entries.push(LocalEntry {
                    local_id: format!("local-{}", self.next_local),
                    entry,
                });
            }
        }
    }

    /// Drop pending bookkeeping for a correlation id that reached `status`.
    pub fn settle(&mut self, correlation_id: &str, status: TaskStatus) {
        if status.is_terminal() {
            self.pending
                .retain(|_, r| r.correlation_id.as_deref() != Some(correlation_id));
        }
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }

    /// Confirmed correlation ids still awaiting a terminal status.
    pub fn pending_correlation_ids(&self) -> Vec<String> {
        self.pending
            .values()
            .filter_map(|r| r.correlation_id.clone())
            .collect()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &PendingRequest> {
        self.pending.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear entries and pending bookkeeping (session reset).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}
