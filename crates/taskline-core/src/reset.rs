//! Session reset boundary: per-session cutover markers and the timeline
//! filter they imply.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TimelineEntry;

/// `session id → cutover timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResetMarkers {
    markers: HashMap<String, DateTime<Utc>>,
}

impl ResetMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `now` as the session's cutover. A later reset moves it forward;
    /// an earlier `now` (clock skew) never moves it back.
    pub fn mark(&mut self, session_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let marker = self
            .markers
            .entry(session_id.to_owned())
            .and_modify(|existing| {
                if now > *existing {
                    *existing = now;
                }
            })
            .or_insert(now);
        *marker
    }

    pub fn get(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.markers.get(session_id).copied()
    }

    pub fn clear(&mut self, session_id: &str) -> bool {
        self.markers.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Whether an entry with timestamp `ts` survives the cutover `marker`.
///
/// No marker: everything passes. With a marker: entries strictly earlier are
/// dropped, and so are entries whose timestamp could not be parsed.
pub fn passes_reset(ts: Option<DateTime<Utc>>, marker: Option<DateTime<Utc>>) -> bool {
    match (marker, ts) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(marker), Some(ts)) => ts >= marker,
    }
}

pub fn apply_reset(entries: Vec<TimelineEntry>, marker: Option<DateTime<Utc>>) -> Vec<TimelineEntry> {
    if marker.is_none() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|e| passes_reset(e.timestamp, marker))
        .collect()
}
