//! Timeline Reconciler: merges poll snapshots, live stream buffers, hydrated
//! results and local optimistic entries into one ordered, deduplicated list.
//!
//! Pure and idempotent. Same inputs always give the same output, and feeding
//! the output back in as the local buffer is a no-op.
//!
//! Pipeline:
//! 1. seed from the local buffer (or the history snapshot) and dedup
//! 2. backfill/append user entries from history
//! 3. backfill/append assistant entries from tasks, then hydrated results
//! 4. overlay live stream buffers
//! 5. reset-boundary filter
//! 6. order by correlation group

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::buffer::TaskStreamBuffer;
use crate::hydration::{HydratedResult, in_session};
use crate::reset::apply_reset;
use crate::snapshot::{HistoryRecord, TaskRecord};
use crate::types::{Role, TaskStatus, TimelineEntry};

/// Everything the Reconciler reads. All borrowed, nothing mutated.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInputs<'a> {
    pub session_id: Option<&'a str>,
    pub history: &'a [HistoryRecord],
    pub tasks: &'a [TaskRecord],
    pub local: &'a [TimelineEntry],
    pub streams: &'a HashMap<String, TaskStreamBuffer>,
    pub hydrated: &'a HashMap<String, HydratedResult>,
    pub reset_marker: Option<DateTime<Utc>>,
}

/// Identity of an entry for dedup purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Correlated(Role, String),
    /// No correlation id yet: content + timestamp stand in for it.
    Loose(Role, String, Option<DateTime<Utc>>),
}

impl EntryKey {
    fn of(entry: &TimelineEntry) -> Self {
        match &entry.correlation_id {
            Some(cid) => Self::Correlated(entry.role, cid.clone()),
            None => Self::Loose(entry.role, entry.content.clone(), entry.timestamp),
        }
    }
}

pub fn reconcile(inputs: &ReconcileInputs<'_>) -> Vec<TimelineEntry> {
    let history: Vec<&HistoryRecord> = inputs
        .history
        .iter()
        .filter(|h| in_session(h.session_id.as_deref(), inputs.session_id))
        .collect();
    let tasks: Vec<&TaskRecord> = inputs
        .tasks
        .iter()
        .filter(|t| in_session(t.session_id(), inputs.session_id))
        .collect();

    let seed: Vec<TimelineEntry> = if inputs.local.is_empty() {
        history.iter().map(|h| user_entry(h)).collect()
    } else {
        inputs.local.to_vec()
    };
    let mut entries = dedup_entries(seed);

    backfill_users(&mut entries, &history);
    backfill_assistants(&mut entries, &tasks);
    overlay_hydrated(&mut entries, inputs.hydrated);
    overlay_streams(&mut entries, inputs.streams);

    let entries = apply_reset(entries, inputs.reset_marker);
    order_entries(entries)
}

// ─── Step 1: dedup ───────────────────────────────────────────────

/// Collapse entries sharing an [`EntryKey`], keeping first-seen position.
/// The survivor is the one with more content; ties go to the later timestamp.
pub fn dedup_entries(entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let mut out: Vec<TimelineEntry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<EntryKey, usize> = HashMap::new();

    for entry in entries {
        let key = EntryKey::of(&entry);
        match index.get(&key) {
            Some(&i) => {
                if prefers(&entry, &out[i]) {
                    out[i] = entry;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// Whether `candidate` should replace `current`.
fn prefers(candidate: &TimelineEntry, current: &TimelineEntry) -> bool {
    let (a, b) = (candidate.content_len(), current.content_len());
    if a != b {
        return a > b;
    }
    candidate.timestamp > current.timestamp
}

// ─── Step 2: user entries from history ───────────────────────────

fn user_entry(record: &HistoryRecord) -> TimelineEntry {
    TimelineEntry {
        timestamp: record.timestamp(),
        ..TimelineEntry::user(record.prompt.clone(), Some(record.correlation_id.clone()))
    }
}

fn backfill_users(entries: &mut Vec<TimelineEntry>, history: &[&HistoryRecord]) {
    let mut by_cid: HashMap<&str, &HistoryRecord> = HashMap::new();
    for record in history {
        by_cid
            .entry(record.correlation_id.as_str())
            .and_modify(|existing| {
                if record.prompt.chars().count() > existing.prompt.chars().count() {
                    *existing = record;
                }
            })
            .or_insert(record);
    }

    let mut present: HashSet<String> = HashSet::new();
    for entry in entries.iter_mut().filter(|e| e.role == Role::User) {
        let Some(cid) = entry.correlation_id.clone() else {
            continue;
        };
        if let Some(record) = by_cid.get(cid.as_str()) {
            if !entry.has_content() {
                entry.content.clone_from(&record.prompt);
            }
            if entry.timestamp.is_none() {
                entry.timestamp = record.timestamp();
            }
        }
        present.insert(cid);
    }

    for record in history {
        if present.insert(record.correlation_id.clone()) {
            let best = by_cid
                .get(record.correlation_id.as_str())
                .copied()
                .unwrap_or(record);
            entries.push(user_entry(best));
        }
    }
}

// ─── Step 3: assistant entries from tasks ────────────────────────

fn assistant_entry(task: &TaskRecord) -> TimelineEntry {
    TimelineEntry {
        timestamp: task.timestamp(),
        pending: task.status.is_some_and(TaskStatus::is_in_flight),
        status: task.status,
        context_used: task.context_used.clone(),
        ..TimelineEntry::assistant(task.result_text(), Some(task.correlation_id.clone()))
    }
}

/// Adopt `incoming` unless that would move a terminal entry back to in-flight.
fn adopt_status(entry: &mut TimelineEntry, incoming: Option<TaskStatus>) {
    let Some(incoming) = incoming else {
        return;
    };
    if entry.status.is_some_and(TaskStatus::is_terminal) && !incoming.is_terminal() {
        return;
    }
    entry.status = Some(incoming);
    entry.pending = incoming.is_in_flight();
}

fn backfill_assistants(entries: &mut Vec<TimelineEntry>, tasks: &[&TaskRecord]) {
    let by_cid: HashMap<&str, &TaskRecord> = tasks
        .iter()
        .map(|t| (t.correlation_id.as_str(), *t))
        .collect();

    let mut present: HashSet<String> = HashSet::new();
    for entry in entries.iter_mut().filter(|e| e.role == Role::Assistant) {
        let Some(cid) = entry.correlation_id.clone() else {
            continue;
        };
        if let Some(task) = by_cid.get(cid.as_str()) {
            if !entry.has_content() && !task.result_text().is_empty() {
                entry.content = task.result_text().to_owned();
            }
            adopt_status(entry, task.status);
            if entry.timestamp.is_none() {
                entry.timestamp = task.timestamp();
            }
            if entry.context_used.is_none() {
                entry.context_used.clone_from(&task.context_used);
            }
        }
        present.insert(cid);
    }

    for task in tasks {
        if present.insert(task.correlation_id.clone()) {
            entries.push(assistant_entry(task));
        }
    }
}

fn overlay_hydrated(entries: &mut Vec<TimelineEntry>, hydrated: &HashMap<String, HydratedResult>) {
    let mut ids: Vec<&String> = hydrated.keys().collect();
    ids.sort();

    for cid in ids {
        let result = &hydrated[cid];
        let existing = entries
            .iter_mut()
            .find(|e| e.role == Role::Assistant && e.correlation_id.as_ref() == Some(cid));
        match existing {
            Some(entry) => {
                if result.content.chars().count() > entry.content_len() {
                    entry.content.clone_from(&result.content);
                    adopt_status(entry, Some(TaskStatus::Completed));
                }
                if entry.timestamp.is_none() {
                    entry.timestamp = result.timestamp;
                }
            }
            None => entries.push(TimelineEntry {
                timestamp: result.timestamp,
                ..TimelineEntry::assistant(result.content.clone(), Some(cid.clone()))
                    .with_status(TaskStatus::Completed)
            }),
        }
    }
}

// ─── Step 4: live stream overlay ─────────────────────────────────

fn overlay_streams(entries: &mut Vec<TimelineEntry>, streams: &HashMap<String, TaskStreamBuffer>) {
    let mut ids: Vec<&String> = streams.keys().collect();
    ids.sort();

    for cid in ids {
        let buffer = &streams[cid];
        let content = buffer.content();
        let existing = entries
            .iter_mut()
            .find(|e| e.role == Role::Assistant && e.correlation_id.as_ref() == Some(cid));
        match existing {
            Some(entry) => {
                if content.chars().count() > entry.content_len() {
                    entry.content = content.to_owned();
                    entry.pending = buffer.status.is_in_flight();
                    entry.status = Some(buffer.status);
                } else if buffer.is_terminal() {
                    adopt_status(entry, Some(buffer.status));
                }
            }
            None => {
                if !content.is_empty() || buffer.status.is_in_flight() {
                    entries.push(TimelineEntry {
                        timestamp: buffer.last_event_at,
                        ..TimelineEntry::assistant(content, Some(cid.clone()))
                            .with_status(buffer.status)
                    });
                }
            }
        }
    }
}

// ─── Step 6: ordering ────────────────────────────────────────────

/// Group by correlation id (user, assistant, then other roles inside a
/// group), order groups by their earliest timestamp, and append entries
/// without a correlation id last, by their own timestamp. Undated groups and
/// entries sort after dated ones; ties keep input order.
pub fn order_entries(entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let mut groups: Vec<(String, Vec<TimelineEntry>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut loose: Vec<TimelineEntry> = Vec::new();

    for entry in entries {
        match entry.correlation_id.clone() {
            Some(cid) => match group_index.get(&cid) {
                Some(&i) => groups[i].1.push(entry),
                None => {
                    group_index.insert(cid.clone(), groups.len());
                    groups.push((cid, vec![entry]));
                }
            },
            None => loose.push(entry),
        }
    }

    for (_, group) in &mut groups {
        group.sort_by_key(|e| e.role.group_rank());
    }
    groups.sort_by_key(|(_, group)| undated_last(group.iter().filter_map(|e| e.timestamp).min()));
    loose.sort_by_key(|e| undated_last(e.timestamp));

    groups
        .into_iter()
        .flat_map(|(_, group)| group)
        .chain(loose)
        .collect()
}

fn undated_last(ts: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (ts.is_none(), ts)
}

// ─── Tests ───────────────────────────────────────────────────────
