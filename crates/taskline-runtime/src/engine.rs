//! `TimelineEngine`: owns the poll store, the stream consumer, the hydrator
//! and the local optimistic buffer, and republishes the reconciled timeline
//! whenever any of them changes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use taskline_core::hydration::in_session;
use taskline_core::snapshot::{HistoryRecord, TaskRecord, decode_list};
use taskline_core::{
    HydratedResult, HydrationTracker, LocalTimeline, ReconcileInputs, ResetMarkers, TaskStatus,
    TaskStreamBuffer, Timeline, TimelineEntry, passes_reset, reconcile,
};
use taskline_poll::{Fetcher, PollState, SubscriptionHandle, SubscriptionStore};
use taskline_stream::{PushTransport, StreamConsumer};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, DetailFetcher};
use crate::config::EngineConfig;
use crate::hydrator::Hydrator;
use crate::reset_store::{ResetStore, ResetStoreError};

/// The backend collaborators the engine talks to.
pub struct EngineSources {
    pub tasks: Arc<dyn Fetcher>,
    pub history: Arc<dyn Fetcher>,
    pub transport: Arc<dyn PushTransport>,
    pub details: Arc<dyn DetailFetcher>,
}

impl EngineSources {
    pub fn http(api: &ApiClient, config: &EngineConfig) -> Self {
        Self {
            tasks: api.fetcher(&config.tasks_path),
            history: api.fetcher(&config.history_path),
            transport: Arc::new(api.transport(&config.events_path)),
            details: api.detail_fetcher(&config.detail_path),
        }
    }
}

/// Mutable engine state; one lock, never held across network IO.
struct EngineState {
    session_id: Option<String>,
    local: LocalTimeline,
    markers: ResetMarkers,
    tracker: HydrationTracker,
    hydrated: HashMap<String, HydratedResult>,
    version: u64,
}

pub struct TimelineEngine {
    config: EngineConfig,
    store: SubscriptionStore,
    consumer: StreamConsumer,
    hydrator: Hydrator,
    tasks_fetcher: Arc<dyn Fetcher>,
    history_fetcher: Arc<dyn Fetcher>,
    reset_store: ResetStore,
    state: Arc<Mutex<EngineState>>,
    timeline: watch::Sender<Arc<Timeline>>,
    hydrated_changes: Arc<watch::Sender<u64>>,
}

impl TimelineEngine {
    /// Build an engine; reset markers are loaded from `reset_store`.
    pub fn new(
        config: EngineConfig,
        sources: EngineSources,
        reset_store: ResetStore,
        session_id: Option<String>,
    ) -> Result<Self, ResetStoreError> {
        let markers = reset_store.load()?;
        let (timeline, _) = watch::channel(Arc::new(Timeline::empty(Utc::now())));
        let (hydrated_changes, _) = watch::channel(0);

        Ok(Self {
            consumer: StreamConsumer::new(sources.transport, config.auto_close),
            store: SubscriptionStore::new(),
            hydrator: Hydrator::new(sources.details),
            tasks_fetcher: sources.tasks,
            history_fetcher: sources.history,
            reset_store,
            state: Arc::new(Mutex::new(EngineState {
                session_id,
                local: LocalTimeline::new(),
                markers,
                tracker: HydrationTracker::new(),
                hydrated: HashMap::new(),
                version: 0,
            })),
            timeline,
            hydrated_changes: Arc::new(hydrated_changes),
            config,
        })
    }

    /// Latest reconciled timeline.
    pub fn get_timeline(&self) -> Arc<Timeline> {
        self.timeline.borrow().clone()
    }

    pub fn subscribe_timeline(&self) -> watch::Receiver<Arc<Timeline>> {
        self.timeline.subscribe()
    }

    pub async fn session(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// Switch the active session. The hydration visited-set starts over.
    pub async fn set_session(&self, session_id: Option<String>) -> Arc<Timeline> {
        {
            let mut state = self.state.lock().await;
            if state.session_id == session_id {
                drop(state);
                return self.get_timeline();
            }
            tracing::info!(from = ?state.session_id, to = ?session_id, "engine: session changed");
            state.session_id = session_id;
            state.hydrated.clear();
        }
        self.recompute().await
    }

    /// Add an optimistic user prompt. Returns its local id for
    /// [`confirm_prompt`](Self::confirm_prompt).
    pub async fn submit_prompt(&self, content: impl Into<String>) -> String {
        let local_id = self.state.lock().await.local.push_prompt(content, Utc::now());
        self.recompute().await;
        local_id
    }

    /// Attach the server-assigned correlation id; the task is tracked from
    /// the next recomputation on.
    pub async fn confirm_prompt(&self, local_id: &str, correlation_id: &str) -> bool {
        let confirmed = self.state.lock().await.local.confirm(local_id, correlation_id);
        if confirmed {
            self.recompute().await;
        } else {
            tracing::debug!(local_id, "engine: confirm for unknown local id");
        }
        confirmed
    }

    /// Record `now` as the cutover for `session_id`, persist it, and drop
    /// local entries, pending requests and hydration state.
    ///
    /// Nothing changes in memory unless the marker was saved.
    pub async fn reset_session(&self, session_id: &str) -> Result<DateTime<Utc>, ResetStoreError> {
        let marker = {
            let mut state = self.state.lock().await;
            let mut markers = state.markers.clone();
            let marker = markers.mark(session_id, Utc::now());
            self.reset_store.save(&markers)?;
            state.markers = markers;
            state.local.clear();
            state.tracker.reset();
            state.hydrated.clear();
            marker
        };
        tracing::info!(session = session_id, marker = %marker, "engine: session reset");
        self.recompute().await;
        Ok(marker)
    }

    /// Force an immediate fetch of both poll keys.
    pub async fn refresh(&self) {
        self.store.refresh(&self.config.tasks_path).await;
        self.store.refresh(&self.config.history_path).await;
    }

    /// Both poll keys have resolved at least once (data or error).
    pub async fn sources_settled(&self) -> bool {
        let settled = |state: Option<Arc<PollState>>| {
            state.is_some_and(|s| !s.loading && (s.has_data() || s.error.is_some()))
        };
        settled(self.store.state(&self.config.tasks_path).await)
            && settled(self.store.state(&self.config.history_path).await)
    }

    pub async fn subscribe_sources(&self) -> [SubscriptionHandle; 2] {
        let tasks = self
            .store
            .subscribe(
                self.config.tasks_path.clone(),
                Arc::clone(&self.tasks_fetcher),
                self.config.task_poll_interval,
            )
            .await;
        let history = self
            .store
            .subscribe(
                self.config.history_path.clone(),
                Arc::clone(&self.history_fetcher),
                self.config.history_poll_interval,
            )
            .await;
        [tasks, history]
    }

    /// Drive the engine until `cancel` fires: subscribe the poll sources,
    /// then recompute on every poll, stream or hydration change.
    ///
    /// Dropped stream connections are reopened at most once per task poll
    /// interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let handles = self.subscribe_sources().await;
        let mut poll = self.store.changes();
        let mut streams = self.consumer.changes();
        let mut hydrated = self.hydrated_changes.subscribe();
        let period = self.config.task_poll_interval.max(Duration::from_millis(1));
        let mut reopen = tokio::time::interval_at(Instant::now() + period, period);
        reopen.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let session = self.session().await;
        tracing::info!(session = ?session, "engine: started");

        loop {
            self.recompute().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                Ok(()) = poll.changed() => {}
                Ok(()) = streams.changed() => {}
                Ok(()) = hydrated.changed() => {}
                _ = reopen.tick() => self.reopen_dropped().await,
            }
        }

        for handle in handles {
            self.store.unsubscribe(handle).await;
        }
        self.consumer.shutdown().await;
        tracing::info!("engine: stopped");
    }

    /// One reconciliation pass over the current inputs. Also updates the
    /// tracked stream set and starts any planned hydration.
    pub async fn recompute(&self) -> Arc<Timeline> {
        let tasks_state = self.store.state(&self.config.tasks_path).await;
        let history_state = self.store.state(&self.config.history_path).await;
        let tasks: Vec<TaskRecord> = decode_snapshot(&self.config.tasks_path, tasks_state.as_deref());
        let history: Vec<HistoryRecord> =
            decode_snapshot(&self.config.history_path, history_state.as_deref());
        let streams = self.consumer.buffers().await;
        let now = Utc::now();

        let (timeline, track, planned, session) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            absorb_finished_streams(&mut state.local, &streams, now);
            for task in &tasks {
                if let Some(status) = task.status {
                    state.local.settle(&task.correlation_id, status);
                }
            }

            let session = state.session_id.clone();
            let marker = session.as_deref().and_then(|s| state.markers.get(s));
            let local = state.local.entries();
            let entries = reconcile(&ReconcileInputs {
                session_id: session.as_deref(),
                history: &history,
                tasks: &tasks,
                local: &local,
                streams: &streams,
                hydrated: &state.hydrated,
                reset_marker: marker,
            });

            let planned = state.tracker.plan(session.as_deref(), &tasks, &entries, &streams);
            let track = tracked_ids(session.as_deref(), marker, &tasks, &state.local);

            let polls = [tasks_state.as_deref(), history_state.as_deref()];
            state.version += 1;
            let timeline = Timeline {
                entries,
                stale: polls.iter().flatten().any(|s| s.is_stale())
                    || streams.values().any(|b| b.last_error.is_some()),
                retrying: polls.iter().flatten().any(|s| s.is_retrying()),
                computed_at: now,
                version: state.version,
            };
            (timeline, track, planned, session)
        };

        self.consumer.track(track).await;
        if !planned.is_empty() {
            tracing::debug!(count = planned.len(), "engine: hydrating completed tasks");
            self.spawn_hydration(planned, session);
        }

        let timeline = Arc::new(timeline);
        self.timeline.send_replace(Arc::clone(&timeline));
        timeline
    }

    /// Reconnect every tracked stream whose connection failed or was closed
    /// by the server.
    async fn reopen_dropped(&self) {
        let mut reopened = 0usize;
        for task_id in self.consumer.tracked().await {
            if self.consumer.reopen(&task_id).await {
                reopened += 1;
            }
        }
        if reopened > 0 {
            tracing::debug!(reopened, "engine: reopened dropped streams");
        }
    }

    fn spawn_hydration(&self, planned: Vec<String>, session: Option<String>) {
        let hydrator = self.hydrator.clone();
        let state = Arc::clone(&self.state);
        let changes = Arc::clone(&self.hydrated_changes);
        tokio::spawn(async move {
            let results = hydrator.run_pending(planned, session.clone()).await;
            if results.is_empty() {
                return;
            }
            let mut state = state.lock().await;
            if state.session_id != session {
                tracing::debug!("engine: hydration finished after session change, dropped");
                return;
            }
            for result in results {
                state.hydrated.insert(result.correlation_id.clone(), result);
            }
            drop(state);
            changes.send_modify(|generation| *generation = generation.wrapping_add(1));
        });
    }
}

/// Decode a list snapshot, treating a missing or undecodable one as empty.
fn decode_snapshot<T: DeserializeOwned>(key: &str, state: Option<&PollState>) -> Vec<T> {
    let Some(data) = state.and_then(|s| s.data.as_deref()) else {
        return Vec::new();
    };
    match decode_list(data) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(key, error = %e, "engine: snapshot not decodable");
            Vec::new()
        }
    }
}

/// Copy finished stream results into the local buffer, so they survive the
/// stream being untracked once the task snapshot turns terminal.
fn absorb_finished_streams(
    local: &mut LocalTimeline,
    streams: &HashMap<String, TaskStreamBuffer>,
    now: DateTime<Utc>,
) {
    for (cid, buffer) in streams {
        if !buffer.is_terminal() {
            continue;
        }
        local.settle(cid, buffer.status);
        if buffer.has_result() {
            local.upsert(
                TimelineEntry::assistant(buffer.content(), Some(cid.clone()))
                    .at(buffer.last_event_at.unwrap_or(now))
                    .with_status(buffer.status),
            );
        }
    }
}

/// Ids that need a live connection: in-flight tasks of the active session
/// past the reset marker, plus confirmed prompts still awaiting a result.
fn tracked_ids(
    session: Option<&str>,
    marker: Option<DateTime<Utc>>,
    tasks: &[TaskRecord],
    local: &LocalTimeline,
) -> BTreeSet<String> {
    tasks
        .iter()
        .filter(|t| in_session(t.session_id(), session))
        .filter(|t| !t.status.is_some_and(TaskStatus::is_terminal))
        .filter(|t| passes_reset(t.timestamp(), marker))
        .map(|t| t.correlation_id.clone())
        .chain(local.pending_correlation_ids())
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────
