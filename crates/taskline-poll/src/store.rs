//! `SubscriptionStore`: keyed cache + shared timers.
//!
//! Locking: one `tokio::sync::Mutex` guards every key. It is never held
//! across a fetch; fetches run in their own tasks and re-lock to apply.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use taskline_core::FetchError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::fetcher::Fetcher;
use crate::state::PollState;

/// How long a key stays suspended after a transient-unavailable response.
pub const SUSPENSION_WINDOW: Duration = Duration::from_secs(15);

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A live subscription. Pass it back to [`SubscriptionStore::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: String,
    id: u64,
    rx: watch::Receiver<Arc<PollState>>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current shared state of the key.
    pub fn state(&self) -> Arc<PollState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change. `false` once the key is evicted.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

struct Timer {
    period: Duration,
    task: JoinHandle<()>,
}

/// Identifies one request: the key entry that issued it and its order
/// within that entry.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    seq: u64,
}

struct KeyEntry {
    fetcher: Arc<dyn Fetcher>,
    /// Unique per entry; an evicted-then-recreated key gets a new one.
    epoch: u64,
    /// handle id → requested interval
    subscribers: BTreeMap<u64, Duration>,
    state: watch::Sender<Arc<PollState>>,
    timer: Option<Timer>,
    in_flight: u32,
    next_seq: u64,
    applied_seq: u64,
    suspended_until: Option<Instant>,
}

impl KeyEntry {
    fn new(fetcher: Arc<dyn Fetcher>, epoch: u64) -> Self {
        let (state, _) = watch::channel(Arc::new(PollState::default()));
        Self {
            fetcher,
            epoch,
            subscribers: BTreeMap::new(),
            state,
            timer: None,
            in_flight: 0,
            next_seq: 0,
            applied_seq: 0,
            suspended_until: None,
        }
    }

    fn min_interval(&self) -> Option<Duration> {
        self.subscribers.values().min().copied()
    }

    fn current(&self) -> Arc<PollState> {
        self.state.borrow().clone()
    }

    fn publish(&self, next: PollState) {
        self.state.send_replace(Arc::new(next));
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }

    fn is_suspended(&self, now: Instant) -> bool {
        self.suspended_until.is_some_and(|until| now < until)
    }

    /// Start a fetch unconditionally.
    fn begin_fetch(&mut self) -> Ticket {
        self.in_flight += 1;
        self.next_seq += 1;
        let mut next = (*self.current()).clone();
        next.loading = true;
        self.publish(next);
        Ticket {
            epoch: self.epoch,
            seq: self.next_seq,
        }
    }

    /// Start a scheduled fetch unless one is in flight or the key is
    /// suspended.
    fn try_begin(&mut self, now: Instant) -> Option<Ticket> {
        if self.in_flight > 0 {
            return None;
        }
        if self.is_suspended(now) {
            return None;
        }
        self.suspended_until = None;
        Some(self.begin_fetch())
    }
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, KeyEntry>,
    next_handle: u64,
    next_epoch: u64,
}

/// The Poll Multiplexer. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SubscriptionStore {
    inner: Arc<Mutex<Inner>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes: Arc::new(changes),
        }
    }

    /// Subscribe to `key`. The first subscriber of a key triggers an
    /// immediate fetch; later ones join the shared timer, speeding it up if
    /// they ask for a shorter interval.
    ///
    /// A resubscribe after the last unsubscribe sees the cached state at once
    /// and replaces the key's fetcher.
    pub async fn subscribe(
        &self,
        key: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        interval: Duration,
    ) -> SubscriptionHandle {
        let key = key.into();
        let interval = interval.max(MIN_INTERVAL);

        let mut inner = self.inner.lock().await;
        inner.next_handle += 1;
        let id = inner.next_handle;
        if !inner.keys.contains_key(&key) {
            inner.next_epoch += 1;
        }
        let epoch = inner.next_epoch;

        let entry = inner
            .keys
            .entry(key.clone())
            .or_insert_with(|| KeyEntry::new(Arc::clone(&fetcher), epoch));
        let first = entry.subscribers.is_empty();
        if first {
            entry.fetcher = fetcher;
        }
        entry.subscribers.insert(id, interval);
        let rx = entry.state.subscribe();

        let immediate = if first {
            entry
                .try_begin(Instant::now())
                .map(|ticket| (Arc::clone(&entry.fetcher), ticket))
        } else {
            None
        };
        self.retime(&key, entry);
        let subscribers = entry.subscribers.len();
        drop(inner);

        tracing::debug!(key = %key, handle = id, interval_ms = interval.as_millis() as u64, subscribers, "poll: subscribed");

        if let Some((fetcher, ticket)) = immediate {
            self.spawn_fetch(key.clone(), fetcher, ticket);
        }
        self.bump();

        SubscriptionHandle { key, id, rx }
    }

    /// Drop a subscriber. The last one out stops the key's timer; cached
    /// state stays until [`evict`](Self::evict). In-flight requests are not
    /// aborted.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.keys.get_mut(&handle.key) else {
            return;
        };
        if entry.subscribers.remove(&handle.id).is_none() {
            return;
        }
        self.retime(&handle.key, entry);
        if entry.subscribers.is_empty() {
            tracing::debug!(key = %handle.key, "poll: last subscriber left, timer stopped");
        }
    }

    /// Fetch `key` now, clearing any suspension. Returns `false` for an
    /// unknown key.
    pub async fn refresh(&self, key: &str) -> bool {
        let begun = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.keys.get_mut(key) else {
                return false;
            };
            entry.suspended_until = None;
            (Arc::clone(&entry.fetcher), entry.begin_fetch())
        };
        tracing::debug!(key, "poll: manual refresh");
        let (fetcher, ticket) = begun;
        self.spawn_fetch(key.to_owned(), fetcher, ticket);
        self.bump();
        true
    }

    pub async fn state(&self, key: &str) -> Option<Arc<PollState>> {
        let inner = self.inner.lock().await;
        inner.keys.get(key).map(KeyEntry::current)
    }

    pub async fn subscriber_count(&self, key: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.keys.get(key).map_or(0, |e| e.subscribers.len())
    }

    /// Forget a key entirely: timer, cache and subscribers. Responses still
    /// in flight for it are dropped on arrival, even if the key has been
    /// subscribed again since.
    pub async fn evict(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.keys.remove(key)
        };
        match removed {
            Some(mut entry) => {
                entry.stop_timer();
                tracing::debug!(key, "poll: evicted");
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Stop every timer and drop every key.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for (_, mut entry) in inner.keys.drain() {
            entry.stop_timer();
        }
        tracing::debug!("poll: store shut down");
    }

    /// Generation counter, bumped on every state change of any key.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn bump(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Bring the key's timer in line with its fastest subscriber, or stop it
    /// when nobody is left.
    fn retime(&self, key: &str, entry: &mut KeyEntry) {
        let Some(period) = entry.min_interval() else {
            entry.stop_timer();
            return;
        };
        if entry.timer.as_ref().is_some_and(|t| t.period == period) {
            return;
        }
        entry.stop_timer();
        let store = self.clone();
        let key = key.to_owned();
        let task = tokio::spawn(async move { store.run_timer(key, period).await });
        entry.timer = Some(Timer { period, task });
    }

    async fn run_timer(self, key: String, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick(&key).await;
        }
    }

    async fn tick(&self, key: &str) {
        let begun = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.keys.get_mut(key) else {
                return;
            };
            match entry.try_begin(Instant::now()) {
                Some(ticket) => (Arc::clone(&entry.fetcher), ticket),
                None => {
                    tracing::debug!(key, in_flight = entry.in_flight, "poll: tick skipped");
                    return;
                }
            }
        };
        let (fetcher, ticket) = begun;
        self.spawn_fetch(key.to_owned(), fetcher, ticket);
        self.bump();
    }

    fn spawn_fetch(&self, key: String, fetcher: Arc<dyn Fetcher>, ticket: Ticket) {
        let store = self.clone();
        let request = fetcher.fetch();
        tokio::spawn(async move {
            let result = request.await;
            store.apply(&key, ticket, result).await;
        });
    }

    async fn apply(&self, key: &str, ticket: Ticket, result: Result<Value, FetchError>) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.keys.get_mut(key).filter(|e| e.epoch == ticket.epoch) else {
            tracing::debug!(key, seq = ticket.seq, "poll: response for evicted key dropped");
            return;
        };
        let seq = ticket.seq;
        entry.in_flight = entry.in_flight.saturating_sub(1);
        let prev = entry.current();
        let loading = entry.in_flight > 0;

        if seq < entry.applied_seq {
            tracing::debug!(key, seq, applied = entry.applied_seq, "poll: out-of-order response discarded");
            if prev.loading != loading {
                entry.publish(PollState {
                    loading,
                    ..(*prev).clone()
                });
            }
            return;
        }
        entry.applied_seq = seq;

        let next = match result {
            Ok(value) => {
                entry.suspended_until = None;
                PollState {
                    data: Some(Arc::new(value)),
                    loading,
                    error: None,
                    suspended: false,
                    updated_at: Some(Utc::now()),
                }
            }
            Err(err) if err.is_transient() => {
                entry.suspended_until = Some(Instant::now() + SUSPENSION_WINDOW);
                tracing::warn!(key, error = %err, window_secs = SUSPENSION_WINDOW.as_secs(), "poll: backend unavailable, suspending");
                PollState {
                    data: prev.data.clone(),
                    loading,
                    error: Some(format!(
                        "service unavailable, retry in {}s",
                        SUSPENSION_WINDOW.as_secs()
                    )),
                    suspended: true,
                    updated_at: prev.updated_at,
                }
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "poll: fetch failed");
                PollState {
                    data: prev.data.clone(),
                    loading,
                    error: Some(err.to_string()),
                    suspended: false,
                    updated_at: prev.updated_at,
                }
            }
        };
        entry.publish(next);
        drop(inner);
        self.bump();
    }
}

// ─── Tests ───────────────────────────────────────────────────────
