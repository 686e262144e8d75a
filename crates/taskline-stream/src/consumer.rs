//! `StreamConsumer`: the tracked-id set, its connections and buffers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use taskline_core::{StreamError, StreamEvent, TaskStreamBuffer, parse_event};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::PushTransport;

struct Connection {
    /// Distinguishes a reopened connection from the task it replaced.
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Connection {
    fn close(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[derive(Default)]
struct Inner {
    tracked: HashSet<String>,
    buffers: HashMap<String, TaskStreamBuffer>,
    connections: HashMap<String, Connection>,
    next_generation: u64,
}

impl Inner {
    /// Whether `generation` is still the live connection for `task_id`.
    fn is_current(&self, task_id: &str, generation: u64) -> bool {
        self.connections
            .get(task_id)
            .is_some_and(|c| c.generation == generation)
    }

    fn drop_connection(&mut self, task_id: &str, generation: u64) {
        if self.is_current(task_id, generation) {
            self.connections.remove(task_id);
        }
    }
}

/// The Stream Consumer. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct StreamConsumer {
    inner: Arc<Mutex<Inner>>,
    transport: Arc<dyn PushTransport>,
    auto_close: bool,
    changes: Arc<watch::Sender<u64>>,
}

impl StreamConsumer {
    pub fn new(transport: Arc<dyn PushTransport>, auto_close: bool) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            transport,
            auto_close,
            changes: Arc::new(changes),
        }
    }

    /// Make the tracked set exactly `ids`.
    ///
    /// Newly tracked ids get a fresh buffer and a connection. Ids no longer
    /// tracked lose their connection and their buffer at once. A
    /// still-tracked id whose connection dropped stays disconnected; see
    /// [`reopen`](Self::reopen).
    pub async fn track<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: HashSet<String> = ids.into_iter().map(Into::into).collect();
        let mut changed = false;
        let mut inner = self.inner.lock().await;

        let gone: Vec<String> = inner.tracked.difference(&wanted).cloned().collect();
        for task_id in gone {
            inner.tracked.remove(&task_id);
            inner.buffers.remove(&task_id);
            if let Some(conn) = inner.connections.remove(&task_id) {
                conn.close();
            }
            tracing::info!(task_id = %task_id, "stream: untracked, connection closed");
            changed = true;
        }

        for task_id in wanted {
            if !inner.tracked.insert(task_id.clone()) {
                continue;
            }
            inner
                .buffers
                .insert(task_id.clone(), TaskStreamBuffer::new(task_id.clone()));
            self.open(&mut inner, &task_id);
            changed = true;
        }
        drop(inner);

        if changed {
            self.bump();
        }
    }

    /// Open a new connection for a tracked id whose previous one failed or
    /// was closed by the server. The buffer is kept. Returns `false` when
    /// the id is untracked, still connected, or its buffer is terminal.
    pub async fn reopen(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.tracked.contains(task_id) || inner.connections.contains_key(task_id) {
            return false;
        }
        if inner.buffers.get(task_id).is_some_and(TaskStreamBuffer::is_terminal) {
            return false;
        }
        tracing::info!(task_id, "stream: reopening");
        self.open(&mut inner, task_id);
        drop(inner);
        self.bump();
        true
    }

    fn open(&self, inner: &mut Inner, task_id: &str) {
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run_connection(
            task_id.to_owned(),
            generation,
            cancel.clone(),
        ));
        inner.connections.insert(
            task_id.to_owned(),
            Connection {
                generation,
                cancel,
                task,
            },
        );
        tracing::info!(task_id, generation, "stream: opening connection");
    }

    /// Snapshot of every tracked buffer.
    pub async fn buffers(&self) -> HashMap<String, TaskStreamBuffer> {
        self.inner.lock().await.buffers.clone()
    }

    pub async fn buffer(&self, task_id: &str) -> Option<TaskStreamBuffer> {
        self.inner.lock().await.buffers.get(task_id).cloned()
    }

    /// A connection is open (or opening) for `task_id`.
    pub async fn is_connected(&self, task_id: &str) -> bool {
        self.inner.lock().await.connections.contains_key(task_id)
    }

    pub async fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.tracked.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Generation counter, bumped whenever any buffer or connection changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Close every connection and forget every buffer.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for (_, conn) in inner.connections.drain() {
            conn.close();
        }
        inner.tracked.clear();
        inner.buffers.clear();
        drop(inner);
        tracing::debug!("stream: consumer shut down");
        self.bump();
    }

    fn bump(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    async fn run_connection(self, task_id: String, generation: u64, cancel: CancellationToken) {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.transport.open(&task_id) => opened,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(e) => {
                self.transport_failed(&task_id, generation, &e).await;
                return;
            }
        };
        self.mark_open(&task_id, generation).await;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return,
                frame = frames.next() => frame,
            };
            match frame {
                Some(Ok(frame)) => match parse_event(frame.event.as_deref(), &frame.data) {
                    Ok(event) => {
                        if self.apply(&task_id, generation, &event).await {
                            tracing::info!(task_id = %task_id, kind = event.kind.as_str(), "stream: auto-closed");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(task_id = %task_id, error = %e, "stream: frame dropped");
                    }
                },
                Some(Err(e)) => {
                    self.transport_failed(&task_id, generation, &e).await;
                    return;
                }
                None => {
                    self.server_closed(&task_id, generation).await;
                    return;
                }
            }
        }
    }

    async fn mark_open(&self, task_id: &str, generation: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(task_id, generation) {
            return;
        }
        if let Some(buffer) = inner.buffers.get_mut(task_id) {
            buffer.mark_connected();
        }
        drop(inner);
        tracing::debug!(task_id, "stream: connected");
        self.bump();
    }

    /// Fold one event in. Returns `true` when the connection should end.
    async fn apply(&self, task_id: &str, generation: u64, event: &StreamEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(task_id, generation) {
            return true;
        }
        let Some(buffer) = inner.buffers.get_mut(task_id) else {
            return true;
        };
        let outcome = buffer.apply(event, Utc::now(), self.auto_close);
        if outcome.should_close {
            inner.drop_connection(task_id, generation);
        }
        drop(inner);
        if outcome.changed {
            self.bump();
        }
        outcome.should_close
    }

    async fn transport_failed(&self, task_id: &str, generation: u64, error: &StreamError) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(task_id, generation) {
            return;
        }
        inner.drop_connection(task_id, generation);
        if let Some(buffer) = inner.buffers.get_mut(task_id) {
            buffer.mark_transport_error(error.to_string());
        }
        drop(inner);
        tracing::warn!(task_id, error = %error, "stream: connection failed");
        self.bump();
    }

    async fn server_closed(&self, task_id: &str, generation: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(task_id, generation) {
            return;
        }
        inner.drop_connection(task_id, generation);
        if let Some(buffer) = inner.buffers.get_mut(task_id) {
            buffer.mark_closed();
        }
        drop(inner);
        tracing::info!(task_id, "stream: server closed connection");
        self.bump();
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use taskline_core::TaskStatus;
    use tokio::sync::mpsc;

    use crate::transport::{FrameStream, RawFrame};

    // ── Fake transport ───────────────────────────────────────────────

    type FrameTx = mpsc::UnboundedSender<Result<RawFrame, StreamError>>;

    #[derive(Default)]
    struct FakeState {
        /// Every connection ever opened per id, oldest first.
        senders: HashMap<String, Vec<FrameTx>>,
        opens: HashMap<String, usize>,
        refuse: HashSet<String>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        state: Arc<std::sync::Mutex<FakeState>>,
    }

    impl FakeTransport {
        fn opens(&self, id: &str) -> usize {
            self.state.lock().expect("fake lock").opens.get(id).copied().unwrap_or(0)
        }

        fn refuse(&self, id: &str) {
            self.state.lock().expect("fake lock").refuse.insert(id.to_owned());
        }

        /// Send on the newest connection for `id`.
        fn send(&self, id: &str, frame: Result<RawFrame, StreamError>) {
            let state = self.state.lock().expect("fake lock");
            if let Some(tx) = state.senders.get(id).and_then(|all| all.last()) {
                let _ = tx.send(frame);
            }
        }

        /// Send on the `nth` connection ever opened for `id`.
        fn send_on(&self, id: &str, nth: usize, name: &str, data: &str) {
            let state = self.state.lock().expect("fake lock");
            if let Some(tx) = state.senders.get(id).and_then(|all| all.get(nth)) {
                let _ = tx.send(Ok(RawFrame::new(name, data)));
            }
        }

        fn event(&self, id: &str, name: &str, data: &str) {
            self.send(id, Ok(RawFrame::new(name, data)));
        }

        /// Drop the server side so the stream ends.
        fn hang_up(&self, id: &str) {
            self.state.lock().expect("fake lock").senders.remove(id);
        }
    }

    impl PushTransport for FakeTransport {
        fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream, StreamError>> {
            let mut state = self.state.lock().expect("fake lock");
            *state.opens.entry(task_id.to_owned()).or_default() += 1;
            if state.refuse.contains(task_id) {
                return async { Err(StreamError::Transport("connection refused".into())) }.boxed();
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.senders.entry(task_id.to_owned()).or_default().push(tx);
            let frames: FrameStream =
                futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|f| (f, rx)) })
                    .boxed();
            async move { Ok(frames) }.boxed()
        }
    }

    fn consumer(auto_close: bool) -> (StreamConsumer, FakeTransport) {
        let transport = FakeTransport::default();
        (StreamConsumer::new(Arc::new(transport.clone()), auto_close), transport)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ── Tracking ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn one_connection_per_tracked_id() {
        let (consumer, transport) = consumer(true);
        consumer.track(["a", "b"]).await;
        consumer.track(["a", "b"]).await;
        settle().await;

        assert_eq!(transport.opens("a"), 1);
        assert_eq!(transport.opens("b"), 1);
        assert!(consumer.is_connected("a").await);
        let buffer = consumer.buffer("a").await.expect("buffer");
        assert!(buffer.connected);
        assert_eq!(consumer.tracked().await, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn untrack_closes_and_drops_buffer() {
        let (consumer, transport) = consumer(true);
        consumer.track(["a", "b"]).await;
        settle().await;
        transport.event("b", "update", r#"{"result":"partial"}"#);
        settle().await;

        consumer.track(["a"]).await;
        assert!(consumer.buffer("b").await.is_none());
        assert!(!consumer.is_connected("b").await);

        transport.event("b", "update", r#"{"result":"late"}"#);
        settle().await;
        assert!(consumer.buffer("b").await.is_none());
    }

    // ── Events ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn update_events_fold_into_buffer() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;

        transport.event("abc", "update", r#"{"status":"PROCESSING","logs":["l1"],"result":"He"}"#);
        transport.event("abc", "update", r#"{"logs":["l1","l2"],"result":"Hello"}"#);
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert_eq!(buffer.status, TaskStatus::Processing);
        assert_eq!(buffer.logs, vec!["l1", "l2"]);
        assert_eq!(buffer.content(), "Hello");
        assert!(buffer.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_auto_closes() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;

        transport.event("abc", "finished", r#"{"status":"COMPLETED","result":"Hello"}"#);
        settle().await;

        assert!(!consumer.is_connected("abc").await);
        let buffer = consumer.buffer("abc").await.expect("buffer kept");
        assert!(!buffer.connected);
        assert_eq!(buffer.status, TaskStatus::Completed);

        consumer.track(["abc"]).await;
        settle().await;
        assert_eq!(transport.opens("abc"), 1, "terminal buffers are not reopened");
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_stays_open_without_auto_close() {
        let (consumer, transport) = consumer(false);
        consumer.track(["abc"]).await;
        settle().await;

        transport.event("abc", "update", r#"{"status":"COMPLETED"}"#);
        settle().await;
        assert!(consumer.is_connected("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_dropped() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;

        transport.event("abc", "update", "{not json");
        transport.event("abc", "bogus", "{}");
        transport.event("abc", "update", r#"{"result":"ok"}"#);
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert_eq!(buffer.content(), "ok");
        assert!(buffer.last_error.is_none());
        assert!(consumer.is_connected("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_only_touches_liveness() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;

        transport.event("abc", "heartbeat", r#"{"runtime":{"model":"m-1"}}"#);
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert!(buffer.heartbeat_at.is_some());
        assert!(buffer.last_event_at.is_none());
        assert_eq!(buffer.runtime.model.as_deref(), Some("m-1"));
    }

    // ── Transport failures ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn transport_error_disconnects_without_reconnect() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;
        transport.event("abc", "update", r#"{"result":"kept"}"#);
        transport.send("abc", Err(StreamError::Transport("connection reset".into())));
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert!(!buffer.connected);
        assert_eq!(buffer.last_error.as_deref(), Some("stream transport error: connection reset"));
        assert_eq!(buffer.content(), "kept");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens("abc"), 1);

        consumer.track(["abc"]).await;
        settle().await;
        assert_eq!(transport.opens("abc"), 1, "tracking again does not reconnect");

        assert!(consumer.reopen("abc").await);
        assert!(!consumer.reopen("abc").await, "already connected");
        settle().await;
        assert_eq!(transport.opens("abc"), 2);
        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert!(buffer.connected);
        assert_eq!(buffer.content(), "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_skips_untracked_and_terminal() {
        let (consumer, transport) = consumer(true);
        assert!(!consumer.reopen("abc").await);

        consumer.track(["abc"]).await;
        settle().await;
        transport.event("abc", "finished", r#"{"status":"COMPLETED","result":"done"}"#);
        settle().await;
        assert!(!consumer.reopen("abc").await);
        assert_eq!(transport.opens("abc"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_open_is_not_retried_by_track() {
        let (consumer, transport) = consumer(true);
        transport.refuse("abc");
        for _ in 0..5 {
            consumer.track(["abc"]).await;
            settle().await;
        }
        assert_eq!(transport.opens("abc"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_connection_cannot_write() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;
        consumer.track(Vec::<String>::new()).await;
        consumer.track(["abc"]).await;
        settle().await;
        assert_eq!(transport.opens("abc"), 2);

        transport.send_on("abc", 0, "update", r#"{"result":"from old connection"}"#);
        settle().await;
        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert_eq!(buffer.content(), "");
        assert!(buffer.connected);

        transport.send_on("abc", 1, "update", r#"{"result":"from new connection"}"#);
        settle().await;
        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert_eq!(buffer.content(), "from new connection");
    }

    #[tokio::test(start_paused = true)]
    async fn refused_open_records_error() {
        let (consumer, transport) = consumer(true);
        transport.refuse("abc");
        consumer.track(["abc"]).await;
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert!(!buffer.connected);
        assert!(buffer.last_error.is_some());
        assert!(!consumer.is_connected("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn server_hang_up_marks_closed() {
        let (consumer, transport) = consumer(true);
        consumer.track(["abc"]).await;
        settle().await;
        transport.hang_up("abc");
        settle().await;

        let buffer = consumer.buffer("abc").await.expect("buffer");
        assert!(!buffer.connected);
        assert!(buffer.last_error.is_none());
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn changes_and_shutdown() {
        let (consumer, transport) = consumer(true);
        let mut changes = consumer.changes();
        changes.borrow_and_update();

        consumer.track(["abc"]).await;
        settle().await;
        transport.event("abc", "update", r#"{"result":"x"}"#);
        settle().await;
        assert!(changes.has_changed().expect("sender alive"));

        consumer.shutdown().await;
        assert!(consumer.buffers().await.is_empty());
        assert!(!consumer.is_connected("abc").await);
    }
}
