// ABOUTME: PushClient facade tying together the registry, reader, writer, and callback pool
// ABOUTME: Lazily-started background tasks (reader, writer, callback pool) behind a simple public API

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::PushConfig;
use crate::error::{PushError, PushResult};
use crate::monitor::{MonitorClient, MonitorDescriptor};
use crate::session::{handshake, Callback, SessionId, SessionIdAllocator, SessionState};
use crate::{callback_pool, reader, writer};

/// The registry entry shared between the client, the writer task, and
/// (read-only, for lookup) the callback pool. The reader task owns its own
/// private map of read halves and reassembly state — this entry only ever
/// carries the write side and the metadata needed to dispatch callbacks.
pub(crate) struct SessionEntry {
    pub monitor_id: u32,
    pub callback: Callback,
    pub write_half: tokio::sync::Mutex<Option<crate::reader::SessionWriteHalf>>,
    pub stopped: AtomicBool,
    /// §3 lifecycle state. `Fresh`/`Handshaking` are pre-registration states
    /// owned by the free `handshake()` call that produces a session's first
    /// transport; no `SessionEntry` exists yet to hold them, so an entry's
    /// state always starts at `Active`. The reader drives `Active -> Failed`
    /// on transport error and then `Failed -> Active` on a successful
    /// restart or `Failed -> Stopped` on a restart whose handshake fails;
    /// `stop_session` drives `-> Stopped` directly.
    pub state: Mutex<SessionState>,
}

/// Shared, briefly-locked (never across an `.await`) map from session id to
/// its registry entry. A `std::sync::Mutex` is appropriate because every
/// critical section here is a plain `HashMap` lookup/insert/remove.
pub(crate) type Registry = Arc<Mutex<HashMap<SessionId, Arc<SessionEntry>>>>;

/// A dispatched, fully-reassembled publish-message payload awaiting a
/// callback worker.
pub(crate) struct CallbackItem {
    pub session_id: SessionId,
    pub block_id: u16,
    pub payload: Bytes,
}

/// Client for the Push protocol: manages monitors over HTTP and maintains
/// long-lived binary push sessions that deliver published events to
/// user-supplied callbacks.
///
/// Background tasks (the single reader, the single writer, and the
/// callback-pool workers) are started lazily on the first call to
/// [`PushClient::create_session`] and run until [`PushClient::stop_all`] is
/// called or the client is dropped.
pub struct PushClient {
    config: Arc<PushConfig>,
    monitor: MonitorClient,
    registry: Registry,
    id_allocator: SessionIdAllocator,
    closed: Arc<AtomicBool>,
    reader_tx: OnceCell<mpsc::UnboundedSender<reader::ReaderCommand>>,
    /// The client's own handle onto the callback queue. Held behind a
    /// `Mutex<Option<_>>` rather than a `OnceCell` so `stop_all` can drop it:
    /// callback workers (`callback_pool::run_worker`) exit only when every
    /// sender is gone, and this is the one sender that otherwise outlives
    /// the reader task that holds the other.
    callback_tx: Mutex<Option<mpsc::Sender<CallbackItem>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PushClient {
    pub fn new(config: PushConfig) -> Self {
        let config = Arc::new(config);
        PushClient {
            monitor: MonitorClient::new(config.clone()),
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            id_allocator: SessionIdAllocator::default(),
            closed: Arc::new(AtomicBool::new(false)),
            reader_tx: OnceCell::new(),
            callback_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a monitor on the server for `topics` and return its id. See
    /// [`MonitorClient::create_monitor`] for the parameter semantics.
    pub async fn create_monitor(&self, descriptor: &MonitorDescriptor) -> PushResult<u32> {
        self.monitor.create_monitor(descriptor).await.map_err(PushError::Http)
    }

    /// Look up an existing monitor by its topic list.
    pub async fn get_monitor(&self, topics: &[String]) -> PushResult<Option<u32>> {
        self.monitor.get_monitor(topics).await.map_err(PushError::Http)
    }

    /// Delete a monitor by id.
    pub async fn delete_monitor(&self, monitor_id: u32) -> PushResult<()> {
        self.monitor.delete_monitor(monitor_id).await.map_err(PushError::Http)
    }

    /// Open a new push session bound to `monitor_id`. `callback` is invoked
    /// with the raw, decompressed payload of each delivered block; returning
    /// `true` acknowledges the block, `false` silently drops it (no
    /// acknowledgement is sent, and the server will retransmit the block).
    pub async fn create_session<F>(&self, monitor_id: u32, callback: F) -> PushResult<SessionId>
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PushError::Closed);
        }

        let transport = handshake(&self.config, monitor_id).await?;
        let (read_half, write_half) = tokio::io::split(transport);

        let id = self.id_allocator.next();
        let entry = Arc::new(SessionEntry {
            monitor_id,
            callback: Arc::new(callback),
            write_half: tokio::sync::Mutex::new(Some(write_half)),
            stopped: AtomicBool::new(false),
            state: Mutex::new(SessionState::Active),
        });
        self.registry.lock().expect("registry mutex poisoned").insert(id, entry);

        self.ensure_tasks_started();
        let reader_tx = self.reader_tx.get().expect("reader task started");
        let _ = reader_tx.send(reader::ReaderCommand::Register(id, read_half));

        info!(session = %id, monitor_id, "session created");
        Ok(id)
    }

    /// Current lifecycle state of a session (§3), or `None` if `id` is
    /// unknown — either never created, or already dropped from the registry
    /// after a restart whose handshake itself failed.
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        let guard = self.registry.lock().expect("registry mutex poisoned");
        guard.get(&id).map(|entry| *entry.state.lock().expect("session state mutex poisoned"))
    }

    /// Stop one session: marks it so the reader will not attempt a restart
    /// and closes its transport.
    pub async fn stop_session(&self, id: SessionId) -> PushResult<()> {
        let entry = {
            let mut guard = self.registry.lock().expect("registry mutex poisoned");
            guard.remove(&id)
        };
        let Some(entry) = entry else {
            return Err(PushError::UnknownSession);
        };
        entry.stopped.store(true, Ordering::SeqCst);
        *entry.state.lock().expect("session state mutex poisoned") = SessionState::Stopped;
        let mut write_half = entry.write_half.lock().await;
        if let Some(half) = write_half.as_mut() {
            let _ = half.shutdown().await;
        }
        *write_half = None;
        if let Some(tx) = self.reader_tx.get() {
            let _ = tx.send(reader::ReaderCommand::Drop(id));
        }
        Ok(())
    }

    /// Stop all sessions and shut down the background tasks. Idempotent.
    ///
    /// Callback workers only return from their queue `recv()` once every
    /// sender has been dropped; the reader task drops its clone when it
    /// exits, but the client's own clone must be dropped explicitly here or
    /// the workers (and this call) would block forever.
    pub async fn stop_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<SessionId> = {
            let guard = self.registry.lock().expect("registry mutex poisoned");
            guard.keys().copied().collect()
        };
        for id in ids {
            let _ = self.stop_session(id).await;
        }
        self.callback_tx.lock().expect("callback_tx mutex poisoned").take();
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("tasks mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn ensure_tasks_started(&self) {
        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        if !tasks.is_empty() {
            return;
        }

        let (reader_tx, reader_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (callback_tx, callback_rx) = mpsc::channel(self.config.workers.max(1));
        let _ = self.reader_tx.set(reader_tx);
        let reader_callback_tx = callback_tx.clone();
        *self.callback_tx.lock().expect("callback_tx mutex poisoned") = Some(callback_tx);

        tasks.push(tokio::spawn(reader::run(
            self.registry.clone(),
            self.config.clone(),
            reader_rx,
            reader_callback_tx,
            self.closed.clone(),
        )));

        tasks.push(tokio::spawn(writer::run(self.registry.clone(), write_rx, self.closed.clone())));

        let shared_callback_rx = Arc::new(tokio::sync::Mutex::new(callback_rx));
        for worker in 0..self.config.workers.max(1) {
            tasks.push(tokio::spawn(callback_pool::run_worker(
                worker,
                self.registry.clone(),
                shared_callback_rx.clone(),
                write_tx.clone(),
            )));
        }
    }
}
