// ABOUTME: Single writer task draining the outbound frame queue
// ABOUTME: Owns no sockets directly; reaches each session's write half through the shared registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::Registry;
use crate::session::SessionId;

/// How long the writer waits on an empty queue before re-checking the
/// closed flag, matching the 100ms poll cadence used by the reader.
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs until `closed` is set and the queue is drained, or until the sending
/// half of `queue` is dropped. Writes that target an unknown or
/// transport-less session are logged and discarded: recovery is the
/// reader's job (it owns the restart decision), not the writer's.
pub async fn run(registry: Registry, mut queue: mpsc::UnboundedReceiver<(SessionId, Bytes)>, closed: Arc<AtomicBool>) {
    loop {
        if closed.load(Ordering::SeqCst) && queue.is_empty() {
            break;
        }

        let item = tokio::time::timeout(WRITER_POLL_INTERVAL, queue.recv()).await;
        let (id, bytes) = match item {
            Ok(Some(pair)) => pair,
            Ok(None) => break,
            Err(_elapsed) => continue,
        };

        let entry = { registry.lock().expect("registry mutex poisoned").get(&id).cloned() };
        let Some(entry) = entry else {
            debug!(session = %id, "dropping write for unknown session");
            continue;
        };

        let mut write_half = entry.write_half.lock().await;
        let Some(half) = write_half.as_mut() else {
            debug!(session = %id, "dropping write: session has no live transport");
            continue;
        };

        if let Err(e) = half.write_all(&bytes).await {
            warn!(session = %id, error = %e, "write failed, marking transport dead");
            *write_half = None;
            continue;
        }
        if let Err(e) = half.flush().await {
            warn!(session = %id, error = %e, "flush failed, marking transport dead");
            *write_half = None;
        }
    }
}
