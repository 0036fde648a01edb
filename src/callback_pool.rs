// ABOUTME: Fixed-size pool of callback worker tasks fed by a shared bounded queue
// ABOUTME: Queue capacity equals worker count, giving the reader intentional back-pressure

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use crate::client::{CallbackItem, Registry};
use crate::codec::PublishMessageReceived;
use crate::session::SessionId;

/// Shared receiving end of the callback queue. `tokio::sync::mpsc::Receiver`
/// is single-consumer, so every worker locks the same mutex-guarded
/// receiver to pull its next item — contention is the point: it's how N
/// workers divide one ordered queue.
pub type SharedCallbackReceiver = Arc<Mutex<mpsc::Receiver<CallbackItem>>>;

/// Runs one callback worker until the queue is closed. `worker_index` is
/// used only for logging.
pub async fn run_worker(
    worker_index: usize,
    registry: Registry,
    queue: SharedCallbackReceiver,
    write_tx: mpsc::UnboundedSender<(SessionId, Bytes)>,
) {
    loop {
        let item = {
            let mut guard = queue.lock().await;
            guard.recv().await
        };
        let Some(item) = item else {
            debug!(worker_index, "callback queue closed, worker exiting");
            return;
        };

        let callback = {
            let guard = registry.lock().expect("registry mutex poisoned");
            guard.get(&item.session_id).map(|entry| entry.callback.clone())
        };
        let Some(callback) = callback else {
            debug!(session = %item.session_id, "dropping callback dispatch for unknown session");
            continue;
        };

        let payload = item.payload.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&payload)));

        match outcome {
            Ok(true) => {
                let ack = PublishMessageReceived::ok(item.block_id).encode();
                let _ = write_tx.send((item.session_id, ack));
            }
            Ok(false) => {
                debug!(session = %item.session_id, block_id = item.block_id, "callback declined block, no ack sent");
            }
            Err(_) => {
                error!(
                    session = %item.session_id,
                    block_id = item.block_id,
                    worker_index,
                    "callback panicked, no ack sent"
                );
            }
        }
    }
}
