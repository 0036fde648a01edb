// ABOUTME: Single reader task multiplexing all session sockets with an async select
// ABOUTME: Owns the reassembly buffers exclusively (Invariant 1); restarts sessions on read failure

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::{CallbackItem, Registry};
use crate::codec::{CodecError, FrameHeader, FrameType, PublishMessage, HEADER_SIZE};
use crate::config::PushConfig;
use crate::session::{handshake, ReceiveState, SessionId, SessionState};
use crate::transport::Transport;

/// Write half stashed in the shared registry entry; read by the writer task.
pub type SessionWriteHalf = WriteHalf<Transport>;
type SessionReadHalf = ReadHalf<Transport>;

/// How long a reader iteration waits with no data ready before re-checking
/// the closed flag and pending commands (§4.4).
const READER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Messages the client (or the reader itself, on restart) uses to mutate the
/// reader's private session map.
pub enum ReaderCommand {
    Register(SessionId, SessionReadHalf),
    Drop(SessionId),
}

struct ReaderSession {
    read_half: SessionReadHalf,
    state: ReceiveState,
}

enum ReadEvent {
    Data(SessionId),
    Closed(SessionId),
    Error(SessionId, io::Error),
    Timeout,
}

/// Runs the reader loop until `closed` is set and no sessions remain.
pub async fn run(
    registry: Registry,
    config: Arc<PushConfig>,
    mut commands: mpsc::UnboundedReceiver<ReaderCommand>,
    callback_tx: mpsc::Sender<CallbackItem>,
    closed: Arc<AtomicBool>,
) {
    let mut sessions: HashMap<SessionId, Arc<Mutex<ReaderSession>>> = HashMap::new();

    loop {
        while let Ok(cmd) = commands.try_recv() {
            apply_command(&mut sessions, cmd);
        }

        if closed.load(Ordering::SeqCst) && sessions.is_empty() {
            break;
        }

        if sessions.is_empty() {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => apply_command(&mut sessions, cmd),
                    None if closed.load(Ordering::SeqCst) => break,
                    None => {}
                },
                _ = tokio::time::sleep(READER_POLL_INTERVAL) => {}
            }
            continue;
        }

        let mut futures: Vec<Pin<Box<dyn Future<Output = ReadEvent> + Send>>> = Vec::with_capacity(sessions.len() + 1);
        for (&id, session) in sessions.iter() {
            let session = session.clone();
            futures.push(Box::pin(async move {
                let mut guard = session.lock().await;
                let mut scratch = [0u8; READ_CHUNK];
                match guard.read_half.read(&mut scratch).await {
                    Ok(0) => ReadEvent::Closed(id),
                    Ok(n) => {
                        guard.state.buffer.extend_from_slice(&scratch[..n]);
                        ReadEvent::Data(id)
                    }
                    Err(e) => ReadEvent::Error(id, e),
                }
            }));
        }
        futures.push(Box::pin(async {
            tokio::time::sleep(READER_POLL_INTERVAL).await;
            ReadEvent::Timeout
        }));

        let (event, _idx, _rest) = futures::future::select_all(futures).await;
        match event {
            ReadEvent::Timeout => continue,
            ReadEvent::Data(id) => {
                if let Some(session) = sessions.get(&id).cloned() {
                    drain_frames(id, session, &callback_tx).await;
                }
            }
            ReadEvent::Closed(id) => {
                debug!(session = %id, "peer closed connection, restarting");
                sessions.remove(&id);
                restart_session(id, &registry, &config, &mut sessions).await;
            }
            ReadEvent::Error(id, e) => {
                warn!(session = %id, error = %e, "read error, restarting");
                sessions.remove(&id);
                restart_session(id, &registry, &config, &mut sessions).await;
            }
        }
    }
}

fn apply_command(sessions: &mut HashMap<SessionId, Arc<Mutex<ReaderSession>>>, cmd: ReaderCommand) {
    match cmd {
        ReaderCommand::Register(id, read_half) => {
            sessions.insert(id, Arc::new(Mutex::new(ReaderSession { read_half, state: ReceiveState::new() })));
        }
        ReaderCommand::Drop(id) => {
            sessions.remove(&id);
        }
    }
}

/// Pull as many complete frames as are currently buffered out of `session`
/// and dispatch each `PublishMessage` to the callback pool. Non-publish
/// frames arriving on a session socket are logged and ignored.
async fn drain_frames(id: SessionId, session: Arc<Mutex<ReaderSession>>, callback_tx: &mpsc::Sender<CallbackItem>) {
    loop {
        let frame = {
            let mut guard = session.lock().await;
            if guard.state.message_length == 0 {
                if guard.state.buffer.len() < HEADER_SIZE {
                    return;
                }
                let mut cursor = io::Cursor::new(&guard.state.buffer[..]);
                match FrameHeader::decode(&mut cursor) {
                    Ok(header) => guard.state.message_length = HEADER_SIZE + header.body_length as usize,
                    Err(CodecError::Incomplete) => return,
                    Err(e) => {
                        error!(session = %id, error = %e, "header decode error, resetting receive state");
                        guard.state.reset();
                        return;
                    }
                }
            }

            if guard.state.buffer.len() < guard.state.message_length {
                return;
            }

            let message_length = guard.state.message_length;
            guard.state.message_length = 0;
            guard.state.buffer.split_to(message_length)
        };

        let header = match FrameHeader::decode(&mut io::Cursor::new(&frame[..HEADER_SIZE])) {
            Ok(h) => h,
            Err(_) => continue,
        };
        let body = &frame[HEADER_SIZE..];

        if header.frame_type != FrameType::PublishMessage {
            debug!(session = %id, frame_type = ?header.frame_type, "ignoring non-publish frame on session socket");
            continue;
        }

        let publish = match PublishMessage::decode_body(body) {
            Ok(p) => p,
            Err(e) => {
                error!(session = %id, error = %e, "malformed publish message body");
                continue;
            }
        };

        let payload = match decompress(&publish) {
            Ok(p) => p,
            Err(e) => {
                error!(session = %id, error = %e, "failed to decompress publish payload");
                continue;
            }
        };

        let item = CallbackItem { session_id: id, block_id: publish.block_id, payload };
        if callback_tx.send(item).await.is_err() {
            return;
        }
    }
}

fn decompress(publish: &PublishMessage) -> io::Result<Bytes> {
    match publish.compression {
        0 => Ok(publish.raw_payload.clone()),
        1 => {
            let mut decoder = ZlibDecoder::new(&publish.raw_payload[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unexpected compression code: {other:#04x}"))),
    }
}

/// Attempt one reconnect for `id`. On success the session's write half is
/// swapped into the registry entry and a fresh read half is installed in
/// the reader's local map under the same id. On failure the session is
/// marked stopped and dropped from the registry entirely, mirroring the
/// original monitor API's behavior of giving up on a session whose restart
/// itself fails.
async fn restart_session(
    id: SessionId,
    registry: &Registry,
    config: &Arc<PushConfig>,
    sessions: &mut HashMap<SessionId, Arc<Mutex<ReaderSession>>>,
) {
    let entry = { registry.lock().expect("registry mutex poisoned").get(&id).cloned() };
    let Some(entry) = entry else { return };

    if entry.stopped.load(Ordering::SeqCst) {
        registry.lock().expect("registry mutex poisoned").remove(&id);
        return;
    }

    *entry.state.lock().expect("session state mutex poisoned") = SessionState::Failed;

    match handshake(config, entry.monitor_id).await {
        Ok(transport) => {
            let (read_half, write_half) = tokio::io::split(transport);
            *entry.write_half.lock().await = Some(write_half);
            sessions.insert(id, Arc::new(Mutex::new(ReaderSession { read_half, state: ReceiveState::new() })));
            *entry.state.lock().expect("session state mutex poisoned") = SessionState::Active;
            info!(session = %id, "session restarted");
        }
        Err(e) => {
            error!(session = %id, error = %e, "restart failed, dropping session");
            entry.stopped.store(true, Ordering::SeqCst);
            *entry.state.lock().expect("session state mutex poisoned") = SessionState::Stopped;
            registry.lock().expect("registry mutex poisoned").remove(&id);
        }
    }
}
