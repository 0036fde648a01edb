// ABOUTME: Session identity, handshake, and receive-buffer reassembly state
// ABOUTME: A Session is the logical binding of a monitor id, a callback, and a transport incarnation

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument, warn};

use crate::codec::{ConnectionRequest, ConnectionResponse, FrameHeader, FrameType, STATUS_OK};
use crate::config::PushConfig;
use crate::error::{PushError, PushResult};
use crate::transport::Transport;

/// How long the handshake will wait for a `ConnectionResponse` before
/// timing out (§4.3).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque, process-local identity for one logical session. Stable for the
/// lifetime of the session even across transport restarts (see DESIGN.md for
/// why this crate does not mint a fresh id per restart the way the original
/// fd-keyed map did).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Allocates process-unique [`SessionId`]s.
#[derive(Debug, Default)]
pub struct SessionIdAllocator(AtomicU64);

impl SessionIdAllocator {
    pub fn next(&self) -> SessionId {
        SessionId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// User-supplied callback invoked with the payload of each delivered block.
/// Returns `true` if the block was processed successfully, which triggers an
/// acknowledgement; `false` (or a panic, caught by the worker) suppresses it.
pub type Callback = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Observable lifecycle state of a session, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Handshaking,
    Active,
    Failed,
    Stopped,
}

/// Perform the synchronous-style handshake described in §4.3: connect,
/// send `ConnectionRequest`, and wait up to [`HANDSHAKE_TIMEOUT`] for a
/// successful `ConnectionResponse`. On any failure the transport is closed
/// before the error is returned.
#[instrument(skip(config), fields(monitor_id))]
pub async fn handshake(config: &PushConfig, monitor_id: u32) -> PushResult<Transport> {
    let port = config.push_port();
    let mut transport = if config.secure {
        Transport::connect_tls(&config.hostname, port, &config.ca_certs).await?
    } else {
        Transport::connect_plain(&config.hostname, port).await?
    };

    let request = ConnectionRequest {
        username: config.username.clone(),
        password: config.password.clone(),
        monitor_id,
    };
    let request_bytes = request.encode();

    if let Err(e) = transport.write_all(&request_bytes).await {
        let _ = transport.shutdown().await;
        return Err(PushError::Transport(e));
    }
    if let Err(e) = transport.flush().await {
        let _ = transport.shutdown().await;
        return Err(PushError::Transport(e));
    }

    let mut response_buf = [0u8; 10];
    let read_result = tokio::time::timeout(HANDSHAKE_TIMEOUT, transport.read_exact(&mut response_buf)).await;
    let response_buf = match read_result {
        Ok(Ok(_)) => response_buf,
        Ok(Err(e)) => {
            let _ = transport.shutdown().await;
            return Err(PushError::Transport(e));
        }
        Err(_elapsed) => {
            let _ = transport.shutdown().await;
            return Err(PushError::Timeout);
        }
    };

    let mut cursor = std::io::Cursor::new(&response_buf[..]);
    let header = match FrameHeader::decode(&mut cursor) {
        Ok(h) => h,
        Err(e) => {
            let _ = transport.shutdown().await;
            return Err(PushError::Protocol(e));
        }
    };
    if header.frame_type != FrameType::ConnectionResponse {
        let _ = transport.shutdown().await;
        return Err(PushError::Protocol(crate::codec::CodecError::UnexpectedFrameType {
            expected: FrameType::ConnectionResponse,
            actual: header.frame_type,
        }));
    }

    let body = match ConnectionResponse::decode_body(&mut cursor) {
        Ok(b) => b,
        Err(e) => {
            let _ = transport.shutdown().await;
            return Err(PushError::Protocol(e));
        }
    };

    if body.status != STATUS_OK {
        warn!(monitor_id, status = body.status, "connection request rejected");
        let _ = transport.shutdown().await;
        return Err(PushError::Auth(body.status));
    }

    info!(monitor_id, "handshake succeeded");
    Ok(transport)
}

/// Per-session reassembly state owned exclusively by the reader task
/// (Invariant 1): an accumulation buffer and the `message_length` counter
/// that distinguishes "awaiting a header" from "awaiting a body".
#[derive(Debug)]
pub struct ReceiveState {
    pub buffer: BytesMut,
    pub message_length: usize,
}

impl ReceiveState {
    pub fn new() -> Self {
        ReceiveState { buffer: BytesMut::with_capacity(4 * 1024), message_length: 0 }
    }

    /// Zero the accumulation buffer and `message_length`, as required after
    /// dispatching a frame or recovering from a frame-level error (§4.2).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.message_length = 0;
    }
}

impl Default for ReceiveState {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded, fully-reassembled publish frame ready for dispatch to the
/// callback pool.
#[derive(Debug, Clone)]
pub struct DispatchedPublish {
    pub block_id: u16,
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let alloc = SessionIdAllocator::default();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, b);
    }

    #[test]
    fn receive_state_resets_cleanly() {
        let mut state = ReceiveState::new();
        state.buffer.extend_from_slice(b"partial");
        state.message_length = 17;
        state.reset();
        assert!(state.buffer.is_empty());
        assert_eq!(state.message_length, 0);
    }
}
