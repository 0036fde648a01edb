// ABOUTME: Error types surfaced by the push session runtime and the monitor HTTP client
// ABOUTME: Structured thiserror-based error enums for the session runtime and the HTTP collaborator

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Errors returned by session- and client-level operations.
#[derive(Debug, Error)]
pub enum PushError {
    /// Connect/send/recv failed during handshake or steady-state I/O.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// No `ConnectionResponse` arrived within the handshake timeout.
    #[error("handshake timed out waiting for ConnectionResponse")]
    Timeout,

    /// Malformed response, wrong frame type, or unexpected compression code
    /// encountered during the handshake.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// `ConnectionResponse` carried a non-success status code.
    #[error("authentication rejected with status {0}")]
    Auth(u16),

    /// The session registry holds no entry for the handle supplied.
    #[error("unknown session")]
    UnknownSession,

    /// The client has been closed via `stop_all()`.
    #[error("client is closed")]
    Closed,

    /// The monitor HTTP collaborator returned an error.
    #[error("monitor request failed: {0}")]
    Http(#[from] MonitorError),
}

/// Errors raised by the HTTP monitor collaborator (`create_monitor`,
/// `get_monitor`, `delete_monitor`).
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("monitor endpoint returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("response missing Location header")]
    MissingLocation,

    #[error("could not parse monitor id from response")]
    MalformedResponse,
}

pub type PushResult<T> = std::result::Result<T, PushError>;
