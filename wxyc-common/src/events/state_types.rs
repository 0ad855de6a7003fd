//! Connection state type definitions
//!
//! The externally observable playback state and the error kinds that can
//! terminate it.

use serde::{Deserialize, Serialize};

/// Reason a session entered (or is about to enter) the `error` state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Server answered with a status other than 200
    HttpStatus { status: u16 },
    /// Connection could not be established within the configured timeout
    Timeout,
    /// Transport-level failure (refused, reset, TLS, truncated response)
    Transport,
    /// Playback stayed stalled longer than the configured stall timeout
    StallTimeout,
    /// Fatal decode failure (output allocation failure, unsupported codec)
    DecodeFailure,
    /// Reconnect attempts exhausted
    ReconnectExhausted,
}

impl ErrorKind {
    /// Whether this kind came from the connection rather than the decoder
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::HttpStatus { .. } | ErrorKind::Timeout | ErrorKind::Transport
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::HttpStatus { status } => write!(f, "HTTP status {}", status),
            ErrorKind::Timeout => write!(f, "connection timeout"),
            ErrorKind::Transport => write!(f, "transport failure"),
            ErrorKind::StallTimeout => write!(f, "stall timeout"),
            ErrorKind::DecodeFailure => write!(f, "decode failure"),
            ErrorKind::ReconnectExhausted => write!(f, "reconnect attempts exhausted"),
        }
    }
}

/// Observable connection/playback state of a streaming session
///
/// Owned exclusively by the playback state machine; everyone else sees
/// snapshots. Equality compares the buffering counts and the error kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session activity
    Idle,
    /// HTTP request in flight
    Connecting,
    /// Connected, filling the buffer queue up to the playback gate
    Buffering {
        buffered_count: usize,
        required_count: usize,
    },
    /// Audio is being rendered
    Playing,
    /// Paused by the caller (stream torn down, resumes fresh)
    Paused,
    /// Buffer queue ran dry while playing
    Stalled,
    /// Waiting for the backoff delay before the next connection attempt
    Reconnecting,
    /// Terminal until the caller requests `play()` again
    Error(ErrorKind),
}

impl ConnectionState {
    /// Whether the session currently holds (or is establishing) a connection
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Buffering { .. }
                | ConnectionState::Playing
                | ConnectionState::Stalled
        )
    }

    /// Whether a caller should present a "reconnecting" indicator
    pub fn is_recovering(&self) -> bool {
        matches!(self, ConnectionState::Reconnecting | ConnectionState::Stalled)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Buffering {
                buffered_count,
                required_count,
            } => write!(f, "buffering({}/{})", buffered_count, required_count),
            ConnectionState::Playing => write!(f, "playing"),
            ConnectionState::Paused => write!(f, "paused"),
            ConnectionState::Stalled => write!(f, "stalled"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Error(kind) => write!(f, "error({})", kind),
        }
    }
}
