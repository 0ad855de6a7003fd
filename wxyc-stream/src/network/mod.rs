//! HTTP stream client
//!
//! Opens the station stream and delivers its body as lifecycle events on a
//! channel owned by the session.

mod client;

pub use client::{
    ChunkCredits, ClientEvent, ClientEventKind, ConnectionId, StreamChunk, StreamClient,
};

use std::time::Duration;
use thiserror::Error;
use wxyc_common::ErrorKind;

/// Stream connection failures
///
/// Cancellation is never an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Server answered with something other than 200
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Response headers did not arrive in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Refused, reset, TLS failure, truncated body
    #[error("Transport failure: {0}")]
    Transport(String),

    /// URL could not be parsed
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),
}

impl ConnectionError {
    /// Error kind reported to the state machine
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::HttpStatus(status) => ErrorKind::HttpStatus { status: *status },
            ConnectionError::Timeout(_) => ErrorKind::Timeout,
            ConnectionError::Transport(_) | ConnectionError::InvalidUrl(_) => ErrorKind::Transport,
        }
    }

    fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ConnectionError::Timeout(timeout)
        } else if err.is_builder() {
            ConnectionError::InvalidUrl(err.to_string())
        } else {
            ConnectionError::Transport(err.to_string())
        }
    }
}
