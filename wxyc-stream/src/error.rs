//! Error types for wxyc-stream
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

pub use crate::audio::decoder::DecodeError;
pub use crate::network::ConnectionError;

/// Main error type for wxyc-stream
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] wxyc_common::Error),

    /// Stream connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Session has already shut down
    #[error("Session closed")]
    SessionClosed,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using wxyc-stream Error
pub type Result<T> = std::result::Result<T, Error>;
