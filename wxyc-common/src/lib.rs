//! # WXYC Common Library
//!
//! Shared code between the streaming engine and its collaborators:
//! - Connection state and error kinds (the observable playback state)
//! - Engine event types and the broadcast `EventBus`
//! - Streaming configuration and TOML loading

pub mod config;
pub mod error;
pub mod events;

pub use config::{OverflowPolicy, StreamingConfiguration};
pub use error::{Error, Result};
pub use events::{ConnectionState, EngineEvent, ErrorKind, EventBus};
