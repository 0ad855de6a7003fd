//! # WXYC Streaming Engine (wxyc-stream)
//!
//! Streaming decode and playback engine for a live MPEG audio station.
//!
//! **Purpose:** Open a continuous HTTP byte stream, find MPEG audio frame
//! boundaries, decode frames into planar PCM buffers, hand them to a realtime
//! render callback through a lock-free queue, and keep playback alive with
//! stall detection and reconnect/backoff.
//!
//! **Architecture:**
//! - `network` - HTTP stream client (tokio + reqwest)
//! - `audio` - frame sync/header parsing, frame decoder, codec backend (symphonia), output sinks
//! - `playback` - buffer queue, render consumer, decode worker, backoff, state machine, session actor
//!
//! ```no_run
//! use wxyc_common::StreamingConfiguration;
//! use wxyc_stream::StreamingSession;
//!
//! # async fn run() -> wxyc_stream::Result<()> {
//! let config = StreamingConfiguration::with_url("https://audio-mp3.ibiblio.org/wxyc.mp3");
//! let (session, render) = StreamingSession::start(config)?;
//! // Move `render` into the audio device callback, then:
//! session.play()?;
//! # drop(render);
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod error;
pub mod network;
pub mod playback;

pub use audio::types::{AudioFormat, DecodedAudioBuffer};
pub use error::{Error, Result};
pub use playback::render::RenderConsumer;
pub use playback::session::StreamingSession;
