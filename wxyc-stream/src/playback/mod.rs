//! Playback pipeline and control
//!
//! - `buffer_queue` - bounded handoff from decode worker to render
//! - `render` - realtime render consumer and playback gate
//! - `decoder_worker` - decode thread
//! - `backoff` - reconnect delays
//! - `state_machine` - connection/playback state
//! - `session` - actor tying it together

pub mod backoff;
pub mod buffer_queue;
pub mod decoder_worker;
pub mod render;
pub mod session;
pub mod state_machine;

pub use backoff::{BackoffController, ReconnectAttemptState};
pub use buffer_queue::{buffer_queue, EnqueueOutcome, QueueConsumer, QueueProducer};
pub use decoder_worker::{DecodeCommand, DecodeEvent, DecodeWorker, DecodeWorkerHandle};
pub use render::{RenderConsumer, RenderShared};
pub use session::StreamingSession;
pub use state_machine::{Action, Input, PlaybackStateMachine};
