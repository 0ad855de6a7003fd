//! Event types for the WXYC streaming engine
//!
//! Provides the engine's structured event values and the `EventBus` used to
//! fan them out to collaborators (UI, lock screen, analytics). The engine only
//! emits values; how they are reported is up to the subscriber.

mod state_types;

pub use state_types::{ConnectionState, ErrorKind};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine event types
///
/// Events are broadcast via `EventBus` and can be serialized for analytics
/// or diagnostics transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Connection state changed
    ///
    /// Triggers:
    /// - UI: Update play/pause/reconnecting indicators
    /// - Lock screen: Update now-playing state
    StateChanged {
        /// State before the transition
        old_state: ConnectionState,
        /// State after the transition
        new_state: ConnectionState,
        /// When the transition happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stream format established by the frame decoder
    ///
    /// Emitted once per connection, when frame sync is first found.
    FormatDetected {
        sample_rate: u32,
        channels: u16,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reconnect attempt has been scheduled
    ReconnectScheduled {
        /// 1-based attempt number
        attempt: u32,
        /// Backoff delay before the attempt starts
        delay_ms: u64,
        /// Failure that triggered the reconnect
        cause: ErrorKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Buffer queue ran dry during playback
    StallDetected {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback resumed after a stall without reconnecting
    StallRecovered {
        /// Time spent stalled
        stall_duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback reached `playing` again after one or more reconnect attempts
    RecoverySucceeded {
        /// Number of attempts it took
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session entered the terminal error state
    ///
    /// Triggers:
    /// - UI: Show failure indicator
    /// - Analytics: Record fatal playback error
    FatalError {
        kind: ErrorKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::StateChanged { .. } => "StateChanged",
            EngineEvent::FormatDetected { .. } => "FormatDetected",
            EngineEvent::ReconnectScheduled { .. } => "ReconnectScheduled",
            EngineEvent::StallDetected { .. } => "StallDetected",
            EngineEvent::StallRecovered { .. } => "StallRecovered",
            EngineEvent::RecoverySucceeded { .. } => "RecoverySucceeded",
            EngineEvent::FatalError { .. } => "FatalError",
        }
    }
}

/// Central event distribution bus for engine events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers never block state transitions)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use wxyc_common::events::{ConnectionState, EngineEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EngineEvent::StateChanged {
///     old_state: ConnectionState::Idle,
///     new_state: ConnectionState::Connecting,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
