//! Playback state machine
//!
//! Single owner of `ConnectionState`. Pure and synchronous: `handle` takes an
//! input and the current time and returns the actions the session actor must
//! carry out. No I/O, no timers, no channels.
//!
//! | From | Input | To |
//! |---|---|---|
//! | idle / paused / error | play | connecting |
//! | connecting | connected | buffering{0, required} |
//! | buffering | enqueued (n < required) | buffering{n, required} |
//! | buffering | enqueued (n >= required) | playing |
//! | playing | underrun | stalled |
//! | stalled | enqueued (n >= required) | playing |
//! | connecting / buffering / playing / stalled | failure | reconnecting or error |
//! | reconnecting | reconnect due | connecting |
//! | any active | pause / stop | paused / idle |
//!
//! Inputs that do not apply to the current state are ignored, which makes
//! duplicate inputs harmless.

use crate::playback::backoff::BackoffController;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wxyc_common::{ConnectionState, EngineEvent, ErrorKind, StreamingConfiguration};

/// Inputs from the caller, the client, the decode worker and the timers
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Play,
    Pause,
    Resume,
    Stop,
    Connected,
    Disconnected { intentional: bool },
    ConnectionFailed(ErrorKind),
    BufferEnqueued { buffered: usize },
    Underrun,
    ReconnectDue,
    StallTimeout,
    DecodeFailed(ErrorKind),
}

/// Side effects requested by the machine, executed in order
#[derive(Debug, Clone)]
pub enum Action {
    Connect,
    Disconnect,
    ResetDecoder,
    OpenGate,
    CloseGate,
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    ArmStallTimer,
    DisarmStallTimer,
    Emit(EngineEvent),
}

pub struct PlaybackStateMachine {
    state: ConnectionState,
    required: usize,
    auto_reconnect: bool,
    backoff: BackoffController,
    stalled_at: Option<Instant>,
}

impl PlaybackStateMachine {
    pub fn new(config: &StreamingConfiguration) -> Self {
        Self {
            state: ConnectionState::Idle,
            required: config.minimum_buffers_before_playback.max(1),
            auto_reconnect: config.auto_reconnect,
            backoff: BackoffController::new(config.backoff.clone(), config.max_reconnect_attempts),
            stalled_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since playback was last reached
    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Apply one input
    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();

        match (self.state, input) {
            (
                ConnectionState::Idle | ConnectionState::Error(_),
                Input::Play,
            )
            | (ConnectionState::Paused, Input::Play | Input::Resume) => {
                self.backoff.reset();
                self.transition(ConnectionState::Connecting, &mut actions);
                actions.push(Action::Connect);
            }

            (ConnectionState::Idle | ConnectionState::Paused | ConnectionState::Error(_), Input::Pause) => {}
            (_, Input::Pause) => {
                self.teardown(&mut actions);
                self.transition(ConnectionState::Paused, &mut actions);
            }

            (ConnectionState::Idle, Input::Stop) => {}
            (_, Input::Stop) => {
                self.teardown(&mut actions);
                self.backoff.reset();
                self.transition(ConnectionState::Idle, &mut actions);
            }

            (ConnectionState::Connecting, Input::Connected) => {
                self.transition(
                    ConnectionState::Buffering {
                        buffered_count: 0,
                        required_count: self.required,
                    },
                    &mut actions,
                );
            }

            (ConnectionState::Buffering { .. }, Input::BufferEnqueued { buffered }) => {
                if buffered >= self.required {
                    actions.push(Action::OpenGate);
                    self.enter_playing(&mut actions);
                } else {
                    self.transition(
                        ConnectionState::Buffering {
                            buffered_count: buffered,
                            required_count: self.required,
                        },
                        &mut actions,
                    );
                }
            }

            (ConnectionState::Stalled, Input::BufferEnqueued { buffered }) => {
                if buffered >= self.required {
                    let stalled_for = self
                        .stalled_at
                        .take()
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or_default();
                    info!("Stall recovered after {:?}", stalled_for);
                    actions.push(Action::DisarmStallTimer);
                    actions.push(Action::OpenGate);
                    self.enter_playing(&mut actions);
                    actions.push(Action::Emit(EngineEvent::StallRecovered {
                        stall_duration_ms: stalled_for.as_millis() as u64,
                        timestamp: chrono::Utc::now(),
                    }));
                }
            }

            (ConnectionState::Playing, Input::Underrun) => {
                warn!("Buffer queue ran dry, stalling");
                self.stalled_at = Some(now);
                actions.push(Action::CloseGate);
                actions.push(Action::ArmStallTimer);
                self.transition(ConnectionState::Stalled, &mut actions);
                actions.push(Action::Emit(EngineEvent::StallDetected {
                    timestamp: chrono::Utc::now(),
                }));
            }

            (ConnectionState::Stalled, Input::StallTimeout) => {
                warn!("Stall exceeded timeout");
                self.fail(ErrorKind::StallTimeout, &mut actions);
            }

            (ConnectionState::Reconnecting, Input::ReconnectDue) => {
                debug!(
                    "Reconnect attempt {} starting",
                    self.backoff.attempts()
                );
                self.transition(ConnectionState::Connecting, &mut actions);
                actions.push(Action::Connect);
            }

            (state, Input::ConnectionFailed(kind)) if is_connected_state(state) => {
                self.fail(kind, &mut actions);
            }

            (state, Input::DecodeFailed(kind)) if is_connected_state(state) => {
                self.fail(kind, &mut actions);
            }

            (state, Input::Disconnected { intentional: false }) if is_connected_state(state) => {
                self.fail(ErrorKind::Transport, &mut actions);
            }

            (state, input) => {
                debug!("Ignoring {:?} in state {}", input, state);
            }
        }

        actions
    }

    fn enter_playing(&mut self, actions: &mut Vec<Action>) {
        let attempts = self.backoff.attempts();
        self.backoff.reset();
        self.transition(ConnectionState::Playing, actions);
        if attempts > 0 {
            info!("Recovered after {} reconnect attempt(s)", attempts);
            actions.push(Action::Emit(EngineEvent::RecoverySucceeded {
                attempts,
                timestamp: chrono::Utc::now(),
            }));
        }
    }

    /// Stop audio and drop the connection and all decoded data
    fn teardown(&mut self, actions: &mut Vec<Action>) {
        self.stalled_at = None;
        actions.extend([
            Action::CloseGate,
            Action::DisarmStallTimer,
            Action::CancelReconnect,
            Action::Disconnect,
            Action::ResetDecoder,
        ]);
    }

    /// Route a failure to reconnecting or the terminal error state
    fn fail(&mut self, kind: ErrorKind, actions: &mut Vec<Action>) {
        self.stalled_at = None;
        actions.extend([
            Action::CloseGate,
            Action::DisarmStallTimer,
            Action::Disconnect,
            Action::ResetDecoder,
        ]);

        if !self.auto_reconnect {
            warn!("Playback failed ({}), auto-reconnect disabled", kind);
            self.enter_error(kind, actions);
            return;
        }

        match self.backoff.record_failure() {
            Some((attempt, delay)) => {
                info!(
                    "Playback failed ({}), reconnect attempt {}/{} in {:?}",
                    kind,
                    attempt,
                    self.backoff.max_attempts(),
                    delay
                );
                self.transition(ConnectionState::Reconnecting, actions);
                actions.push(Action::ScheduleReconnect { attempt, delay });
                actions.push(Action::Emit(EngineEvent::ReconnectScheduled {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    cause: kind,
                    timestamp: chrono::Utc::now(),
                }));
            }
            None => {
                warn!(
                    "Playback failed ({}), {} reconnect attempt(s) exhausted",
                    kind,
                    self.backoff.max_attempts()
                );
                self.enter_error(ErrorKind::ReconnectExhausted, actions);
            }
        }
    }

    fn enter_error(&mut self, kind: ErrorKind, actions: &mut Vec<Action>) {
        self.transition(ConnectionState::Error(kind), actions);
        actions.push(Action::Emit(EngineEvent::FatalError {
            kind,
            timestamp: chrono::Utc::now(),
        }));
    }

    fn transition(&mut self, new_state: ConnectionState, actions: &mut Vec<Action>) {
        if new_state == self.state {
            return;
        }
        let old_state = std::mem::replace(&mut self.state, new_state);
        debug!("State: {} -> {}", old_state, new_state);
        actions.push(Action::Emit(EngineEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        }));
    }
}

/// States that hold (or are opening) a connection
fn is_connected_state(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::Connecting
            | ConnectionState::Buffering { .. }
            | ConnectionState::Playing
            | ConnectionState::Stalled
    )
}
