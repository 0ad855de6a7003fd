//! Streaming session
//!
//! `StreamingSession` is the public handle. Behind it a single tokio task
//! (the session actor) owns the state machine, the stream client, the decode
//! worker handle and the reconnect/stall timers, and executes the machine's
//! actions. Collaborators only see channel endpoints:
//! - `watch` snapshot of the current `ConnectionState`
//! - `EngineEvent` broadcast via `EventBus`
//! - broadcast of every decoded buffer, for analysis
//!
//! The render side (`RenderConsumer`) is returned from `start` and belongs to
//! whoever drives the audio device.
//!
//! When a connection ends on its own, its outcome is held back until the
//! decode worker has finished the chunks already submitted, so the last
//! frames of a stream still reach the queue before the reset.

use crate::audio::backend::{FrameBackend, SymphoniaBackend};
use crate::audio::decoder::FrameDecoder;
use crate::audio::types::DecodedAudioBuffer;
use crate::error::{Error, Result};
use crate::network::{ChunkCredits, ClientEvent, ClientEventKind, StreamClient};
use crate::playback::buffer_queue::buffer_queue;
use crate::playback::decoder_worker::{DecodeEvent, DecodeWorker, DecodeWorkerHandle};
use crate::playback::render::{RenderConsumer, RenderShared};
use crate::playback::state_machine::{Action, Input, PlaybackStateMachine};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, trace, warn};
use wxyc_common::{ConnectionState, EngineEvent, ErrorKind, EventBus, StreamingConfiguration};

#[derive(Debug)]
enum SessionCommand {
    Play,
    Pause,
    Resume,
    Stop,
    Shutdown,
}

/// Handle to a running streaming session
pub struct StreamingSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
    buffers: broadcast::Sender<Arc<DecodedAudioBuffer>>,
    render: Arc<RenderShared>,
    credits: ChunkCredits,
    task: Option<JoinHandle<()>>,
}

impl StreamingSession {
    /// Start a session using the symphonia backend.
    ///
    /// Must be called within a tokio runtime. The session starts `idle`;
    /// nothing connects until `play()`.
    ///
    /// # Errors
    /// Invalid configuration, or failure to build the HTTP client or start
    /// the decode thread.
    pub fn start(config: StreamingConfiguration) -> Result<(Self, RenderConsumer)> {
        Self::with_backend(config, Box::new(SymphoniaBackend::new()))
    }

    /// Start a session with a specific codec backend
    pub fn with_backend(
        config: StreamingConfiguration,
        backend: Box<dyn FrameBackend>,
    ) -> Result<(Self, RenderConsumer)> {
        config.validate()?;

        let (producer, consumer) =
            buffer_queue(config.buffer_queue_capacity, config.overflow_policy);
        let render_shared = Arc::new(RenderShared::new());
        let render = RenderConsumer::new(consumer, Arc::clone(&render_shared));

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let client = StreamClient::new(&config, client_tx)?;
        let credits = client.credits().clone();

        let (decode_tx, decode_rx) = mpsc::unbounded_channel();
        let (buffers, _) = broadcast::channel(config.buffer_queue_capacity.max(1));
        let (worker, worker_thread) = DecodeWorker::spawn(
            FrameDecoder::new(backend),
            producer,
            decode_tx,
            buffers.clone(),
        )
        .map_err(|e| Error::Internal(format!("Failed to spawn decode thread: {}", e)))?;

        let events = EventBus::new(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        info!(
            "Streaming session for {} (queue {}, start at {}, reconnect {} x{})",
            config.url,
            config.buffer_queue_capacity,
            config.minimum_buffers_before_playback,
            config.auto_reconnect,
            config.max_reconnect_attempts
        );

        let actor = SessionActor {
            machine: PlaybackStateMachine::new(&config),
            config,
            client,
            worker,
            worker_thread: Some(worker_thread),
            render: Arc::clone(&render_shared),
            state_tx,
            events: events.clone(),
            generation: 0,
            reconnect_at: None,
            stall_deadline: None,
            pending_outcome: None,
            last_underruns: 0,
        };
        let task = tokio::spawn(actor.run(commands_rx, client_rx, decode_rx));

        let session = Self {
            commands: commands_tx,
            state: state_rx,
            events,
            buffers,
            render: render_shared,
            credits,
            task: Some(task),
        };
        Ok((session, render))
    }

    /// Start (or restart after an error) playback
    pub fn play(&self) -> Result<()> {
        self.send(SessionCommand::Play)
    }

    /// Stop playback and drop the connection; `resume()` reconnects fresh
    pub fn pause(&self) -> Result<()> {
        self.send(SessionCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(SessionCommand::Resume)
    }

    /// Return to `idle`
    pub fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop)
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stream of state snapshots, starting with the current one.
    ///
    /// Intermediate states may be coalesced; subscribe to events for every
    /// transition.
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state.clone())
    }

    /// Raw state watch receiver
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Every decoded buffer, as produced (independent of playback)
    pub fn subscribe_buffers(&self) -> broadcast::Receiver<Arc<DecodedAudioBuffer>> {
        self.buffers.subscribe()
    }

    /// Render-side counters and playback gate
    pub fn render_stats(&self) -> &Arc<RenderShared> {
        &self.render
    }

    /// Network chunks read but not yet decoded; never above
    /// `max_pending_chunks`
    pub fn chunks_in_flight(&self) -> usize {
        self.credits.in_flight()
    }

    /// Stop everything and wait for the actor and decode thread to exit
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

struct SessionActor {
    config: StreamingConfiguration,
    machine: PlaybackStateMachine,
    client: StreamClient,
    worker: DecodeWorkerHandle,
    worker_thread: Option<std::thread::JoinHandle<()>>,
    render: Arc<RenderShared>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventBus,
    /// Decode generation whose events are current
    generation: u64,
    reconnect_at: Option<Instant>,
    stall_deadline: Option<Instant>,
    /// End of the current connection, waiting for the worker to drain
    pending_outcome: Option<Input>,
    last_underruns: u64,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut client_events: mpsc::UnboundedReceiver<ClientEvent>,
        mut decode_events: mpsc::UnboundedReceiver<DecodeEvent>,
    ) {
        let mut monitor = tokio::time::interval(self.config.underrun_check_interval());
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reconnect_at = self.reconnect_at;
            let stall_deadline = self.stall_deadline;

            tokio::select! {
                command = commands.recv() => {
                    let input = match command {
                        Some(SessionCommand::Play) => Input::Play,
                        Some(SessionCommand::Pause) => Input::Pause,
                        Some(SessionCommand::Resume) => Input::Resume,
                        Some(SessionCommand::Stop) => Input::Stop,
                        Some(SessionCommand::Shutdown) | None => break,
                    };
                    self.dispatch(input);
                }
                Some(event) = client_events.recv() => self.on_client_event(event),
                Some(event) = decode_events.recv() => self.on_decode_event(event),
                _ = sleep_until(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.dispatch(Input::ReconnectDue);
                }
                _ = sleep_until(stall_deadline), if stall_deadline.is_some() => {
                    self.stall_deadline = None;
                    self.dispatch(Input::StallTimeout);
                }
                _ = monitor.tick() => self.check_underruns(),
            }
        }

        self.teardown().await;
    }

    fn on_client_event(&mut self, event: ClientEvent) {
        if self.client.current() != Some(event.connection) {
            trace!("Ignoring event from superseded {}", event.connection);
            return;
        }

        match event.kind {
            ClientEventKind::Connected => self.dispatch(Input::Connected),
            ClientEventKind::Data(chunk) => {
                if self.receiving() && !self.worker.submit(chunk) {
                    warn!("Decode worker is gone");
                    self.dispatch(Input::DecodeFailed(ErrorKind::DecodeFailure));
                }
            }
            ClientEventKind::Disconnected { intentional } => {
                self.end_of_stream(Input::Disconnected { intentional })
            }
            ClientEventKind::Error(error) => {
                self.end_of_stream(Input::ConnectionFailed(error.kind()))
            }
        }
    }

    /// States in which body data is handed to the decoder
    fn receiving(&self) -> bool {
        matches!(
            self.machine.state(),
            ConnectionState::Buffering { .. } | ConnectionState::Playing | ConnectionState::Stalled
        )
    }

    /// Act on a connection's end once the decoder has caught up with it
    fn end_of_stream(&mut self, outcome: Input) {
        if self.receiving() && self.worker.drain() {
            debug!("Connection ended, draining decoder before {:?}", outcome);
            self.pending_outcome = Some(outcome);
        } else {
            self.dispatch(outcome);
        }
    }

    fn on_decode_event(&mut self, event: DecodeEvent) {
        if event.generation() != self.generation {
            trace!("Ignoring decode event from generation {}", event.generation());
            return;
        }

        match event {
            DecodeEvent::FormatDetected { format, .. } => {
                self.events.emit_lossy(EngineEvent::FormatDetected {
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp: chrono::Utc::now(),
                });
            }
            DecodeEvent::Enqueued { buffered, .. } => {
                self.dispatch(Input::BufferEnqueued { buffered })
            }
            DecodeEvent::Fatal { error, .. } => {
                warn!("Decoder failed: {}", error);
                self.dispatch(Input::DecodeFailed(ErrorKind::DecodeFailure));
            }
            DecodeEvent::Drained { .. } => {
                if let Some(outcome) = self.pending_outcome.take() {
                    self.dispatch(outcome);
                }
            }
        }
    }

    fn check_underruns(&mut self) {
        let underruns = self.render.underruns();
        if underruns > self.last_underruns {
            self.last_underruns = underruns;
            if self.render.is_gate_open() {
                self.dispatch(Input::Underrun);
            }
        }
    }

    /// Feed an input to the machine and carry out the resulting actions
    fn dispatch(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let actions = self.machine.handle(input, std::time::Instant::now());
            for action in actions {
                if let Some(follow_up) = self.execute(action) {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, action: Action) -> Option<Input> {
        match action {
            Action::Connect => match self.client.connect(&self.config.url) {
                Ok(id) => debug!("Opened {}", id),
                Err(e) => {
                    warn!("Cannot connect: {}", e);
                    return Some(Input::ConnectionFailed(e.kind()));
                }
            },
            Action::Disconnect => self.client.disconnect(),
            Action::ResetDecoder => {
                self.pending_outcome = None;
                self.generation = self.worker.reset();
            }
            Action::OpenGate => {
                self.last_underruns = self.render.underruns();
                self.render.open_gate();
            }
            Action::CloseGate => self.render.close_gate(),
            Action::ScheduleReconnect { attempt, delay } => {
                debug!("Reconnect attempt {} scheduled in {:?}", attempt, delay);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Action::CancelReconnect => self.reconnect_at = None,
            Action::ArmStallTimer => {
                self.stall_deadline = Some(Instant::now() + self.config.stall_timeout());
            }
            Action::DisarmStallTimer => self.stall_deadline = None,
            Action::Emit(event) => {
                if let EngineEvent::StateChanged { new_state, .. } = &event {
                    info!("Playback state: {}", new_state);
                    self.state_tx.send_replace(*new_state);
                }
                self.events.emit_lossy(event);
            }
        }
        None
    }

    async fn teardown(&mut self) {
        debug!("Session shutting down");
        self.render.close_gate();
        self.client.disconnect();
        self.worker.shutdown();

        if let Some(thread) = self.worker_thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("Decode thread panicked"),
                Err(e) => warn!("Failed to join decode thread: {}", e),
            }
        }

        let old_state = self.machine.state();
        if old_state != ConnectionState::Idle {
            self.dispatch(Input::Stop);
        }
        info!("Session stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
