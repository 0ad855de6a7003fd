//! Network stream client
//!
//! One tokio task per connection. Every connection gets a fresh
//! `ConnectionId` and its events carry it, so the owner can ignore events
//! from a connection it has already replaced.
//!
//! **Event contract per connection:**
//! - `Connected`, then zero or more `Data`, then exactly one of
//!   `Disconnected` / `Error`
//! - Non-200 responses produce `Error(HttpStatus)` and no `Data`
//! - After `disconnect()` nothing but the single intentional `Disconnected`
//!   is emitted
//!
//! **Backpressure:** the socket is read only while a `ChunkCredits` permit is
//! free. Each `Data` chunk carries its permit until the consumer drops it, so
//! a decoder that falls behind stops the reads instead of queueing memory.

use super::ConnectionError;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONNECTION};
use reqwest::StatusCode;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use wxyc_common::StreamingConfiguration;

/// Identifies one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read-ahead allowance shared by all connections of one client
#[derive(Debug, Clone)]
pub struct ChunkCredits {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ChunkCredits {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Chunks read from the socket and not yet released
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

/// Body bytes from one socket read
///
/// Holds one read-ahead credit until dropped.
#[derive(Debug)]
pub struct StreamChunk {
    bytes: Bytes,
    _credit: Option<OwnedSemaphorePermit>,
}

impl Deref for StreamChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Chunk that holds no credit
impl From<Bytes> for StreamChunk {
    fn from(bytes: Bytes) -> Self {
        Self {
            bytes,
            _credit: None,
        }
    }
}

/// Event emitted by a connection
#[derive(Debug)]
pub struct ClientEvent {
    pub connection: ConnectionId,
    pub kind: ClientEventKind,
}

#[derive(Debug)]
pub enum ClientEventKind {
    /// 200 response received; body follows
    Connected,
    /// Body bytes, as delivered by the transport
    Data(StreamChunk),
    /// Stream ended
    Disconnected { intentional: bool },
    /// Connection failed
    Error(ConnectionError),
}

/// Serializes emission against cancellation
///
/// Once closed, nothing more is sent for that connection.
struct EventGate {
    connection: ConnectionId,
    closed: Mutex<bool>,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventGate {
    fn new(connection: ConnectionId, tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            connection,
            closed: Mutex::new(false),
            tx,
        }
    }

    /// Send unless closed; false means the connection is finished
    fn emit(&self, kind: ClientEventKind) -> bool {
        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return false;
        }
        self.tx
            .send(ClientEvent {
                connection: self.connection,
                kind,
            })
            .is_ok()
    }

    /// Send a terminal event and close; no-op if already closed
    fn close_with(&self, kind: ClientEventKind) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return false;
        }
        *closed = true;
        let _ = self.tx.send(ClientEvent {
            connection: self.connection,
            kind,
        });
        true
    }

    /// Close without emitting anything
    fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

struct ActiveConnection {
    id: ConnectionId,
    gate: Arc<EventGate>,
    cancel: CancellationToken,
}

/// HTTP stream client
///
/// Holds at most one live connection. Owned by the session actor.
pub struct StreamClient {
    http: reqwest::Client,
    connection_timeout: Duration,
    credits: ChunkCredits,
    events: mpsc::UnboundedSender<ClientEvent>,
    active: Option<ActiveConnection>,
    next_id: u64,
}

impl StreamClient {
    /// Create a client that reports on `events`
    pub fn new(
        config: &StreamingConfiguration,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self, ConnectionError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConnectionError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            connection_timeout: config.connection_timeout(),
            credits: ChunkCredits::new(config.max_pending_chunks),
            events,
            active: None,
            next_id: 1,
        })
    }

    /// Open `url`, replacing any current connection.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `InvalidUrl` if `url` does not parse; nothing is spawned in that case.
    pub fn connect(&mut self, url: &str) -> Result<ConnectionId, ConnectionError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(format!("{}: {}", url, e)))?;

        if let Some(previous) = self.active.take() {
            debug!("Replacing connection {}", previous.id);
            previous.gate.close();
            previous.cancel.cancel();
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let gate = Arc::new(EventGate::new(id, self.events.clone()));
        let cancel = CancellationToken::new();

        info!("Connecting to {} ({})", parsed, id);
        tokio::spawn(run_connection(
            self.http.clone(),
            parsed,
            self.connection_timeout,
            self.credits.clone(),
            Arc::clone(&gate),
            cancel.clone(),
        ));

        self.active = Some(ActiveConnection { id, gate, cancel });
        Ok(id)
    }

    /// Close the current connection.
    ///
    /// Emits exactly one `Disconnected { intentional: true }` for a live
    /// connection; calling again (or with nothing open) does nothing.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if active
                .gate
                .close_with(ClientEventKind::Disconnected { intentional: true })
            {
                debug!("Disconnected {}", active.id);
            }
        }
    }

    /// Connection that events are currently expected from
    pub fn current(&self) -> Option<ConnectionId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn credits(&self) -> &ChunkCredits {
        &self.credits
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.gate.close();
            active.cancel.cancel();
        }
    }
}

async fn run_connection(
    http: reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
    credits: ChunkCredits,
    gate: Arc<EventGate>,
    cancel: CancellationToken,
) {
    let id = gate.connection;
    let request = http
        .get(url)
        .header(ACCEPT, "audio/mpeg")
        .header(CONNECTION, "keep-alive");

    // Timeout covers the request until response headers arrive, not the body
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout(timeout, request.send()) => result,
    };

    let mut response = match result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let error = ConnectionError::from_reqwest(&e, timeout);
            warn!("Connection {} failed: {}", id, error);
            gate.close_with(ClientEventKind::Error(error));
            return;
        }
        Err(_) => {
            warn!("Connection {} timed out after {:?}", id, timeout);
            gate.close_with(ClientEventKind::Error(ConnectionError::Timeout(timeout)));
            return;
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        drop(response);
        warn!("Connection {} rejected with HTTP {}", id, status.as_u16());
        gate.close_with(ClientEventKind::Error(ConnectionError::HttpStatus(
            status.as_u16(),
        )));
        return;
    }

    if !gate.emit(ClientEventKind::Connected) {
        return;
    }
    debug!("Connection {} established", id);

    let mut total: u64 = 0;
    loop {
        // Wait for the consumer to release a chunk before reading more
        let credit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            credit = credits.acquire() => credit,
        };
        let Some(credit) = credit else {
            return;
        };

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            chunk = response.chunk() => chunk,
        };

        match next {
            Ok(Some(bytes)) => {
                total += bytes.len() as u64;
                trace!("Connection {} received {} bytes", id, bytes.len());
                let chunk = StreamChunk {
                    bytes,
                    _credit: Some(credit),
                };
                if !gate.emit(ClientEventKind::Data(chunk)) {
                    return;
                }
            }
            Ok(None) => {
                drop(credit);
                info!("Connection {} ended after {} bytes", id, total);
                gate.close_with(ClientEventKind::Disconnected { intentional: false });
                return;
            }
            Err(e) => {
                drop(credit);
                warn!("Connection {} read failed after {} bytes: {}", id, total, e);
                gate.close_with(ClientEventKind::Error(ConnectionError::Transport(
                    e.to_string(),
                )));
                return;
            }
        }
    }
}
