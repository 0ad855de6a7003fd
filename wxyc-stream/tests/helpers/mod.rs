//! Test helper modules for wxyc-stream integration tests
//!
//! Provides reusable test infrastructure components:
//! - frames: synthetic MPEG-1 Layer III frames and ID3 tags
//! - MarkerBackend: codec backend whose output identifies the source frame
//! - MockServer: scripted HTTP stream server on localhost

#![allow(dead_code)]

pub mod frames;
pub mod mock_server;
pub mod test_backend;

// Re-export commonly used types
pub use frames::{frame, frames, id3_tag, mono_frame, silent_frames, FRAME_LEN};
pub use mock_server::{closed_port_url, MockServer, Reply};
pub use test_backend::{marker_of, MarkerBackend};

use std::time::Duration;
use tokio::sync::broadcast;
use wxyc_common::{ConnectionState, EngineEvent};

/// Receive engine events until `done` accepts one, returning everything seen.
///
/// Panics if `limit` elapses first.
pub async fn collect_until<F>(
    events: &mut broadcast::Receiver<EngineEvent>,
    limit: Duration,
    mut done: F,
) -> Vec<EngineEvent>
where
    F: FnMut(&EngineEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                panic!("Test subscriber lagged by {} events", n)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("Event bus closed; events so far: {:?}", seen)
            }
            Err(_) => panic!("Timed out after {:?}; events so far: {:?}", limit, seen),
        }
    }
}

/// Wait until a `StateChanged` into a state matching `target` arrives
pub async fn wait_for_state<F>(
    events: &mut broadcast::Receiver<EngineEvent>,
    mut target: F,
) -> Vec<EngineEvent>
where
    F: FnMut(&ConnectionState) -> bool,
{
    collect_until(events, Duration::from_secs(5), |event| {
        matches!(event, EngineEvent::StateChanged { new_state, .. } if target(new_state))
    })
    .await
}

/// `new_state` of every `StateChanged` in `events`, in order
pub fn state_path(events: &[EngineEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::StateChanged { new_state, .. } => Some(*new_state),
            _ => None,
        })
        .collect()
}
