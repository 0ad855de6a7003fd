//! Realtime render consumer
//!
//! Runs inside the audio device callback (or any other realtime context).
//! Nothing here blocks, locks or allocates: the queue pop is lock-free, spent
//! buffers go back through the SPSC ring, and all shared state is atomics.
//!
//! **Playback gate:** the session opens the gate when the buffering threshold
//! is reached and closes it on stall, pause, stop and reconnect. While closed
//! the consumer renders silence and does not pull from the queue, so the
//! queue can refill.

use crate::audio::types::DecodedAudioBuffer;
use crate::playback::buffer_queue::QueueConsumer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters and gate shared between the render consumer and the session
#[derive(Debug, Default)]
pub struct RenderShared {
    gate_open: AtomicBool,
    underruns: AtomicU64,
    frames_rendered: AtomicU64,
    buffers_consumed: AtomicU64,
}

impl RenderShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_gate(&self) {
        self.gate_open.store(true, Ordering::Release);
    }

    pub fn close_gate(&self) {
        self.gate_open.store(false, Ordering::Release);
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open.load(Ordering::Acquire)
    }

    /// Times the queue ran dry with the gate open (one per dry spell)
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Sample frames copied out of decoded buffers
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn buffers_consumed(&self) -> u64 {
        self.buffers_consumed.load(Ordering::Relaxed)
    }
}

/// Render-context end of the pipeline
pub struct RenderConsumer {
    queue: QueueConsumer,
    shared: Arc<RenderShared>,
    current: Option<Arc<DecodedAudioBuffer>>,
    cursor: usize,
    starved: bool,
}

impl RenderConsumer {
    pub fn new(queue: QueueConsumer, shared: Arc<RenderShared>) -> Self {
        Self {
            queue,
            shared,
            current: None,
            cursor: 0,
            starved: false,
        }
    }

    /// Fill interleaved `out` with `out_channels` channels of audio.
    ///
    /// Mono sources are copied to every output channel; output channels
    /// beyond the source's get silence. Any part that cannot be filled from
    /// the queue is silence.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize) {
        let out_channels = out_channels.max(1);

        if !self.shared.is_gate_open() {
            self.drop_current();
            out.fill(0.0);
            return;
        }

        let total = out.len() / out_channels;
        let mut written = 0;
        while written < total {
            let buffer = match self.current.as_ref() {
                Some(buffer) if self.cursor < buffer.frame_count() => buffer,
                _ => {
                    self.drop_current();
                    match self.next_from_queue() {
                        Some(buffer) => {
                            self.current = Some(buffer);
                            continue;
                        }
                        None => break,
                    }
                }
            };

            let count = (buffer.frame_count() - self.cursor).min(total - written);
            let source_channels = buffer.channels().max(1) as usize;
            for ch in 0..out_channels {
                let source = if source_channels == 1 { 0 } else { ch };
                if source >= source_channels {
                    for i in 0..count {
                        out[(written + i) * out_channels + ch] = 0.0;
                    }
                    continue;
                }
                let plane = &buffer.channel(source)[self.cursor..self.cursor + count];
                for (i, &sample) in plane.iter().enumerate() {
                    out[(written + i) * out_channels + ch] = sample;
                }
            }

            self.cursor += count;
            written += count;
        }

        out[written * out_channels..].fill(0.0);

        if written > 0 {
            self.shared
                .frames_rendered
                .fetch_add(written as u64, Ordering::Relaxed);
        }
    }

    /// Take the next whole buffer, for consumers that do their own rendering.
    ///
    /// Returns `None` while the gate is closed or the queue is empty. Pass the
    /// buffer to `release` when done with it.
    pub fn pop_buffer(&mut self) -> Option<Arc<DecodedAudioBuffer>> {
        if !self.shared.is_gate_open() {
            return None;
        }
        let buffer = self.next_from_queue()?;
        self.shared
            .frames_rendered
            .fetch_add(buffer.frame_count() as u64, Ordering::Relaxed);
        Some(buffer)
    }

    /// Return a buffer obtained from `pop_buffer`
    pub fn release(&mut self, buffer: Arc<DecodedAudioBuffer>) {
        self.queue.release(buffer);
    }

    pub fn shared(&self) -> &Arc<RenderShared> {
        &self.shared
    }

    fn next_from_queue(&mut self) -> Option<Arc<DecodedAudioBuffer>> {
        match self.queue.pop() {
            Some(buffer) => {
                self.starved = false;
                self.shared.buffers_consumed.fetch_add(1, Ordering::Relaxed);
                Some(buffer)
            }
            None => {
                if !self.starved {
                    self.starved = true;
                    self.shared.underruns.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    fn drop_current(&mut self) {
        if let Some(buffer) = self.current.take() {
            self.queue.release(buffer);
        }
        self.cursor = 0;
    }
}
