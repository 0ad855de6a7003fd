//! Decode worker thread
//!
//! One dedicated OS thread owns the `FrameDecoder` and the producer half of
//! the buffer queue. Chunks arrive over a channel in submission order and are
//! decoded strictly sequentially.
//!
//! **Generations:** every chunk is tagged with the decode generation current
//! when it was submitted. `reset()` bumps the shared generation atomically,
//! so chunks and frames from before the reset are abandoned even if they are
//! already queued or mid-decode. Every event the worker reports carries the
//! generation it was produced under.
//!
//! **End of stream:** `drain()` queues a marker behind the chunks already
//! submitted. The worker answers with `Drained` once everything before it has
//! been decoded and queued, so a connection's last frames are not lost to the
//! reset that follows its end.
//!
//! A chunk's read-ahead credit is released only after the chunk is fully
//! decoded and its buffers queued. Under `BlockProducer` this holds the
//! network reader back while the queue is full.

use crate::audio::decoder::{DecodeError, FrameDecoder};
use crate::audio::types::{AudioFormat, DecodedAudioBuffer};
use crate::network::StreamChunk;
use crate::playback::buffer_queue::{EnqueueOutcome, QueueProducer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace};

/// Poll interval while waiting for queue space under `BlockProducer`
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Commands accepted by the worker
#[derive(Debug)]
pub enum DecodeCommand {
    Chunk { generation: u64, chunk: StreamChunk },
    Drain { generation: u64 },
    Reset { generation: u64 },
    Shutdown,
}

/// Reports from the worker to the session
#[derive(Debug, Clone)]
pub enum DecodeEvent {
    /// Sync established (or the stream format changed)
    FormatDetected { generation: u64, format: AudioFormat },
    /// A buffer was queued; `buffered` is the queue length afterwards
    Enqueued { generation: u64, buffered: usize },
    /// Decoding cannot continue for this generation
    Fatal { generation: u64, error: DecodeError },
    /// Every chunk submitted before the matching `drain()` has been handled
    Drained { generation: u64 },
}

impl DecodeEvent {
    pub fn generation(&self) -> u64 {
        match self {
            DecodeEvent::FormatDetected { generation, .. }
            | DecodeEvent::Enqueued { generation, .. }
            | DecodeEvent::Fatal { generation, .. }
            | DecodeEvent::Drained { generation } => *generation,
        }
    }
}

/// Cloneable handle for submitting work
#[derive(Clone)]
pub struct DecodeWorkerHandle {
    commands: mpsc::UnboundedSender<DecodeCommand>,
    generation: Arc<AtomicU64>,
}

impl DecodeWorkerHandle {
    /// Queue a chunk under the current generation.
    ///
    /// Returns false if the worker has exited.
    pub fn submit(&self, chunk: impl Into<StreamChunk>) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        self.commands
            .send(DecodeCommand::Chunk {
                generation,
                chunk: chunk.into(),
            })
            .is_ok()
    }

    /// Ask for a `Drained` event once all chunks submitted so far are done.
    ///
    /// Returns false if the worker has exited.
    pub fn drain(&self) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        self.commands.send(DecodeCommand::Drain { generation }).is_ok()
    }

    /// Abandon all in-flight work and clear decoder and queue.
    ///
    /// Returns the new generation.
    pub fn reset(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.commands.send(DecodeCommand::Reset { generation });
        generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Ask the worker to exit; in-flight work is abandoned
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = self.commands.send(DecodeCommand::Shutdown);
    }
}

/// Worker thread state
pub struct DecodeWorker {
    decoder: FrameDecoder,
    producer: QueueProducer,
    events: mpsc::UnboundedSender<DecodeEvent>,
    tap: broadcast::Sender<Arc<DecodedAudioBuffer>>,
    generation: Arc<AtomicU64>,
    last_format: Option<AudioFormat>,
    failed: bool,
}

impl DecodeWorker {
    /// Start the worker thread
    ///
    /// Decoded buffers are also sent to `tap` while it has subscribers.
    pub fn spawn(
        decoder: FrameDecoder,
        producer: QueueProducer,
        events: mpsc::UnboundedSender<DecodeEvent>,
        tap: broadcast::Sender<Arc<DecodedAudioBuffer>>,
    ) -> std::io::Result<(DecodeWorkerHandle, JoinHandle<()>)> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        let worker = DecodeWorker {
            decoder,
            producer,
            events,
            tap,
            generation: Arc::clone(&generation),
            last_format: None,
            failed: false,
        };

        let thread = std::thread::Builder::new()
            .name("wxyc-decoder".to_string())
            .spawn(move || worker.run(commands_rx))?;

        Ok((
            DecodeWorkerHandle {
                commands: commands_tx,
                generation,
            },
            thread,
        ))
    }

    fn run(mut self, mut commands: mpsc::UnboundedReceiver<DecodeCommand>) {
        info!("Decode worker started");

        while let Some(command) = commands.blocking_recv() {
            match command {
                DecodeCommand::Chunk { generation, chunk } => {
                    if generation != self.current_generation() || self.failed {
                        trace!("Dropping stale chunk ({} bytes, gen {})", chunk.len(), generation);
                        continue;
                    }
                    self.decoder.append(&chunk);
                    self.decode_pending(generation);
                }
                DecodeCommand::Drain { generation } => {
                    if generation == self.current_generation() {
                        trace!("Drained (gen {})", generation);
                        let _ = self.events.send(DecodeEvent::Drained { generation });
                    }
                }
                DecodeCommand::Reset { generation } => {
                    self.decoder.reset();
                    let cleared = self.producer.clear();
                    self.last_format = None;
                    self.failed = false;
                    debug!("Decoder reset (gen {}, {} queued buffers cleared)", generation, cleared);
                }
                DecodeCommand::Shutdown => break,
            }
        }

        self.producer.clear();
        info!(
            "Decode worker stopped ({} frames decoded, {} skipped)",
            self.decoder.stats().frames_decoded,
            self.decoder.stats().frames_skipped
        );
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Decode every complete frame currently buffered
    fn decode_pending(&mut self, generation: u64) {
        loop {
            if generation != self.current_generation() {
                trace!("Generation {} abandoned mid-decode", generation);
                return;
            }

            let buffer = match self.decoder.next_buffer() {
                Ok(Some(buffer)) => buffer,
                Ok(None) => return,
                Err(e) => {
                    error!("Fatal decode error: {}", e);
                    self.failed = true;
                    let _ = self.events.send(DecodeEvent::Fatal {
                        generation,
                        error: e,
                    });
                    return;
                }
            };

            let format = buffer.format();
            if self.last_format != Some(format) {
                self.last_format = Some(format);
                info!(
                    "Stream format: {} Hz, {} channel(s)",
                    format.sample_rate, format.channels
                );
                let _ = self
                    .events
                    .send(DecodeEvent::FormatDetected { generation, format });
            }

            let buffer = Arc::new(buffer);
            if self.tap.receiver_count() > 0 {
                let _ = self.tap.send(Arc::clone(&buffer));
            }

            match self.enqueue(buffer, generation) {
                Some(buffered) => {
                    let _ = self
                        .events
                        .send(DecodeEvent::Enqueued { generation, buffered });
                }
                None => return,
            }
        }
    }

    /// Enqueue, waiting for space under `BlockProducer`.
    ///
    /// Returns `None` if the generation changed while waiting.
    fn enqueue(&mut self, buffer: Arc<DecodedAudioBuffer>, generation: u64) -> Option<usize> {
        let mut pending = buffer;
        loop {
            match self.producer.enqueue(pending) {
                EnqueueOutcome::Full(returned) => {
                    if generation != self.current_generation() {
                        return None;
                    }
                    pending = returned;
                    std::thread::sleep(BLOCK_POLL_INTERVAL);
                }
                outcome => return outcome.buffered(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{BackendError, DecodedFrame, FrameBackend};
    use crate::audio::frame_header::FrameHeader;
    use crate::playback::buffer_queue::{buffer_queue, QueueConsumer};
    use bytes::Bytes;
    use std::time::Instant;
    use wxyc_common::OverflowPolicy;

    /// Emits the frame's fifth byte as every sample; `unsupported` marks the
    /// frame the backend refuses outright
    #[derive(Default)]
    struct ConstBackend {
        scratch: Vec<f32>,
        unsupported: Option<u8>,
    }

    impl FrameBackend for ConstBackend {
        fn name(&self) -> &'static str {
            "const"
        }

        fn decode_frame(
            &mut self,
            header: &FrameHeader,
            frame: &[u8],
        ) -> Result<DecodedFrame<'_>, BackendError> {
            if Some(frame[4]) == self.unsupported {
                return Err(BackendError::Unsupported("free format".to_string()));
            }
            self.scratch.clear();
            self.scratch
                .resize(header.samples_per_frame * 2, frame[4] as f32);
            Ok(DecodedFrame {
                samples: &self.scratch,
                channels: 2,
                sample_rate: header.sample_rate,
            })
        }

        fn reset(&mut self) {}
    }

    fn frame(marker: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        frame[4] = marker;
        frame
    }

    fn frames(count: usize) -> Vec<u8> {
        frames_from(0, count)
    }

    fn frames_from(first: u8, count: usize) -> Vec<u8> {
        (0..count).flat_map(|i| frame(first + i as u8)).collect()
    }

    fn spawn_with(
        backend: ConstBackend,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (
        DecodeWorkerHandle,
        JoinHandle<()>,
        QueueConsumer,
        mpsc::UnboundedReceiver<DecodeEvent>,
    ) {
        let (producer, consumer) = buffer_queue(capacity, policy);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tap, _) = broadcast::channel(4);
        let decoder = FrameDecoder::new(Box::new(backend));
        let (handle, thread) = DecodeWorker::spawn(decoder, producer, events_tx, tap).unwrap();
        (handle, thread, consumer, events_rx)
    }

    fn spawn(
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (
        DecodeWorkerHandle,
        JoinHandle<()>,
        QueueConsumer,
        mpsc::UnboundedReceiver<DecodeEvent>,
    ) {
        spawn_with(ConstBackend::default(), capacity, policy)
    }

    fn wait_for_len(consumer: &QueueConsumer, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while consumer.len() < len && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Events up to and including the first `Drained`
    fn until_drained(events: &mut mpsc::UnboundedReceiver<DecodeEvent>) -> Vec<DecodeEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            match events.try_recv() {
                Ok(event) => {
                    let done = matches!(event, DecodeEvent::Drained { .. });
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(_) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        panic!("Worker never drained; events so far: {:?}", seen);
    }

    #[test]
    fn test_decodes_and_reports() {
        let (handle, thread, mut consumer, mut events) = spawn(16, OverflowPolicy::DropOldest);
        assert!(handle.submit(Bytes::from(frames(6))));
        wait_for_len(&consumer, 6);

        handle.shutdown();
        thread.join().unwrap();

        let mut enqueued = Vec::new();
        let mut formats = 0;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.generation(), 0);
            match event {
                DecodeEvent::FormatDetected { format, .. } => {
                    formats += 1;
                    assert_eq!(format, AudioFormat::new(44100, 2));
                }
                DecodeEvent::Enqueued { buffered, .. } => enqueued.push(buffered),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(formats, 1);
        assert_eq!(enqueued, vec![1, 2, 3, 4, 5, 6]);
        // Shutdown clears the queue
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_drained_follows_every_submitted_frame() {
        let (handle, thread, consumer, mut events) = spawn(16, OverflowPolicy::DropOldest);
        for chunk in frames(10).chunks(300) {
            assert!(handle.submit(Bytes::copy_from_slice(chunk)));
        }
        assert!(handle.drain());

        let seen = until_drained(&mut events);
        let enqueued = seen
            .iter()
            .filter(|e| matches!(e, DecodeEvent::Enqueued { .. }))
            .count();
        assert_eq!(enqueued, 10);
        assert_eq!(consumer.len(), 10);
        assert!(matches!(seen.last(), Some(DecodeEvent::Drained { generation: 0 })));

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn test_drain_from_old_generation_is_not_acknowledged() {
        let (handle, thread, consumer, mut events) = spawn(2, OverflowPolicy::BlockProducer);
        // The worker blocks on the full queue with the drain marker behind it
        handle.submit(Bytes::from(frames(6)));
        handle.drain();
        wait_for_len(&consumer, 2);

        let generation = handle.reset();
        handle.drain();

        let seen = until_drained(&mut events);
        let drained: Vec<u64> = seen
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::Drained { generation } => Some(*generation),
                _ => None,
            })
            .collect();
        assert_eq!(drained, vec![generation]);

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn test_fatal_error_stops_generation_until_reset() {
        let backend = ConstBackend {
            unsupported: Some(3),
            ..ConstBackend::default()
        };
        let (handle, thread, consumer, mut events) =
            spawn_with(backend, 16, OverflowPolicy::DropOldest);

        handle.submit(Bytes::from(frames(6)));
        // Later chunks of the failed generation are dropped unread
        handle.submit(Bytes::from(frames_from(10, 6)));
        handle.drain();
        let seen = until_drained(&mut events);

        let enqueued = seen
            .iter()
            .filter(|e| matches!(e, DecodeEvent::Enqueued { .. }))
            .count();
        assert_eq!(enqueued, 3);
        let fatal: Vec<&DecodeError> = seen
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::Fatal { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(
            fatal,
            vec![&DecodeError::Unsupported("free format".to_string())]
        );
        assert_eq!(consumer.len(), 3);

        // A reset clears the failure
        let generation = handle.reset();
        handle.submit(Bytes::from(frames_from(10, 6)));
        handle.drain();
        let seen = until_drained(&mut events);
        assert!(seen.iter().all(|e| e.generation() == generation));
        assert!(seen.iter().all(|e| !matches!(e, DecodeEvent::Fatal { .. })));
        assert_eq!(consumer.len(), 6);

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn test_reset_discards_stale_chunks() {
        let (handle, thread, consumer, mut events) = spawn(16, OverflowPolicy::DropOldest);
        let data = frames(6);
        handle.submit(Bytes::copy_from_slice(&data[..1000]));
        let generation = handle.reset();
        assert_eq!(generation, 1);

        handle.submit(Bytes::from(data));
        wait_for_len(&consumer, 6);
        assert_eq!(consumer.len(), 6);

        handle.shutdown();
        thread.join().unwrap();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.generation(), 1);
        }
    }

    #[test]
    fn test_block_producer_unblocks_on_reset() {
        let (handle, thread, consumer, _events) = spawn(2, OverflowPolicy::BlockProducer);
        handle.submit(Bytes::from(frames(6)));
        wait_for_len(&consumer, 2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(consumer.len(), 2);

        handle.reset();
        handle.shutdown();
        thread.join().unwrap();
    }
}
