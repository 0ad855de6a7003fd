//! Integration tests for the decode worker, buffer queue and render consumer
//!
//! Covers ordering across concurrent submitters, overflow handling, and the
//! render side never waiting on a busy producer.

mod helpers;

use bytes::Bytes;
use helpers::{frame, frames, marker_of, MarkerBackend};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use wxyc_common::OverflowPolicy;
use wxyc_stream::audio::decoder::FrameDecoder;
use wxyc_stream::playback::{
    buffer_queue, DecodeEvent, DecodeWorker, EnqueueOutcome, QueueConsumer, RenderConsumer,
    RenderShared,
};
use wxyc_stream::{AudioFormat, DecodedAudioBuffer};

fn wait_for_len(consumer: &QueueConsumer, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while consumer.len() < len && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn buffer(marker: u8, frames: usize) -> Arc<DecodedAudioBuffer> {
    let format = AudioFormat::new(44100, 2);
    let samples = vec![marker as f32; frames * 2];
    Arc::new(DecodedAudioBuffer::from_interleaved(format, &samples, None).unwrap())
}

#[test]
fn test_concurrent_submitters_keep_submission_order() {
    const SUBMITTERS: usize = 4;
    const PER_SUBMITTER: usize = 10;
    let total = SUBMITTERS * PER_SUBMITTER;

    let (producer, mut consumer) = buffer_queue(64, OverflowPolicy::BlockProducer);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (tap, _) = broadcast::channel(4);
    let decoder = FrameDecoder::new(MarkerBackend::boxed());
    let (handle, thread) = DecodeWorker::spawn(decoder, producer, events_tx, tap).unwrap();

    // Markers are handed out under the same lock as the submit, so marker
    // order is submission order
    let next_marker = Arc::new(Mutex::new(0u8));
    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let handle = handle.clone();
            let next_marker = Arc::clone(&next_marker);
            std::thread::spawn(move || {
                for _ in 0..PER_SUBMITTER {
                    let mut marker = next_marker.lock().unwrap();
                    assert!(handle.submit(Bytes::from(frame(*marker))));
                    *marker += 1;
                    drop(marker);
                    std::thread::yield_now();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    wait_for_len(&consumer, total);
    let mut markers = Vec::new();
    while let Some(buffer) = consumer.pop() {
        markers.push(marker_of(&buffer));
        consumer.release(buffer);
    }
    assert_eq!(markers, (0..total as u8).collect::<Vec<_>>());

    handle.shutdown();
    thread.join().unwrap();

    let mut enqueued = 0;
    while let Ok(event) = events_rx.try_recv() {
        if let DecodeEvent::Enqueued { .. } = event {
            enqueued += 1;
        }
    }
    assert_eq!(enqueued, total);
}

#[test]
fn test_drop_oldest_keeps_newest() {
    let (mut producer, mut consumer) = buffer_queue(3, OverflowPolicy::DropOldest);
    for marker in 0..5 {
        let outcome = producer.enqueue(buffer(marker, 16));
        assert!(outcome.buffered().is_some());
    }
    assert_eq!(producer.dropped(), 2);

    let markers: Vec<u8> = std::iter::from_fn(|| consumer.pop())
        .map(|b| marker_of(&b))
        .collect();
    assert_eq!(markers, vec![2, 3, 4]);
}

#[test]
fn test_block_producer_hands_buffer_back() {
    let (mut producer, _consumer) = buffer_queue(2, OverflowPolicy::BlockProducer);
    producer.enqueue(buffer(0, 16));
    producer.enqueue(buffer(1, 16));
    match producer.enqueue(buffer(2, 16)) {
        EnqueueOutcome::Full(returned) => assert_eq!(marker_of(&returned), 2),
        other => panic!("Expected Full, got {:?}", other),
    }
    assert_eq!(producer.len(), 2);
}

#[test]
fn test_render_is_bounded_while_producer_is_busy() {
    let (mut producer, consumer) = buffer_queue(4, OverflowPolicy::DropOldest);
    let shared = Arc::new(RenderShared::new());
    let mut render = RenderConsumer::new(consumer, Arc::clone(&shared));
    shared.open_gate();

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let producer_stop = Arc::clone(&stop);
    let producer_thread = std::thread::spawn(move || {
        let mut marker = 0u8;
        while !producer_stop.load(std::sync::atomic::Ordering::Relaxed) {
            producer.enqueue(buffer(marker, 256));
            marker = marker.wrapping_add(1);
        }
    });

    let mut out = vec![0.0f32; 512 * 2];
    let mut slowest = Duration::ZERO;
    for _ in 0..2000 {
        let started = Instant::now();
        render.render(&mut out, 2);
        slowest = slowest.max(started.elapsed());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    producer_thread.join().unwrap();

    assert!(shared.frames_rendered() > 0);
    assert!(
        slowest < Duration::from_millis(50),
        "slowest render call took {:?}",
        slowest
    );
}

#[test]
fn test_render_with_closed_gate_leaves_queue_alone() {
    let (mut producer, consumer) = buffer_queue(8, OverflowPolicy::DropOldest);
    let shared = Arc::new(RenderShared::new());
    let mut render = RenderConsumer::new(consumer, Arc::clone(&shared));
    producer.enqueue(buffer(7, 64));

    let mut out = vec![1.0f32; 128];
    render.render(&mut out, 2);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(producer.len(), 1);
    assert_eq!(shared.underruns(), 0);

    shared.open_gate();
    render.render(&mut out, 2);
    assert!(out.iter().all(|&s| s == 7.0));
    assert_eq!(shared.buffers_consumed(), 1);
}

#[test]
fn test_worker_feeds_render_end_to_end() {
    let (producer, consumer) = buffer_queue(16, OverflowPolicy::DropOldest);
    let shared = Arc::new(RenderShared::new());
    let mut render = RenderConsumer::new(consumer, Arc::clone(&shared));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (tap, mut tapped) = broadcast::channel(16);
    let decoder = FrameDecoder::new(MarkerBackend::boxed());
    let (handle, thread) = DecodeWorker::spawn(decoder, producer, events_tx, tap).unwrap();

    handle.submit(Bytes::from(frames(6)));
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = 0;
    while seen < 6 && Instant::now() < deadline {
        match tapped.try_recv() {
            Ok(_) => seen += 1,
            Err(_) => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    assert_eq!(seen, 6);

    shared.open_gate();
    // Exactly one frame's worth: all samples come from marker 0
    let mut out = vec![-1.0f32; 1152 * 2];
    render.render(&mut out, 2);
    assert!(out.iter().all(|&s| s == 0.0));
    render.render(&mut out, 2);
    assert!(out.iter().all(|&s| s == 1.0));

    handle.shutdown();
    thread.join().unwrap();
}
