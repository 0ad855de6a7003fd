//! Bounded buffer queue between the decode worker and the render context
//!
//! - Queue: crossbeam bounded channel of `Arc<DecodedAudioBuffer>` (lock-free
//!   pop from the render side)
//! - Spent ring: ringbuf SPSC ring carrying consumed buffers back to the
//!   producer so they are freed on the decode thread, not the realtime one
//!
//! The producer keeps its own receiver handle so it can evict the oldest
//! buffer (drop-oldest policy) and clear the queue on reset.

use crate::audio::types::DecodedAudioBuffer;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use tracing::trace;
use wxyc_common::OverflowPolicy;

/// Result of offering a buffer to the queue
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Buffer queued; `buffered` is the queue length afterwards
    Enqueued { buffered: usize },
    /// Queue was full; the oldest buffer was discarded to make room
    DroppedOldest { buffered: usize },
    /// Queue is full under `BlockProducer`; the buffer is handed back
    Full(Arc<DecodedAudioBuffer>),
}

impl EnqueueOutcome {
    /// Queue length after a successful enqueue
    pub fn buffered(&self) -> Option<usize> {
        match self {
            EnqueueOutcome::Enqueued { buffered } | EnqueueOutcome::DroppedOldest { buffered } => {
                Some(*buffered)
            }
            EnqueueOutcome::Full(_) => None,
        }
    }
}

/// Create a queue of `capacity` buffers with the given overflow policy
pub fn buffer_queue(capacity: usize, policy: OverflowPolicy) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let (spent_prod, spent_cons) = HeapRb::<Arc<DecodedAudioBuffer>>::new(capacity * 2).split();

    let producer = QueueProducer {
        tx,
        rx: rx.clone(),
        spent: spent_cons,
        policy,
        capacity,
        dropped: 0,
    };
    let consumer = QueueConsumer {
        rx,
        spent: spent_prod,
    };
    (producer, consumer)
}

/// Decode-side half
pub struct QueueProducer {
    tx: Sender<Arc<DecodedAudioBuffer>>,
    rx: Receiver<Arc<DecodedAudioBuffer>>,
    spent: HeapCons<Arc<DecodedAudioBuffer>>,
    policy: OverflowPolicy,
    capacity: usize,
    dropped: u64,
}

impl QueueProducer {
    /// Offer a buffer. Never blocks.
    pub fn enqueue(&mut self, buffer: Arc<DecodedAudioBuffer>) -> EnqueueOutcome {
        self.reclaim();

        let buffer = match self.tx.try_send(buffer) {
            Ok(()) => {
                return EnqueueOutcome::Enqueued {
                    buffered: self.tx.len(),
                }
            }
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => buffer,
        };

        match self.policy {
            OverflowPolicy::BlockProducer => EnqueueOutcome::Full(buffer),
            OverflowPolicy::DropOldest => {
                if let Ok(oldest) = self.rx.try_recv() {
                    self.dropped += 1;
                    trace!("Queue full, dropped oldest buffer ({} total)", self.dropped);
                    drop(oldest);
                }
                match self.tx.try_send(buffer) {
                    Ok(()) => EnqueueOutcome::DroppedOldest {
                        buffered: self.tx.len(),
                    },
                    Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                        EnqueueOutcome::Full(buffer)
                    }
                }
            }
        }
    }

    /// Free buffers the render side has finished with
    pub fn reclaim(&mut self) -> usize {
        let mut freed = 0;
        while let Some(buffer) = self.spent.try_pop() {
            drop(buffer);
            freed += 1;
        }
        freed
    }

    /// Discard everything queued
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.rx.try_recv().is_ok() {
            cleared += 1;
        }
        self.reclaim();
        cleared
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Buffers evicted by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Render-side half
///
/// `pop` and `release` never block, lock or allocate.
pub struct QueueConsumer {
    rx: Receiver<Arc<DecodedAudioBuffer>>,
    spent: HeapProd<Arc<DecodedAudioBuffer>>,
}

impl QueueConsumer {
    #[inline]
    pub fn pop(&mut self) -> Option<Arc<DecodedAudioBuffer>> {
        self.rx.try_recv().ok()
    }

    /// Hand a finished buffer back for deallocation on the decode side
    #[inline]
    pub fn release(&mut self, buffer: Arc<DecodedAudioBuffer>) {
        // Ring full means the producer is not reclaiming; drop here instead
        if let Err(buffer) = self.spent.try_push(buffer) {
            drop(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
