//! Core audio data types
//!
//! Defines the decoded PCM buffer handed from the decode worker to the render
//! context, and the de-interleaving step that produces its planar layout.

use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::time::Duration;
use thiserror::Error;

/// Sample format of decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Duration of `frames` sample frames in this format
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(frames.saturating_mul(1_000_000_000) / self.sample_rate as u64)
    }
}

/// Planar input that does not match its declared format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferLayoutError {
    #[error("Format declares {expected} channel(s), got {actual} plane(s)")]
    ChannelCount { expected: usize, actual: usize },

    #[error("Plane {channel} has {actual} samples, expected {expected}")]
    PlaneLength {
        channel: usize,
        expected: usize,
        actual: usize,
    },
}

/// One decoded MPEG frame worth of PCM audio.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Planar: all of channel 0, then all of channel 1 (single allocation)
///
/// Immutable once built; consumed exactly once by the buffer queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    format: AudioFormat,
    frame_count: usize,
    samples: Vec<f32>,
    timestamp: Option<Duration>,
}

impl DecodedAudioBuffer {
    /// Build a buffer from interleaved samples, de-interleaving once.
    ///
    /// # Errors
    /// Returns the allocator's error if the planar storage cannot be reserved.
    pub fn from_interleaved(
        format: AudioFormat,
        interleaved: &[f32],
        timestamp: Option<Duration>,
    ) -> Result<Self, TryReserveError> {
        let channels = format.channels.max(1) as usize;
        let frame_count = interleaved.len() / channels;

        let mut samples = Vec::new();
        samples.try_reserve_exact(frame_count * channels)?;
        samples.resize(frame_count * channels, 0.0);
        deinterleave(&interleaved[..frame_count * channels], channels, &mut samples);

        Ok(Self {
            format,
            frame_count,
            samples,
            timestamp,
        })
    }

    /// Build a buffer from already-planar channel data
    ///
    /// # Errors
    /// One plane per channel of `format` is required, all the same length.
    pub fn from_planes(
        format: AudioFormat,
        planes: &[&[f32]],
        timestamp: Option<Duration>,
    ) -> Result<Self, BufferLayoutError> {
        let channels = format.channels as usize;
        if channels == 0 || planes.len() != channels {
            return Err(BufferLayoutError::ChannelCount {
                expected: channels,
                actual: planes.len(),
            });
        }

        let frame_count = planes[0].len();
        if let Some((channel, plane)) = planes
            .iter()
            .enumerate()
            .find(|(_, p)| p.len() != frame_count)
        {
            return Err(BufferLayoutError::PlaneLength {
                channel,
                expected: frame_count,
                actual: plane.len(),
            });
        }

        let mut samples = Vec::with_capacity(frame_count * channels);
        for plane in planes {
            samples.extend_from_slice(plane);
        }

        Ok(Self {
            format,
            frame_count,
            samples,
            timestamp,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Presentation timestamp relative to the start of the connection
    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    /// Playback duration of this buffer
    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frame_count as u64)
    }

    /// Samples of one channel; empty if `channel` is out of range
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.frame_count;
        self.samples
            .get(start..start + self.frame_count)
            .unwrap_or(&[])
    }

    /// Sample at `frame` for `channel`, if in range
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> Option<f32> {
        if frame >= self.frame_count || channel >= self.format.channels as usize {
            return None;
        }
        self.samples.get(channel * self.frame_count + frame).copied()
    }
}

/// Split interleaved samples into planar layout.
///
/// `planar` must hold exactly `interleaved.len()` samples. Stereo takes the
/// paired path, mono is a straight copy, other counts use a strided loop.
pub fn deinterleave(interleaved: &[f32], channels: usize, planar: &mut [f32]) {
    debug_assert_eq!(interleaved.len(), planar.len());

    match channels {
        1 => planar.copy_from_slice(interleaved),
        2 => {
            let frames = interleaved.len() / 2;
            let (left, right) = planar.split_at_mut(frames);
            for ((pair, l), r) in interleaved
                .chunks_exact(2)
                .zip(left.iter_mut())
                .zip(right.iter_mut())
            {
                *l = pair[0];
                *r = pair[1];
            }
        }
        n => {
            let frames = interleaved.len() / n;
            for (frame, chunk) in interleaved.chunks_exact(n).enumerate() {
                for (ch, &sample) in chunk.iter().enumerate() {
                    planar[ch * frames + frame] = sample;
                }
            }
        }
    }
}
