//! Codec backends
//!
//! The frame decoder handles sync, framing and buffering itself and hands
//! exactly one complete MPEG frame at a time to a `FrameBackend` for the
//! actual sample reconstruction. The backend is chosen when the session is
//! built.

use crate::audio::frame_header::{FrameHeader, MpegLayer};
use std::sync::OnceLock;
use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecParameters, CodecRegistry, Decoder, DecoderOptions, CODEC_TYPE_MP1, CODEC_TYPE_MP2,
    CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use thiserror::Error;
use tracing::debug;

/// Backend failure for a single frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Frame data could not be decoded; the frame should be skipped
    #[error("Corrupt frame: {0}")]
    Corrupt(String),

    /// Backend cannot decode this stream at all
    #[error("Unsupported stream: {0}")]
    Unsupported(String),
}

/// PCM produced from one frame, borrowed from the backend's scratch buffer
#[derive(Debug)]
pub struct DecodedFrame<'a> {
    /// Interleaved samples
    pub samples: &'a [f32],
    pub channels: u16,
    pub sample_rate: u32,
}

/// Decodes one complete MPEG audio frame at a time
pub trait FrameBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Decode `frame` (header included, exactly `header.frame_len` bytes)
    fn decode_frame(
        &mut self,
        header: &FrameHeader,
        frame: &[u8],
    ) -> Result<DecodedFrame<'_>, BackendError>;

    /// Drop all inter-frame state (bit reservoir, overlap buffers)
    fn reset(&mut self);
}

/// Codec registry with the MPEG audio decoder only
fn get_codec_registry() -> &'static CodecRegistry {
    static CODEC_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    CODEC_REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry
    })
}

/// Parameters a symphonia decoder instance was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecoderKey {
    layer: MpegLayer,
    sample_rate: u32,
    channels: u16,
}

/// Frame backend built on symphonia's MPEG audio decoder.
///
/// Each frame is fed as one packet. The decoder instance is rebuilt whenever
/// the layer, sample rate or channel count changes.
pub struct SymphoniaBackend {
    decoder: Option<Box<dyn Decoder>>,
    key: Option<DecoderKey>,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_spec: Option<(SignalSpec, u64)>,
    next_ts: u64,
}

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self {
            decoder: None,
            key: None,
            sample_buf: None,
            sample_buf_spec: None,
            next_ts: 0,
        }
    }

    fn ensure_decoder(&mut self, header: &FrameHeader) -> Result<(), BackendError> {
        let key = DecoderKey {
            layer: header.layer,
            sample_rate: header.sample_rate,
            channels: header.channels,
        };
        if self.decoder.is_some() && self.key == Some(key) {
            return Ok(());
        }

        let codec = match header.layer {
            MpegLayer::Layer1 => CODEC_TYPE_MP1,
            MpegLayer::Layer2 => CODEC_TYPE_MP2,
            MpegLayer::Layer3 => CODEC_TYPE_MP3,
        };
        let channels = if header.channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(codec)
            .with_sample_rate(header.sample_rate)
            .with_channels(channels)
            .with_max_frames_per_packet(header.samples_per_frame as u64);

        let decoder = get_codec_registry()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| BackendError::Unsupported(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Created symphonia decoder: {:?} {} Hz, {} channel(s)",
            header.layer, header.sample_rate, header.channels
        );

        self.decoder = Some(decoder);
        self.key = Some(key);
        self.next_ts = 0;
        Ok(())
    }
}

impl Default for SymphoniaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBackend for SymphoniaBackend {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn decode_frame(
        &mut self,
        header: &FrameHeader,
        frame: &[u8],
    ) -> Result<DecodedFrame<'_>, BackendError> {
        self.ensure_decoder(header)?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(BackendError::Unsupported("decoder unavailable".to_string()));
        };

        let duration = header.samples_per_frame as u64;
        let packet = Packet::new_from_slice(0, self.next_ts, duration, frame);
        self.next_ts += duration;

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                // Rebuilt on the next frame
                self.key = None;
                return Err(BackendError::Corrupt("decoder reset required".to_string()));
            }
            Err(SymphoniaError::Unsupported(what)) => {
                return Err(BackendError::Unsupported(what.to_string()));
            }
            Err(e) => return Err(BackendError::Corrupt(e.to_string())),
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        if self.sample_buf_spec != Some((spec, capacity)) || self.sample_buf.is_none() {
            self.sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
            self.sample_buf_spec = Some((spec, capacity));
        }

        let Some(sample_buf) = self.sample_buf.as_mut() else {
            return Err(BackendError::Corrupt("no sample buffer".to_string()));
        };
        sample_buf.copy_interleaved_ref(decoded);

        Ok(DecodedFrame {
            samples: sample_buf.samples(),
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
        })
    }

    fn reset(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.next_ts = 0;
    }
}
