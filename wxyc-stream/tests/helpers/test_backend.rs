//! Deterministic codec backend
//!
//! Every sample of a decoded frame equals the frame's marker byte (byte 4),
//! so tests can tell which input frame a buffer came from. It can also be
//! told to reject one marker as an unsupported stream.

use wxyc_stream::audio::backend::{BackendError, DecodedFrame, FrameBackend};
use wxyc_stream::audio::frame_header::FrameHeader;

#[derive(Default)]
pub struct MarkerBackend {
    scratch: Vec<f32>,
    unsupported: Option<u8>,
}

impl MarkerBackend {
    pub fn boxed() -> Box<dyn FrameBackend> {
        Box::new(Self::default())
    }

    /// Fails with `Unsupported` on the frame carrying `marker`
    pub fn refusing(marker: u8) -> Box<dyn FrameBackend> {
        Box::new(Self {
            unsupported: Some(marker),
            ..Self::default()
        })
    }
}

impl FrameBackend for MarkerBackend {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn decode_frame(
        &mut self,
        header: &FrameHeader,
        frame: &[u8],
    ) -> Result<DecodedFrame<'_>, BackendError> {
        let marker = frame
            .get(4)
            .copied()
            .ok_or_else(|| BackendError::Corrupt("frame shorter than header".to_string()))?;
        if Some(marker) == self.unsupported {
            return Err(BackendError::Unsupported(format!("marker {}", marker)));
        }
        self.scratch.clear();
        self.scratch
            .resize(header.samples_per_frame * header.channels as usize, marker as f32);
        Ok(DecodedFrame {
            samples: &self.scratch,
            channels: header.channels,
            sample_rate: header.sample_rate,
        })
    }

    fn reset(&mut self) {}
}

/// Marker of a decoded buffer (its first sample)
pub fn marker_of(buffer: &wxyc_stream::DecodedAudioBuffer) -> u8 {
    buffer.sample(0, 0).map(|s| s as u8).unwrap_or(u8::MAX)
}
