//! Audio decoding and output
//!
//! - `frame_header` - MPEG audio header parsing
//! - `decoder` - incremental frame sync and decode
//! - `backend` - codec backends behind `FrameBackend`
//! - `types` - decoded PCM buffer
//! - `output` - render sinks

pub mod backend;
pub mod decoder;
pub mod frame_header;
pub mod output;
pub mod types;

pub use backend::{BackendError, DecodedFrame, FrameBackend, SymphoniaBackend};
pub use decoder::{DecodeError, DecoderStats, FrameDecoder, RawByteAccumulator, MIN_SYNC_BYTES};
pub use frame_header::{FrameHeader, MpegLayer, MpegVersion, StreamFormat};
pub use output::NullOutput;
#[cfg(feature = "output")]
pub use output::CpalOutput;
pub use types::{AudioFormat, BufferLayoutError, DecodedAudioBuffer};
