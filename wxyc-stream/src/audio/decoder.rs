//! Incremental MPEG audio frame decoder
//!
//! Consumes the raw byte stream in whatever chunk sizes the network delivers,
//! locates frame sync, and produces one `DecodedAudioBuffer` per frame.
//!
//! **Synchronization:**
//! - Waits for `MIN_SYNC_BYTES` before the first scan so a false sync near
//!   the start of a short read is not locked in
//! - A candidate header is accepted only when the next two headers, found by
//!   walking computed frame lengths, agree on version, layer and sample rate
//! - A leading ID3v2 tag is skipped by its declared size
//! - Losing sync mid-stream drops the format and rescans
//!
//! **Decoding:** exactly one complete frame per backend call. Frames the
//! backend rejects are consumed and skipped.

use crate::audio::backend::{BackendError, FrameBackend};
use crate::audio::frame_header::{FrameHeader, StreamFormat, HEADER_LEN};
use crate::audio::types::{AudioFormat, DecodedAudioBuffer};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};

/// Bytes that must be buffered before synchronization is attempted
pub const MIN_SYNC_BYTES: usize = 2048;

/// Consecutive compatible headers required to confirm sync
const SYNC_CHAIN_LEN: usize = 3;

const ID3V2_HEADER_LEN: usize = 10;

/// Fatal decode errors
///
/// Recoverable conditions (garbage, lost sync, corrupt frames) never surface
/// as errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Output buffer allocation failed
    #[error("Failed to allocate {bytes} bytes for decoded audio")]
    Allocation { bytes: usize },

    /// Codec backend cannot decode this stream
    #[error("Unsupported stream: {0}")]
    Unsupported(String),
}

/// Append-only, prefix-consumable byte buffer
///
/// Also tracks bytes still to be discarded from future appends (the tail of
/// an ID3v2 tag that has not arrived yet).
#[derive(Debug, Default)]
pub struct RawByteAccumulator {
    bytes: BytesMut,
    pending_skip: usize,
}

impl RawByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        let skip = self.pending_skip.min(data.len());
        self.pending_skip -= skip;
        self.bytes.extend_from_slice(&data[skip..]);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remove `count` bytes from the front; `count` must not exceed `len()`
    pub fn consume(&mut self, count: usize) {
        self.bytes.advance(count);
    }

    /// Remove `count` bytes from the front, including bytes not yet appended
    pub fn skip(&mut self, count: usize) {
        let now = count.min(self.bytes.len());
        self.bytes.advance(now);
        self.pending_skip += count - now;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.pending_skip = 0;
    }
}

/// Running counters for one decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_skipped: u64,
    pub bytes_discarded: u64,
    pub resyncs: u64,
}

enum ChainCheck {
    Confirmed,
    Incomplete,
    Broken,
}

/// Incremental frame decoder
///
/// Owned by the decode worker; not shared.
pub struct FrameDecoder {
    accumulator: RawByteAccumulator,
    format: Option<StreamFormat>,
    backend: Box<dyn FrameBackend>,
    samples_decoded: u64,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(backend: Box<dyn FrameBackend>) -> Self {
        debug!("Frame decoder using {} backend", backend.name());
        Self {
            accumulator: RawByteAccumulator::new(),
            format: None,
            backend,
            samples_decoded: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Append newly received bytes
    pub fn append(&mut self, data: &[u8]) {
        trace!("Appending {} bytes ({} buffered)", data.len(), self.accumulator.len());
        self.accumulator.append(data);
    }

    /// Format of the synchronized stream, if sync has been established
    pub fn format(&self) -> Option<AudioFormat> {
        self.format.map(|f| f.audio_format())
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn buffered_bytes(&self) -> usize {
        self.accumulator.len()
    }

    /// Decode the next complete frame from the front of the accumulator.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    /// Only fatal conditions: output allocation failure or a backend that
    /// cannot decode the stream.
    pub fn next_buffer(&mut self) -> Result<Option<DecodedAudioBuffer>, DecodeError> {
        loop {
            let Some(format) = self.format else {
                if self.synchronize() {
                    continue;
                }
                return Ok(None);
            };

            let data = self.accumulator.as_slice();
            if data.len() < HEADER_LEN {
                return Ok(None);
            }

            let header = match FrameHeader::parse(data) {
                Some(header) if format.accepts(&header) => header,
                _ => {
                    debug!(
                        "Lost frame sync ({} bytes buffered), resynchronizing",
                        data.len()
                    );
                    self.format = None;
                    self.stats.resyncs += 1;
                    self.backend.reset();
                    continue;
                }
            };

            if data.len() < header.frame_len {
                return Ok(None);
            }

            let frame = &data[..header.frame_len];
            let buffer = match self.backend.decode_frame(&header, frame) {
                Ok(decoded) => {
                    let format = AudioFormat::new(decoded.sample_rate, decoded.channels);
                    let timestamp = format.frames_to_duration(self.samples_decoded);
                    let bytes = decoded.samples.len() * std::mem::size_of::<f32>();
                    DecodedAudioBuffer::from_interleaved(format, decoded.samples, Some(timestamp))
                        .map_err(|_| DecodeError::Allocation { bytes })?
                }
                Err(BackendError::Corrupt(reason)) => {
                    debug!("Skipping corrupt frame ({} bytes): {}", header.frame_len, reason);
                    self.accumulator.consume(header.frame_len);
                    self.stats.frames_skipped += 1;
                    continue;
                }
                Err(BackendError::Unsupported(reason)) => {
                    return Err(DecodeError::Unsupported(reason));
                }
            };

            self.accumulator.consume(header.frame_len);
            self.samples_decoded += buffer.frame_count() as u64;
            self.stats.frames_decoded += 1;
            return Ok(Some(buffer));
        }
    }

    /// Discard all buffered bytes, the stream format, and backend state
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.format = None;
        self.backend.reset();
        self.samples_decoded = 0;
    }

    /// Try to establish sync at the front of the accumulator.
    ///
    /// Returns true once a format is locked; leading junk is discarded.
    fn synchronize(&mut self) -> bool {
        if let Some(tag_len) = id3v2_tag_len(self.accumulator.as_slice()) {
            debug!("Skipping ID3v2 tag ({} bytes)", tag_len);
            self.accumulator.skip(tag_len);
            self.stats.bytes_discarded += tag_len as u64;
        }

        if self.accumulator.len() < MIN_SYNC_BYTES {
            return false;
        }

        let data = self.accumulator.as_slice();
        let mut offset = 0;
        while offset + HEADER_LEN <= data.len() {
            if data[offset] == 0xFF {
                if let Some(header) = FrameHeader::parse(&data[offset..]) {
                    match check_chain(&data[offset..], &header) {
                        ChainCheck::Confirmed => {
                            self.discard(offset);
                            self.format = Some(StreamFormat::from_header(&header));
                            debug!(
                                "Frame sync at offset {}: {:?} {:?}, {} Hz, {} channel(s), {} kbps",
                                offset,
                                header.version,
                                header.layer,
                                header.sample_rate,
                                header.channels,
                                header.bitrate_kbps
                            );
                            return true;
                        }
                        ChainCheck::Incomplete => {
                            self.discard(offset);
                            return false;
                        }
                        ChainCheck::Broken => {}
                    }
                }
            }
            offset += 1;
        }

        // Keep a possible partial header at the tail
        let junk = data.len().saturating_sub(HEADER_LEN - 1);
        self.discard(junk);
        false
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            trace!("Discarding {} unsynchronized bytes", count);
            self.accumulator.consume(count);
            self.stats.bytes_discarded += count as u64;
        }
    }
}

/// Walk the frame chain starting at `data[0]`
fn check_chain(data: &[u8], first: &FrameHeader) -> ChainCheck {
    let mut pos = first.frame_len;
    for _ in 1..SYNC_CHAIN_LEN {
        if pos + HEADER_LEN > data.len() {
            return ChainCheck::Incomplete;
        }
        match FrameHeader::parse(&data[pos..]) {
            Some(next) if first.is_compatible(&next) => pos += next.frame_len,
            _ => return ChainCheck::Broken,
        }
    }
    ChainCheck::Confirmed
}

/// Total length of an ID3v2 tag at the start of `data`, if one is present
fn id3v2_tag_len(data: &[u8]) -> Option<usize> {
    if data.len() < ID3V2_HEADER_LEN || &data[..3] != b"ID3" {
        return None;
    }
    let size_bytes = &data[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | b as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("backend", &self.backend.name())
            .field("format", &self.format)
            .field("buffered", &self.accumulator.len())
            .field("stats", &self.stats)
            .finish()
    }
}
