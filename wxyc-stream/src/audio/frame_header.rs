//! MPEG audio frame header parsing
//!
//! Header layout (4 bytes, big-endian bit order):
//!
//! ```text
//! byte0  11111111   frame sync
//! byte1  111VVLLP   sync, version, layer, protection
//! byte2  BBBBSSPx   bitrate index, sample-rate index, padding, private
//! byte3  CC......   channel mode (3 = mono), mode extension, flags
//! ```

use crate::audio::types::AudioFormat;

/// Size of a frame header in bytes
pub const HEADER_LEN: usize = 4;

/// MPEG version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// MPEG audio layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpegLayer {
    Layer1,
    Layer2,
    Layer3,
}

// Bitrates in kbps, indexed by the 4-bit bitrate field. Index 0 (free format)
// and 15 (bad) are rejected before lookup.
const BITRATES_V1_L1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATES_V1_L2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const BITRATES_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_V2_L1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const BITRATES_V2_L23: [u32; 15] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];
const SAMPLE_RATES_V2: [u32; 3] = [22050, 24000, 16000];
const SAMPLE_RATES_V25: [u32; 3] = [11025, 12000, 8000];

/// Parsed MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    /// Bitrate in kbps
    pub bitrate_kbps: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub padding: bool,
    /// 1 for mono, 2 otherwise
    pub channels: u16,
    /// Total frame length in bytes, header included
    pub frame_len: usize,
    /// PCM sample frames produced by one frame
    pub samples_per_frame: usize,
}

impl FrameHeader {
    /// Parse a header from the first four bytes of `bytes`.
    ///
    /// Returns `None` when the bytes are not a usable header: missing sync,
    /// reserved version or layer, free-format or bad bitrate, reserved sample
    /// rate, or fewer than four bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let (b0, b1, b2, b3) = (bytes[0], bytes[1], bytes[2], bytes[3]);

        if b0 != 0xFF || b1 & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (b1 >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };

        let layer = match (b1 >> 1) & 0x03 {
            0b01 => MpegLayer::Layer3,
            0b10 => MpegLayer::Layer2,
            0b11 => MpegLayer::Layer1,
            _ => return None,
        };

        let bitrate_index = (b2 >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let bitrate_table = match (version, layer) {
            (MpegVersion::Mpeg1, MpegLayer::Layer1) => &BITRATES_V1_L1,
            (MpegVersion::Mpeg1, MpegLayer::Layer2) => &BITRATES_V1_L2,
            (MpegVersion::Mpeg1, MpegLayer::Layer3) => &BITRATES_V1_L3,
            (_, MpegLayer::Layer1) => &BITRATES_V2_L1,
            (_, _) => &BITRATES_V2_L23,
        };
        let bitrate_kbps = bitrate_table[bitrate_index];

        let rate_index = ((b2 >> 2) & 0x03) as usize;
        let rates = match version {
            MpegVersion::Mpeg1 => &SAMPLE_RATES_V1,
            MpegVersion::Mpeg2 => &SAMPLE_RATES_V2,
            MpegVersion::Mpeg25 => &SAMPLE_RATES_V25,
        };
        let sample_rate = *rates.get(rate_index)?;

        let padding = (b2 >> 1) & 0x01 == 1;
        let channels = if b3 >> 6 == 0b11 { 1 } else { 2 };

        let bitrate = bitrate_kbps * 1000;
        let pad = padding as u32;
        let frame_len = match (layer, version) {
            (MpegLayer::Layer1, _) => (12 * bitrate / sample_rate + pad) * 4,
            (MpegLayer::Layer2, _) | (MpegLayer::Layer3, MpegVersion::Mpeg1) => {
                144 * bitrate / sample_rate + pad
            }
            (MpegLayer::Layer3, _) => 72 * bitrate / sample_rate + pad,
        } as usize;

        let samples_per_frame = match (layer, version) {
            (MpegLayer::Layer1, _) => 384,
            (MpegLayer::Layer2, _) | (MpegLayer::Layer3, MpegVersion::Mpeg1) => 1152,
            (MpegLayer::Layer3, _) => 576,
        };

        // A frame shorter than its own header cannot be walked
        if frame_len <= HEADER_LEN {
            return None;
        }

        Some(Self {
            version,
            layer,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
            frame_len,
            samples_per_frame,
        })
    }

    /// Whether `other` can belong to the same stream as `self`.
    ///
    /// Bitrate, padding and channel mode may change frame to frame; version,
    /// layer and sample rate may not.
    pub fn is_compatible(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

/// Stream parameters fixed once synchronization is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn from_header(header: &FrameHeader) -> Self {
        Self {
            version: header.version,
            layer: header.layer,
            sample_rate: header.sample_rate,
            channels: header.channels,
        }
    }

    pub fn accepts(&self, header: &FrameHeader) -> bool {
        self.version == header.version
            && self.layer == header.layer
            && self.sample_rate == header.sample_rate
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}
