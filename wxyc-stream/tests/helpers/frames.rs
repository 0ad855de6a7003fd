//! Synthetic MPEG audio input
//!
//! All frames are MPEG-1 Layer III, 128 kbps, 44.1 kHz, no padding, no CRC:
//! 417 bytes each. The body is zero except byte 4, which carries a marker the
//! `MarkerBackend` turns into sample values. A marker of 0 gives a frame the
//! real decoder accepts as silence.

/// Bytes per synthetic frame
pub const FRAME_LEN: usize = 417;

const STEREO_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const MONO_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0xC0];

fn build(header: [u8; 4], marker: u8) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&header);
    frame[4] = marker;
    frame
}

/// One stereo frame
pub fn frame(marker: u8) -> Vec<u8> {
    build(STEREO_HEADER, marker)
}

/// One single-channel frame
pub fn mono_frame(marker: u8) -> Vec<u8> {
    build(MONO_HEADER, marker)
}

/// `count` stereo frames with markers 0, 1, 2, ...
pub fn frames(count: usize) -> Vec<u8> {
    (0..count).flat_map(|i| frame(i as u8)).collect()
}

/// `count` silent stereo frames
pub fn silent_frames(count: usize) -> Vec<u8> {
    (0..count).flat_map(|_| frame(0)).collect()
}

/// ID3v2.4 tag with a `body_len`-byte body of 0xFF filler
///
/// The filler contains sync-like bytes, so a decoder that scans into the tag
/// instead of skipping it will misbehave.
pub fn id3_tag(body_len: usize) -> Vec<u8> {
    assert!(body_len < 1 << 28);
    let mut tag = b"ID3\x04\x00\x00".to_vec();
    tag.extend_from_slice(&[
        ((body_len >> 21) & 0x7F) as u8,
        ((body_len >> 14) & 0x7F) as u8,
        ((body_len >> 7) & 0x7F) as u8,
        (body_len & 0x7F) as u8,
    ]);
    tag.extend(std::iter::repeat(0xFFu8).take(body_len));
    tag
}
