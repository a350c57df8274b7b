//! In-memory FLV streams for tests.

use crate::tag::{FLV_HEADER_SIZE, PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE};

/// AAC, 44 kHz, 16 bit, stereo
pub const AAC_STEREO: u8 = 0xaf;
/// Keyframe, AVC
pub const AVC_KEYFRAME: u8 = 0x17;
/// Keyframe, HEVC (codec id 12)
pub const HEVC_KEYFRAME: u8 = 0x1c;

pub struct FlvBuilder {
    buf: Vec<u8>,
}

impl FlvBuilder {
    pub fn new() -> Self {
        Self::with_header_length(FLV_HEADER_SIZE as u32)
    }

    pub fn with_header_length(header_length: u32) -> Self {
        let mut buf = vec![b'F', b'L', b'V', 0x01, 0x05];
        buf.extend_from_slice(&header_length.to_be_bytes());
        buf.resize(header_length as usize, 0);
        buf.extend_from_slice(&[0u8; PREVIOUS_TAG_SIZE]);
        Self { buf }
    }

    pub fn audio(self, timestamp: u32, flags: u8) -> Self {
        self.tag(8, timestamp, &[flags, 0x01, 0xaa, 0xbb])
    }

    pub fn video(self, timestamp: u32, flags: u8) -> Self {
        self.tag(9, timestamp, &[flags, 0x01, 0x00, 0x00, 0x00, 0x10, 0x20])
    }

    pub fn script(self, timestamp: u32) -> Self {
        self.tag(18, timestamp, b"\x02\x00\x0aonMetaData\x08\x00\x00\x00\x00")
    }

    pub fn tag(mut self, tag_type: u8, timestamp: u32, payload: &[u8]) -> Self {
        let size = payload.len() as u32;
        self.buf.push(tag_type);
        self.buf.extend_from_slice(&size.to_be_bytes()[1..]);
        self.buf.extend_from_slice(&timestamp.to_be_bytes()[1..]);
        self.buf.push((timestamp >> 24) as u8);
        self.buf.extend_from_slice(&[0, 0, 0]);
        self.buf.extend_from_slice(payload);
        self.buf
            .extend_from_slice(&(TAG_HEADER_SIZE as u32 + size).to_be_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// A tag as seen by `read_tags`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    pub tag_type: u8,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Walk a complete FLV byte stream and list its tags.
pub fn read_tags(data: &[u8]) -> Vec<ParsedTag> {
    let header_length = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;
    let mut pos = header_length + PREVIOUS_TAG_SIZE;
    let mut tags = Vec::new();

    while pos + TAG_HEADER_SIZE <= data.len() {
        let h = &data[pos..pos + TAG_HEADER_SIZE];
        let size = u32::from_be_bytes([0, h[1], h[2], h[3]]) as usize;
        let timestamp = u32::from_be_bytes([h[7], h[4], h[5], h[6]]);
        let start = pos + TAG_HEADER_SIZE;
        tags.push(ParsedTag {
            tag_type: h[0] & 0x1f,
            timestamp,
            payload: data[start..start + size].to_vec(),
        });
        pos = start + size + PREVIOUS_TAG_SIZE;
    }

    tags
}
