use crate::error::FlvError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the fixed file header: signature, version, flags, header length.
pub const FLV_HEADER_SIZE: usize = 9;
/// Size of a tag header: type, payload size, timestamp, extension, stream id.
pub const TAG_HEADER_SIZE: usize = 11;
/// Size of the back-pointer following the file header and every tag.
pub const PREVIOUS_TAG_SIZE: usize = 4;

const SIGNATURE: [u8; 4] = [b'F', b'L', b'V', 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Audio,
    Video,
    Script,
    Other(u8),
}

impl From<u8> for TagType {
    fn from(value: u8) -> Self {
        match value & 0x1f {
            8 => TagType::Audio,
            9 => TagType::Video,
            18 => TagType::Script,
            other => TagType::Other(other),
        }
    }
}

/// Parsed file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub flags: u8,
    /// Declared length of the header, normally 9
    pub data_offset: u32,
}

impl FileHeader {
    pub fn parse(buf: &[u8; FLV_HEADER_SIZE]) -> Result<Self, FlvError> {
        if buf[..4] != SIGNATURE {
            return Err(FlvError::InvalidSignature);
        }

        let data_offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if (data_offset as usize) < FLV_HEADER_SIZE {
            return Err(FlvError::InvalidSignature);
        }

        Ok(Self {
            flags: buf[4],
            data_offset,
        })
    }

    /// Number of bytes from the start of the file to the first tag header.
    pub fn prefix_len(&self) -> u64 {
        u64::from(self.data_offset) + PREVIOUS_TAG_SIZE as u64
    }
}

/// Raw tag header with accessors for the fields the merger touches.
///
/// The timestamp is split across the header: bytes 4..7 hold the low 24 bits
/// big-endian and byte 7 holds the high 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader([u8; TAG_HEADER_SIZE]);

impl TagHeader {
    pub fn new(bytes: [u8; TAG_HEADER_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn tag_type(&self) -> TagType {
        TagType::from(self.0[0])
    }

    pub fn data_size(&self) -> u32 {
        u24_be(self.0[1], self.0[2], self.0[3])
    }

    pub fn timestamp(&self) -> u32 {
        (u32::from(self.0[7]) << 24) | u24_be(self.0[4], self.0[5], self.0[6])
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.0[4] = (timestamp >> 16) as u8;
        self.0[5] = (timestamp >> 8) as u8;
        self.0[6] = timestamp as u8;
        self.0[7] = (timestamp >> 24) as u8;
    }

    pub fn as_bytes(&self) -> &[u8; TAG_HEADER_SIZE] {
        &self.0
    }
}

fn u24_be(b0: u8, b1: u8, b2: u8) -> u32 {
    (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2)
}

/// Fill `buf` from the reader, stopping early only at end of stream.
/// Returns the number of bytes read.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FlvError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled)
}

/// Like `read_full`, but a short read is a `TruncatedRead`.
pub(crate) async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FlvError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let n = read_full(reader, buf).await?;
    if n < buf.len() {
        return Err(FlvError::TruncatedRead {
            expected: buf.len() as u64,
            actual: n as u64,
        });
    }

    Ok(())
}

pub(crate) async fn read_file_header<R>(reader: &mut R) -> Result<FileHeader, FlvError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; FLV_HEADER_SIZE];
    let n = read_full(reader, &mut buf).await?;
    if n < 4 || buf[..4] != SIGNATURE {
        return Err(FlvError::InvalidSignature);
    }
    if n < FLV_HEADER_SIZE {
        return Err(FlvError::TruncatedRead {
            expected: FLV_HEADER_SIZE as u64,
            actual: n as u64,
        });
    }

    FileHeader::parse(&buf)
}
