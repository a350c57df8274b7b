use crate::error::FlvError;
use crate::tag::{read_exact, read_file_header, TagHeader, TagType, PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE};
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    LinearPcm,
    Adpcm,
    Mp3,
    LinearPcmLe,
    Nellymoser,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    Other(u8),
}

impl From<u8> for SoundFormat {
    fn from(value: u8) -> Self {
        match value {
            0 => SoundFormat::LinearPcm,
            1 => SoundFormat::Adpcm,
            2 | 14 => SoundFormat::Mp3,
            3 => SoundFormat::LinearPcmLe,
            4..=6 => SoundFormat::Nellymoser,
            7 => SoundFormat::G711ALaw,
            8 => SoundFormat::G711MuLaw,
            10 => SoundFormat::Aac,
            11 => SoundFormat::Speex,
            other => SoundFormat::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundRate {
    Khz5,
    Khz11,
    Khz22,
    Khz44,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundSize {
    Bits8,
    Bits16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundType {
    Mono,
    Stereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263,
    ScreenVideo,
    Vp6,
    Vp6Alpha,
    ScreenVideo2,
    Avc,
    Hevc,
    Other(u8),
}

impl From<u8> for VideoCodec {
    fn from(value: u8) -> Self {
        match value {
            2 => VideoCodec::SorensonH263,
            3 => VideoCodec::ScreenVideo,
            4 => VideoCodec::Vp6,
            5 => VideoCodec::Vp6Alpha,
            6 => VideoCodec::ScreenVideo2,
            7 => VideoCodec::Avc,
            12 => VideoCodec::Hevc,
            other => VideoCodec::Other(other),
        }
    }
}

/// Audio parameters carried by the flags byte of an audio tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub format: SoundFormat,
    pub rate: SoundRate,
    pub size: SoundSize,
    pub channels: SoundType,
}

impl AudioParams {
    pub fn from_flags(flags: u8) -> Self {
        let rate = match (flags & 0x0c) >> 2 {
            0 => SoundRate::Khz5,
            1 => SoundRate::Khz11,
            2 => SoundRate::Khz22,
            _ => SoundRate::Khz44,
        };
        let size = if flags & 0x02 == 0 {
            SoundSize::Bits8
        } else {
            SoundSize::Bits16
        };
        let channels = if flags & 0x01 == 0 {
            SoundType::Mono
        } else {
            SoundType::Stereo
        };

        Self {
            format: SoundFormat::from((flags & 0xf0) >> 4),
            rate,
            size,
            channels,
        }
    }
}

/// Codec parameters that must match for two containers to be concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecFingerprint {
    pub audio: AudioParams,
    pub video: VideoCodec,
}

impl CodecFingerprint {
    pub fn is_mergeable_with(&self, other: &CodecFingerprint) -> bool {
        is_mergeable(self, other)
    }
}

impl fmt::Display for CodecFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audio {:?}/{:?}/{:?}/{:?}, video {:?}",
            self.audio.format, self.audio.rate, self.audio.size, self.audio.channels, self.video
        )
    }
}

/// Field-wise exact comparison. There is no partial compatibility.
pub fn is_mergeable(a: &CodecFingerprint, b: &CodecFingerprint) -> bool {
    a == b
}

/// Scan tags from the start of the stream until both the first audio and the
/// first video parameter tag have been seen.
pub async fn probe<R>(reader: &mut R) -> Result<CodecFingerprint, FlvError>
where
    R: AsyncRead + AsyncSeek + Unpin + ?Sized,
{
    reader.seek(SeekFrom::Start(0)).await?;
    let header = read_file_header(reader).await?;
    reader.seek(SeekFrom::Start(header.prefix_len())).await?;

    let mut audio: Option<AudioParams> = None;
    let mut video: Option<VideoCodec> = None;
    let mut buf = [0u8; TAG_HEADER_SIZE + 1];
    let mut tags = 0u32;

    loop {
        if let (Some(audio), Some(video)) = (audio, video) {
            debug!("probed {} tags", tags);
            return Ok(CodecFingerprint { audio, video });
        }

        read_exact(reader, &mut buf).await?;
        tags += 1;

        let mut raw = [0u8; TAG_HEADER_SIZE];
        raw.copy_from_slice(&buf[..TAG_HEADER_SIZE]);
        let tag = TagHeader::new(raw);
        let size = tag.data_size();
        let flags = buf[TAG_HEADER_SIZE];

        if size > 0 {
            match tag.tag_type() {
                TagType::Audio if audio.is_none() => audio = Some(AudioParams::from_flags(flags)),
                TagType::Video if video.is_none() => video = Some(VideoCodec::from(flags & 0x0f)),
                _ => {}
            }
        }

        // One payload byte has already been consumed
        let skip = i64::from(size) - 1 + PREVIOUS_TAG_SIZE as i64;
        reader.seek(SeekFrom::Current(skip)).await?;
    }
}

pub async fn probe_file(path: &Path) -> Result<CodecFingerprint, FlvError> {
    let mut file = File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FlvError::SourceNotFound(path.to_path_buf()),
        _ => FlvError::Io(e),
    })?;

    probe(&mut file).await
}
