use crate::error::FlvError;
use crate::probe::{probe, CodecFingerprint};
use crate::tag::{read_exact, read_file_header, read_full, TagHeader, FLV_HEADER_SIZE, TAG_HEADER_SIZE};
use crate::PREVIOUS_TAG_SIZE;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

/// Stream every tag of `source` into `target`, shifting timestamps by `offset`.
///
/// When `first` is set the source's file header and the back-pointer after
/// it are copied to the target verbatim; otherwise they are skipped. Returns
/// the last rewritten timestamp, or `offset` when the source holds no tags.
/// The stream ends cleanly only on a tag boundary; a partial header or a
/// short payload is a `TruncatedRead`.
pub async fn append_tags<R, W>(
    source: &mut R,
    target: &mut W,
    first: bool,
    offset: u32,
) -> Result<u32, FlvError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = read_file_header(source).await?;
    let mut prefix = vec![0u8; header.prefix_len() as usize - FLV_HEADER_SIZE];
    read_exact(source, &mut prefix).await?;

    if first {
        let mut raw = [0u8; FLV_HEADER_SIZE];
        raw[..3].copy_from_slice(b"FLV");
        raw[3] = 0x01;
        raw[4] = header.flags;
        raw[5..].copy_from_slice(&header.data_offset.to_be_bytes());
        target.write_all(&raw).await?;
        target.write_all(&prefix).await?;
    }

    let mut timeline = offset;
    let mut tags = 0u64;
    let mut buf = [0u8; TAG_HEADER_SIZE];

    loop {
        let n = read_full(source, &mut buf).await?;
        if n == 0 {
            break;
        }
        if n < TAG_HEADER_SIZE {
            return Err(FlvError::TruncatedRead {
                expected: TAG_HEADER_SIZE as u64,
                actual: n as u64,
            });
        }

        let mut tag = TagHeader::new(buf);
        // 32-bit timestamps wrap in the container format itself
        let timestamp = tag.timestamp().wrapping_add(offset);
        tag.set_timestamp(timestamp);
        target.write_all(tag.as_bytes()).await?;

        let len = u64::from(tag.data_size()) + PREVIOUS_TAG_SIZE as u64;
        let copied = tokio::io::copy(&mut (&mut *source).take(len), target).await?;
        if copied < len {
            return Err(FlvError::TruncatedRead {
                expected: len,
                actual: copied,
            });
        }

        timeline = timestamp;
        tags += 1;
    }

    debug!("appended {} tags, timeline at {} ms", tags, timeline);
    Ok(timeline)
}

/// Owns one merge target and the running state needed to append to it.
///
/// Appending takes `&mut self`, so a target has at most one writer.
#[derive(Debug)]
pub struct FlvMerger {
    path: PathBuf,
    target: BufWriter<File>,
    timeline: u32,
    header_written: bool,
    last: Option<CodecFingerprint>,
}

impl FlvMerger {
    /// Create (or truncate) the merge target.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, FlvError> {
        let path = path.into();
        let file = File::create(&path).await?;
        info!("Merge target created: {}", path.display());

        Ok(Self {
            path,
            target: BufWriter::new(file),
            timeline: 0,
            header_written: false,
            last: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp the next appended source will be shifted by
    pub fn timeline(&self) -> u32 {
        self.timeline
    }

    /// Append one source file.
    ///
    /// The source is probed first and must match the previously appended
    /// source exactly; on mismatch nothing of it is written.
    pub async fn append(&mut self, source: &Path) -> Result<u32, FlvError> {
        let mut file = match File::open(source).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlvError::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(FlvError::Io(e)),
        };

        let fingerprint = probe(&mut file).await?;
        if let Some(previous) = self.last {
            if !previous.is_mergeable_with(&fingerprint) {
                return Err(FlvError::IncompatibleCodec {
                    previous,
                    next: fingerprint,
                });
            }
        }

        file.seek(SeekFrom::Start(0)).await?;
        let mut reader = BufReader::new(file);
        self.timeline = append_tags(
            &mut reader,
            &mut self.target,
            !self.header_written,
            self.timeline,
        )
        .await?;
        self.header_written = true;
        self.last = Some(fingerprint);

        debug!(
            "Appended {} to {}, timeline at {} ms",
            source.display(),
            self.path.display(),
            self.timeline
        );
        Ok(self.timeline)
    }

    /// Flush and close the target, returning its path.
    pub async fn close(mut self) -> Result<PathBuf, FlvError> {
        self.target.flush().await?;
        self.target.get_ref().sync_all().await?;
        info!("Merge target closed: {}", self.path.display());
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{read_tags, FlvBuilder, AAC_STEREO, AVC_KEYFRAME, HEVC_KEYFRAME};
    use crate::FlvError;
    use std::io::Cursor;

    fn segment(start: u32, frames: u32) -> FlvBuilder {
        let mut builder = FlvBuilder::new()
            .script(0)
            .video(0, AVC_KEYFRAME)
            .audio(0, AAC_STEREO);
        for i in 1..=frames {
            builder = builder.video(start + i * 40, 0x27).audio(start + i * 40, AAC_STEREO);
        }
        builder
    }

    #[tokio::test]
    async fn single_source_merge_is_a_copy() {
        let source = segment(0, 3).build();
        let mut target = Vec::new();

        let timeline = append_tags(&mut Cursor::new(source.clone()), &mut target, true, 0)
            .await
            .unwrap();

        assert_eq!(target, source);
        assert_eq!(timeline, 120);
    }

    #[tokio::test]
    async fn second_source_is_shifted_by_running_offset() {
        let first = segment(0, 2).build();
        let second = FlvBuilder::new()
            .video(7, AVC_KEYFRAME)
            .audio(9, AAC_STEREO)
            .video(47, 0x27)
            .build();
        let mut target = Vec::new();

        let offset = append_tags(&mut Cursor::new(first.clone()), &mut target, true, 0)
            .await
            .unwrap();
        assert_eq!(offset, 80);
        let end = append_tags(&mut Cursor::new(second.clone()), &mut target, false, offset)
            .await
            .unwrap();
        assert_eq!(end, 127);

        let merged = read_tags(&target);
        let first_tags = read_tags(&first);
        let second_tags = read_tags(&second);
        assert_eq!(merged.len(), first_tags.len() + second_tags.len());
        assert_eq!(merged[first_tags.len()].timestamp, offset + 7);

        let timestamps: Vec<u32> = merged.iter().map(|t| t.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        for (merged, original) in merged[first_tags.len()..].iter().zip(second_tags.iter()) {
            assert_eq!(merged.payload, original.payload);
            assert_eq!(merged.tag_type, original.tag_type);
        }
    }

    #[tokio::test]
    async fn offset_carries_into_extension_byte() {
        let source = FlvBuilder::new().video(0x20, AVC_KEYFRAME).build();
        let mut target = Vec::new();

        let end = append_tags(&mut Cursor::new(source), &mut target, true, 0x00ff_fff0)
            .await
            .unwrap();

        assert_eq!(end, 0x0100_0010);
        assert_eq!(read_tags(&target)[0].timestamp, 0x0100_0010);
    }

    #[tokio::test]
    async fn empty_source_keeps_offset() {
        let source = FlvBuilder::new().build();
        let mut target = Vec::new();

        let end = append_tags(&mut Cursor::new(source), &mut target, false, 500)
            .await
            .unwrap();

        assert_eq!(end, 500);
        assert!(target.is_empty());
    }

    #[tokio::test]
    async fn truncated_payload_aborts() {
        let mut source = segment(0, 2).build();
        source.truncate(source.len() - 6);
        let mut target = Vec::new();

        let result = append_tags(&mut Cursor::new(source), &mut target, true, 0).await;
        assert!(matches!(result, Err(FlvError::TruncatedRead { .. })));
    }

    #[tokio::test]
    async fn partial_tag_header_aborts() {
        let mut source = segment(0, 1).build();
        source.extend_from_slice(&[9, 0, 0]);
        let mut target = Vec::new();

        let result = append_tags(&mut Cursor::new(source), &mut target, true, 0).await;
        assert!(matches!(
            result,
            Err(FlvError::TruncatedRead {
                expected: 11,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn merger_joins_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.flv");
        let b = dir.path().join("b.flv");
        tokio::fs::write(&a, segment(0, 2).build()).await.unwrap();
        tokio::fs::write(&b, segment(0, 3).build()).await.unwrap();

        let mut merger = FlvMerger::create(dir.path().join("out.flv")).await.unwrap();
        assert_eq!(merger.append(&a).await.unwrap(), 80);
        assert_eq!(merger.append(&b).await.unwrap(), 200);
        let out = merger.close().await.unwrap();

        let merged = read_tags(&tokio::fs::read(&out).await.unwrap());
        assert_eq!(merged.len(), 7 + 9);
        assert_eq!(merged.last().unwrap().timestamp, 200);
    }

    #[tokio::test]
    async fn merger_rejects_codec_change_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.flv");
        let b = dir.path().join("b.flv");
        let first = segment(0, 2).build();
        tokio::fs::write(&a, &first).await.unwrap();
        tokio::fs::write(
            &b,
            FlvBuilder::new()
                .video(0, HEVC_KEYFRAME)
                .audio(0, AAC_STEREO)
                .build(),
        )
        .await
        .unwrap();

        let mut merger = FlvMerger::create(dir.path().join("out.flv")).await.unwrap();
        merger.append(&a).await.unwrap();
        let result = merger.append(&b).await;
        assert!(matches!(result, Err(FlvError::IncompatibleCodec { .. })));

        let out = merger.close().await.unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), first);
    }

    #[tokio::test]
    async fn merger_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut merger = FlvMerger::create(dir.path().join("out.flv")).await.unwrap();

        let result = merger.append(&dir.path().join("gone.flv")).await;
        assert!(matches!(result, Err(FlvError::SourceNotFound(_))));
    }
}
