use crate::probe::CodecFingerprint;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlvError {
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Invalid FLV header")]
    InvalidSignature,
    #[error("Incompatible codec: {previous} cannot be followed by {next}")]
    IncompatibleCodec {
        previous: CodecFingerprint,
        next: CodecFingerprint,
    },
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: u64, actual: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
