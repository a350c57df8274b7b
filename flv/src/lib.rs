//! FLV container probing and tag-level concatenation.
//!
//! Segments recorded from one broadcast are joined by streaming their tags
//! into a single target, shifting every timestamp by the last timestamp of
//! the previously appended segment. Only the timestamp fields are rewritten;
//! payloads and back-pointers are copied byte for byte.
//!
//! - `tag`: file header and tag header layouts
//! - `probe`: codec fingerprint discovery and the mergeability check
//! - `merge`: the tag copier and the `FlvMerger` that owns a merge target

mod error;
mod merge;
mod probe;
mod tag;

#[cfg(test)]
mod fixture;

pub use error::FlvError;
pub use merge::{append_tags, FlvMerger};
pub use probe::{
    is_mergeable, probe, probe_file, AudioParams, CodecFingerprint, SoundFormat, SoundRate,
    SoundSize, SoundType, VideoCodec,
};
pub use tag::{FileHeader, TagHeader, TagType, FLV_HEADER_SIZE, PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE};
