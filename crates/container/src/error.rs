//! Container errors.

use clipframe_common::ClipframeError;
use clipframe_media_model::{TrackId, TrackKind};

/// Failure to parse a source container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("container has no video track")]
    NoVideoTrack,
}

impl ParseError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Failure while building an output container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriterError {
    #[error("track {0:?} has not been initialized")]
    TrackNotInitialized(TrackId),

    #[error("a {0:?} track has already been added")]
    DuplicateTrack(TrackKind),

    #[error("codec '{0}' can not be written to an MP4 sample entry")]
    UnsupportedCodec(String),

    #[error("track config for a {expected:?} track describes a different media type")]
    KindMismatch { expected: TrackKind },

    #[error("sample at {timestamp_us}us decodes before the previous sample at {previous_us}us")]
    OutOfOrder { previous_us: i64, timestamp_us: i64 },

    #[error("container has no tracks to write")]
    NoTracks,
}

/// Failure of a passthrough trim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemuxError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("trim range [{start_s}, {end_s}) selects no video samples")]
    EmptyRange { start_s: f64, end_s: f64 },
}

impl From<ParseError> for ClipframeError {
    fn from(err: ParseError) -> Self {
        ClipframeError::container(err.to_string())
    }
}

impl From<WriterError> for ClipframeError {
    fn from(err: WriterError) -> Self {
        ClipframeError::container(err.to_string())
    }
}

impl From<RemuxError> for ClipframeError {
    fn from(err: RemuxError) -> Self {
        ClipframeError::container(err.to_string())
    }
}
