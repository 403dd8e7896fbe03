//! Render pipeline errors.

use clipframe_common::error::ClipframeError;
use clipframe_container::{ParseError, RemuxError, WriterError};
use clipframe_media_model::RenderConfigError;

use crate::codec::CodecError;

/// Why a render run ended without output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed source: {0}")]
    Parse(String),

    #[error("source has no video track")]
    NoVideoTrack,

    #[error("codec unsupported: {0}")]
    CodecUnsupported(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("output track used before it was initialized")]
    TrackNotInitialized,

    #[error("invalid render request: {0}")]
    InvalidRequest(#[from] RenderConfigError),

    #[error("no source frames between {start_s}s and {end_s}s")]
    EmptyTrim { start_s: f64, end_s: f64 },

    #[error("output container: {0}")]
    Output(String),

    #[error("overlay: {0}")]
    Overlay(String),

    #[error("compositor: {0}")]
    Compositor(String),

    /// Cancelled by the caller. Not a failure; never reported as one.
    #[error("render aborted")]
    Aborted,
}

impl PipelineError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::NoVideoTrack => PipelineError::NoVideoTrack,
            ParseError::Malformed(msg) => PipelineError::Parse(msg),
        }
    }
}

impl From<WriterError> for PipelineError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::TrackNotInitialized(_) => PipelineError::TrackNotInitialized,
            other => PipelineError::Output(other.to_string()),
        }
    }
}

impl From<RemuxError> for PipelineError {
    fn from(err: RemuxError) -> Self {
        match err {
            RemuxError::Parse(e) => e.into(),
            RemuxError::Writer(e) => e.into(),
            RemuxError::EmptyRange { start_s, end_s } => PipelineError::EmptyTrim { start_s, end_s },
        }
    }
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unsupported(msg) => PipelineError::CodecUnsupported(msg),
            CodecError::Decode(msg) => PipelineError::Decode(msg),
            CodecError::Encode(msg) => PipelineError::Encode(msg),
        }
    }
}

#[cfg(feature = "gpu")]
impl From<crate::gpu::GpuError> for PipelineError {
    fn from(err: crate::gpu::GpuError) -> Self {
        PipelineError::Compositor(err.to_string())
    }
}

impl From<PipelineError> for ClipframeError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::CodecUnsupported(msg) => ClipframeError::unsupported(msg),
            PipelineError::Parse(_) | PipelineError::NoVideoTrack => {
                ClipframeError::container(err.to_string())
            }
            other => ClipframeError::render(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipframe_media_model::TrackId;

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(PipelineError::from(ParseError::NoVideoTrack), PipelineError::NoVideoTrack);
        assert_eq!(
            PipelineError::from(WriterError::TrackNotInitialized(TrackId(1))),
            PipelineError::TrackNotInitialized
        );
        assert_eq!(
            PipelineError::from(CodecError::unsupported("hvc1")),
            PipelineError::CodecUnsupported("hvc1".into())
        );
        assert!(PipelineError::Aborted.is_aborted());
    }
}
