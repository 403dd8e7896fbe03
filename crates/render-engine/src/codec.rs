//! Codec seams.
//!
//! Decoders and encoders are asynchronous, possibly hardware-backed
//! components. The pipeline talks to them through request/response calls.
//! Encoders return whatever output became ready from every `encode`;
//! decoders hand out pictures one at a time. `flush` drains the rest. Backends are factories that can also answer
//! capability questions before any resource is created.

use std::sync::Arc;

use clipframe_common::error::ClipframeError;
use clipframe_media_model::{MediaSample, TrackConfig};
use clipframe_processing_core::VideoFrame;
use serde::{Deserialize, Serialize};

/// Codec failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

impl CodecError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

impl From<CodecError> for ClipframeError {
    fn from(err: CodecError) -> Self {
        ClipframeError::codec(err.to_string())
    }
}

/// Output stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Sample entry family, e.g. `avc1`.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bits per second.
    pub bitrate: u64,
}

impl EncoderSettings {
    pub fn h264(width: u32, height: u32, fps: u32, bitrate: u64) -> Self {
        Self {
            codec: "avc1".to_string(),
            width,
            height,
            fps,
            bitrate,
        }
    }
}

/// One encoder output.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub sample: MediaSample,
    /// Track configuration, reported with the first chunk only.
    pub config: Option<TrackConfig>,
}

/// Video decoder session.
///
/// Input and output are decoupled: `decode` only accepts an access unit,
/// and pictures are pulled one at a time with `next_frame`, so the caller
/// decides when each decoded picture starts occupying memory on its side.
#[async_trait::async_trait]
pub trait VideoDecoder: Send {
    /// Samples accepted whose pictures have not been pulled yet.
    fn queue_depth(&self) -> usize;

    /// Submit one access unit in decode order.
    async fn decode(&mut self, sample: &MediaSample) -> Result<(), CodecError>;

    /// Next picture ready for output, in presentation order.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, CodecError>;

    /// End of input: every held picture becomes available to `next_frame`.
    async fn flush(&mut self) -> Result<(), CodecError>;
}

/// Video encoder session.
#[async_trait::async_trait]
pub trait VideoEncoder: Send {
    /// Submit one frame; returns chunks that became ready.
    async fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedChunk>, CodecError>;

    /// Return every remaining chunk.
    async fn flush(&mut self) -> Result<Vec<EncodedChunk>, CodecError>;
}

/// Factory for codec sessions.
///
/// Sessions own their underlying handles and release them on drop.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Can a decoder for `config` be created right now?
    fn probe_decoder(&self, config: &TrackConfig) -> Result<(), CodecError>;

    /// Can an encoder for `settings` be created right now?
    fn probe(&self, settings: &EncoderSettings) -> Result<(), CodecError>;

    fn create_decoder(&self, config: &TrackConfig) -> Result<Box<dyn VideoDecoder>, CodecError>;

    fn create_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, CodecError>;
}

/// The backend compiled into this build, if any.
pub fn default_backend() -> Option<Arc<dyn CodecBackend>> {
    #[cfg(feature = "openh264")]
    {
        Some(Arc::new(crate::openh264_backend::OpenH264Backend::new()))
    }

    #[cfg(not(feature = "openh264"))]
    {
        None
    }
}

/// Codec family of an RFC 6381 string: `avc1.42c01e` -> `avc1`.
pub fn codec_family(codec: &str) -> &str {
    codec.split('.').next().unwrap_or(codec)
}

/// Whether a codec string names H.264.
pub fn is_h264(codec: &str) -> bool {
    matches!(codec_family(codec), "avc1" | "avc3")
}
