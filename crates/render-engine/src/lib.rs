//! Clipframe Render Engine
//!
//! Turns a source MP4 plus a render request into a new MP4.
//!
//! # Pipeline Architecture
//!
//! ```text
//! source.mp4 ──► ContainerReader ──► VideoDecoder ──┐   (≤ N frames in flight)
//!                       │                            ▼
//! camera keyframes ─────┼──────────────► Compositor (UV crop, GPU or CPU)
//!                       │                            │
//! overlay elements ─────┼──► OverlayRasterizer ──────┤ (source-over)
//!                       │                            ▼
//!                       │                      VideoEncoder
//!                       │                            │
//!                       └──── audio (copied) ──► ContainerWriter ──► output.mp4
//! ```
//!
//! Requests without reframe, overlays, or resizing skip the codecs entirely
//! and are served by a passthrough remux.

pub mod codec;
pub mod compositor;
pub mod error;
pub mod frame_source;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod inflight;
#[cfg(feature = "openh264")]
pub mod openh264_backend;
pub mod overlay;
pub mod pipeline;
pub mod progress;
pub mod worker;

pub use codec::{default_backend, CodecBackend, CodecError, EncodedChunk, EncoderSettings, VideoDecoder, VideoEncoder};
pub use compositor::Compositor;
pub use error::PipelineError;
pub use frame_source::DecodedFrameSource;
pub use overlay::OverlayRasterizer;
pub use pipeline::{PipelineConfig, PipelineStats, RenderOutput, TranscodePipeline};
pub use progress::{CancelFlag, ProgressCallback, RenderPhase, RenderProgress};
pub use worker::{RenderEvent, RenderHandle, RenderRequest, RenderWorker};
