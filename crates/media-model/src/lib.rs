//! Clipframe Media Model
//!
//! Defines the core data contracts shared by every Clipframe stage:
//! - **Samples:** Encoded access units and per-track codec configuration
//! - **Reframe:** Face anchors, camera keyframes, and shot segments
//! - **Overlays:** Text and image layers composited over the output
//! - **Render:** The immutable request a transcode run is started with
//!
//! All spatial coordinates are normalized to `[0.0, 1.0]` relative to the
//! source frame; all media timestamps are microseconds.

pub mod overlay;
pub mod reframe;
pub mod render;
pub mod sample;
pub mod viewport;

pub use overlay::*;
pub use reframe::*;
pub use render::*;
pub use sample::*;
pub use viewport::*;
