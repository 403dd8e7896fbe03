//! Render requests.

use serde::{Deserialize, Serialize};

use crate::overlay::OverlayElement;
use crate::reframe::CameraKeyframe;

/// Parameters of one clip render. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frame rate, used for bitrate derivation and progress.
    pub fps: u32,
    /// Target bitrate in bits/s. `None` or `0` derives one from geometry.
    #[serde(default)]
    pub bitrate: Option<u64>,
    /// Trim start in seconds (inclusive).
    pub start_s: f64,
    /// Trim end in seconds (exclusive).
    pub end_s: f64,
    /// Camera path driving the crop window.
    #[serde(default)]
    pub keyframes: Option<Vec<CameraKeyframe>>,
    /// Overlay layer elements.
    #[serde(default)]
    pub overlays: Option<Vec<OverlayElement>>,
}

impl RenderConfig {
    /// A plain trim of `[start_s, end_s)` at the given output geometry.
    pub fn trim(width: u32, height: u32, fps: u32, start_s: f64, end_s: f64) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate: None,
            start_s,
            end_s,
            keyframes: None,
            overlays: None,
        }
    }

    pub fn start_us(&self) -> i64 {
        (self.start_s * 1_000_000.0).round() as i64
    }

    pub fn end_us(&self) -> i64 {
        (self.end_s * 1_000_000.0).round() as i64
    }

    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }

    pub fn has_reframe(&self) -> bool {
        self.keyframes.as_ref().is_some_and(|k| !k.is_empty())
    }

    pub fn has_overlays(&self) -> bool {
        self.overlays.as_ref().is_some_and(|o| !o.is_empty())
    }

    /// Whether the request can be served by copying encoded samples:
    /// no reframe, no overlays, and output geometry equal to the source.
    pub fn is_passthrough(&self, source_width: u32, source_height: u32) -> bool {
        !self.has_reframe()
            && !self.has_overlays()
            && self.width == source_width
            && self.height == source_height
    }

    /// Check the trim range and output geometry.
    pub fn validate(&self) -> Result<(), RenderConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderConfigError::EmptyOutput {
                width: self.width,
                height: self.height,
            });
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RenderConfigError::OddDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 {
            return Err(RenderConfigError::ZeroFps);
        }
        if !(self.start_s >= 0.0 && self.end_s > self.start_s) {
            return Err(RenderConfigError::InvalidTrim {
                start_s: self.start_s,
                end_s: self.end_s,
            });
        }
        Ok(())
    }
}

/// Rejected render request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderConfigError {
    #[error("output size {width}x{height} is empty")]
    EmptyOutput { width: u32, height: u32 },

    #[error("output size {width}x{height} must be even for 4:2:0 video")]
    OddDimensions { width: u32, height: u32 },

    #[error("output fps must be positive")]
    ZeroFps,

    #[error("trim range [{start_s}, {end_s}) is empty or negative")]
    InvalidTrim { start_s: f64, end_s: f64 },
}
