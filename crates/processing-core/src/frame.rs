//! Decoded frames and the seam the sampler pulls them through.

use clipframe_common::error::ClipframeResult;
use image::RgbaImage;

/// A decoded picture with its presentation time.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp_us: i64,
    pub image: RgbaImage,
}

impl VideoFrame {
    pub fn new(timestamp_us: i64, image: RgbaImage) -> Self {
        Self {
            timestamp_us,
            image,
        }
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Random-access frame provider.
///
/// Implementations may decode on demand; callers should not assume frames
/// are cached between calls.
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    /// Length of the source in seconds.
    fn duration_s(&self) -> f64;

    /// The frame presented at or just before `t_s`, or `None` when nothing
    /// could be decoded there.
    async fn frame_at(&self, t_s: f64) -> ClipframeResult<Option<VideoFrame>>;
}
