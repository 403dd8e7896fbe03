//! Accounting for decoded frames that have not been encoded yet.
//!
//! Every decoded frame is wrapped in an [`InFlightFrame`] as it leaves the
//! decoder. The wrapper moves by value through compositing into the
//! encoder and gives its slot back when dropped, so the gauge always
//! reflects how many uncompressed pictures are alive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clipframe_processing_core::VideoFrame;
use image::RgbaImage;

#[derive(Debug, Default)]
struct GaugeInner {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Shared counter of live in-flight frames.
#[derive(Debug, Clone, Default)]
pub struct FrameGauge {
    inner: Arc<GaugeInner>,
}

impl FrameGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    /// Highest value `current` ever reached.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Take a slot for `frame`.
    pub fn admit(&self, frame: VideoFrame) -> InFlightFrame {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        InFlightFrame {
            frame,
            gauge: self.clone(),
        }
    }
}

/// A decoded frame holding one gauge slot.
#[derive(Debug)]
pub struct InFlightFrame {
    frame: VideoFrame,
    gauge: FrameGauge,
}

impl InFlightFrame {
    pub fn frame(&self) -> &VideoFrame {
        &self.frame
    }

    pub fn timestamp_us(&self) -> i64 {
        self.frame.timestamp_us
    }

    /// Swap the picture for a processed one, keeping the slot.
    pub fn with_image(mut self, image: RgbaImage) -> Self {
        self.frame.image = image;
        self
    }

    /// Move the frame to a new presentation time, keeping the slot.
    pub fn with_timestamp(mut self, timestamp_us: i64) -> Self {
        self.frame.timestamp_us = timestamp_us;
        self
    }

    /// Give the slot back.
    pub fn release(self) {}
}

impl Drop for InFlightFrame {
    fn drop(&mut self) {
        self.gauge.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}
