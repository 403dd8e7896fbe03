//! Crop windows and normalized points for reframing.
//!
//! All coordinates are normalized to `[0.0, 1.0]` of the source frame.

use serde::{Deserialize, Serialize};

/// A rectangular crop window within the source frame.
///
/// `(0.0, 0.0)` is the top-left and `(1.0, 1.0)` the bottom-right corner of
/// the decoded source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge (normalized).
    pub x: f64,
    /// Top edge (normalized).
    pub y: f64,
    /// Width (normalized).
    pub w: f64,
    /// Height (normalized).
    pub h: f64,
}

impl CropRect {
    /// The whole source frame.
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Crop window centered at `(cx, cy)` with the given size, shifted so it
    /// never leaves the source bounds.
    pub fn centered(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        let w = w.clamp(1e-4, 1.0);
        let h = h.clamp(1e-4, 1.0);

        let x = (cx - w / 2.0).clamp(0.0, 1.0 - w);
        let y = (cy - h / 2.0).clamp(0.0, 1.0 - h);

        Self { x, y, w, h }
    }

    /// Largest window with the target aspect ratio that fits the source
    /// without letterboxing, shrunk by `scale` and centered on `(cx, cy)`.
    ///
    /// Aspect ratios are width / height in pixels. A `scale` below 1 is
    /// treated as 1, the window can not grow past the fitted size.
    pub fn fit_aspect(source_aspect: f64, target_aspect: f64, cx: f64, cy: f64, scale: f64) -> Self {
        let (w, h) = fitted_size(source_aspect, target_aspect);
        let scale = if scale.is_finite() { scale.max(1.0) } else { 1.0 };
        Self::centered(cx, cy, w / scale, h / scale)
    }

    /// The center point of this window.
    pub fn center(&self) -> Point2D {
        Point2D::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn right(&self) -> f64 {
        (self.x + self.w).min(1.0)
    }

    pub fn bottom(&self) -> f64 {
        (self.y + self.h).min(1.0)
    }

    /// Effective zoom factor relative to the full frame.
    pub fn zoom_factor(&self) -> f64 {
        1.0 / self.w.max(self.h)
    }

    /// Pixel rectangle `(x, y, w, h)` for a source of the given size.
    ///
    /// The result is at least 1×1 and always lies inside the source.
    pub fn to_pixels(&self, source_width: u32, source_height: u32) -> (u32, u32, u32, u32) {
        let sw = source_width.max(1) as f64;
        let sh = source_height.max(1) as f64;

        let w = ((self.w * sw).round() as u32).clamp(1, source_width.max(1));
        let h = ((self.h * sh).round() as u32).clamp(1, source_height.max(1));
        let x = ((self.x * sw).round() as u32).min(source_width.max(1) - w);
        let y = ((self.y * sh).round() as u32).min(source_height.max(1) - h);

        (x, y, w, h)
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Normalized `(w, h)` of the largest `target_aspect` window inside a
/// `source_aspect` frame.
pub fn fitted_size(source_aspect: f64, target_aspect: f64) -> (f64, f64) {
    if !(source_aspect > 0.0 && target_aspect > 0.0) {
        return (1.0, 1.0);
    }
    if target_aspect < source_aspect {
        // Target is narrower: full height, partial width.
        (target_aspect / source_aspect, 1.0)
    } else {
        (1.0, source_aspect / target_aspect)
    }
}

/// A 2D normalized point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fit_vertical_from_landscape() {
        let crop = CropRect::fit_aspect(16.0 / 9.0, 9.0 / 16.0, 0.5, 0.5, 1.0);
        assert!((crop.h - 1.0).abs() < 1e-9);
        assert!((crop.w - (9.0 / 16.0) / (16.0 / 9.0)).abs() < 1e-9);
        assert!((crop.center().x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fit_landscape_from_vertical() {
        let (w, h) = fitted_size(9.0 / 16.0, 16.0 / 9.0);
        assert_eq!(w, 1.0);
        assert!((h - (9.0 / 16.0) / (16.0 / 9.0)).abs() < 1e-9);
    }

    #[test]
    fn test_scale_zooms_in() {
        let crop = CropRect::fit_aspect(1.0, 1.0, 0.5, 0.5, 2.0);
        assert!((crop.w - 0.5).abs() < 1e-9);
        assert!((crop.x - 0.25).abs() < 1e-9);
        assert!((crop.zoom_factor() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_centered_clamps_at_edges() {
        let crop = CropRect::fit_aspect(16.0 / 9.0, 9.0 / 16.0, 0.0, 0.5, 1.0);
        assert_eq!(crop.x, 0.0);
        let crop = CropRect::fit_aspect(16.0 / 9.0, 9.0 / 16.0, 1.0, 0.5, 1.0);
        assert!((crop.right() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_to_pixels_inside_source() {
        let crop = CropRect::fit_aspect(16.0 / 9.0, 9.0 / 16.0, 0.95, 0.45, 1.0);
        let (x, y, w, h) = crop.to_pixels(1920, 1080);
        assert_eq!(h, 1080);
        assert_eq!(y, 0);
        assert!(x + w <= 1920);
        assert!((w as i64 - 608).abs() <= 1);
    }

    #[test]
    fn test_point2d_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(1.0, 0.0);
        assert!((a.distance_to(&b) - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_crop_never_leaves_source(
            src in 0.2f64..5.0,
            dst in 0.2f64..5.0,
            cx in -1.0f64..2.0,
            cy in -1.0f64..2.0,
            scale in 0.5f64..4.0,
        ) {
            let crop = CropRect::fit_aspect(src, dst, cx, cy, scale);
            prop_assert!(crop.x >= 0.0 && crop.y >= 0.0);
            prop_assert!(crop.x + crop.w <= 1.0 + 1e-9);
            prop_assert!(crop.y + crop.h <= 1.0 + 1e-9);
            // Pixel aspect of the window matches the target.
            let pixel_aspect = (crop.w * src) / crop.h;
            prop_assert!((pixel_aspect - dst).abs() < 1e-6 * dst.max(1.0));
        }
    }
}
