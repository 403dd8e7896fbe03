//! Coarse visual-activity scan.
//!
//! Frames sampled at a fixed interval are reduced to a small luma grid and
//! differenced against the previous sample. Large differences close a shot;
//! moderate ones mark it as moving.

use clipframe_common::config::SamplerDefaults;
use clipframe_common::error::ClipframeResult;
use clipframe_media_model::ShotSegment;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::frame::FrameSource;

/// Activity scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Seconds between sampled frames.
    pub interval_s: f64,
    /// Side of the luma grid.
    pub grid: u32,
    /// Difference that starts a new shot.
    pub cut_threshold: f64,
    /// Difference above which a shot is not static.
    pub static_threshold: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self::from_defaults(&SamplerDefaults::default(), 1.0)
    }
}

impl ActivityConfig {
    pub fn from_defaults(defaults: &SamplerDefaults, interval_s: f64) -> Self {
        Self {
            interval_s,
            grid: defaults.activity_grid,
            cut_threshold: defaults.cut_threshold,
            static_threshold: defaults.static_threshold,
        }
    }
}

/// Downsampled luma plane.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaGrid {
    size: u32,
    values: Vec<f32>,
}

impl LumaGrid {
    /// Reduce `image` to a `size`×`size` grid of BT.601 luma values.
    pub fn from_image(image: &RgbaImage, size: u32) -> Self {
        let size = size.max(1);
        let small = if image.width() == size && image.height() == size {
            image.clone()
        } else {
            imageops::resize(image, size, size, FilterType::Triangle)
        };
        let values = small
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
            })
            .collect();
        Self { size, values }
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Mean absolute luma difference normalized to `[0, 1]`.
///
/// Grids of different sizes are treated as completely different.
pub fn frame_difference(a: &LumaGrid, b: &LumaGrid) -> f64 {
    if a.size != b.size || a.values.is_empty() {
        return 1.0;
    }
    let total: f64 = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| f64::from((x - y).abs()))
        .sum();
    (total / a.values.len() as f64 / 255.0).clamp(0.0, 1.0)
}

/// One point of the activity time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp_s: f64,
    /// Difference against the previous sample; 0 for the first.
    pub difference: f64,
}

/// Pass-one output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityScan {
    pub trace: Vec<ActivitySample>,
    pub shots: Vec<ShotSegment>,
}

impl ActivityScan {
    /// Largest difference strictly inside `(t1, t2)`, if any sample is there.
    pub fn peak_between(&self, t1: f64, t2: f64) -> Option<f64> {
        self.trace
            .iter()
            .filter(|s| s.timestamp_s > t1 && s.timestamp_s < t2)
            .map(|s| s.difference)
            .reduce(f64::max)
    }
}

/// Split `[0, duration_s]` into shots using an activity trace.
///
/// The result always covers the whole range without gaps or overlaps.
pub fn partition_shots(
    trace: &[ActivitySample],
    duration_s: f64,
    cut_threshold: f64,
    static_threshold: f64,
) -> Vec<ShotSegment> {
    let duration_s = if duration_s.is_finite() { duration_s.max(0.0) } else { 0.0 };

    let mut ordered: Vec<&ActivitySample> = trace
        .iter()
        .filter(|s| s.timestamp_s.is_finite())
        .collect();
    ordered.sort_by(|a, b| a.timestamp_s.total_cmp(&b.timestamp_s));

    let mut shots = Vec::new();
    let mut start = 0.0;
    let mut is_static = true;

    for sample in ordered {
        let t = sample.timestamp_s;
        if sample.difference > cut_threshold && t > start && t < duration_s {
            shots.push(ShotSegment {
                start_s: start,
                end_s: t,
                is_static,
            });
            start = t;
            is_static = true;
        } else if sample.difference > static_threshold && t >= start && t <= duration_s {
            is_static = false;
        }
    }

    shots.push(ShotSegment {
        start_s: start,
        end_s: duration_s,
        is_static,
    });
    shots
}

/// Fixed-interval activity scanner.
pub struct ActivityScanner {
    config: ActivityConfig,
}

impl ActivityScanner {
    pub fn new(config: ActivityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// Sample `source` every `interval_s` and partition it into shots.
    ///
    /// Frames that fail to decode are skipped; the next decoded frame is
    /// compared against the last one that succeeded.
    pub async fn scan(&self, source: &dyn FrameSource) -> ClipframeResult<ActivityScan> {
        let duration_s = source.duration_s();
        let interval = if self.config.interval_s > 0.0 {
            self.config.interval_s
        } else {
            1.0
        };

        let mut trace = Vec::new();
        let mut previous: Option<LumaGrid> = None;
        let mut index = 0u32;
        loop {
            let t = f64::from(index) * interval;
            if t > duration_s {
                break;
            }
            index += 1;

            let frame = match source.frame_at(t).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(t, error = %e, "Activity sample skipped");
                    continue;
                }
            };
            let grid = LumaGrid::from_image(&frame.image, self.config.grid);
            let difference = previous
                .as_ref()
                .map(|p| frame_difference(p, &grid))
                .unwrap_or(0.0);
            trace.push(ActivitySample {
                timestamp_s: t,
                difference,
            });
            previous = Some(grid);

            tokio::task::yield_now().await;
        }

        let shots = partition_shots(
            &trace,
            duration_s,
            self.config.cut_threshold,
            self.config.static_threshold,
        );

        tracing::info!(
            samples = trace.len(),
            shots = shots.len(),
            static_shots = shots.iter().filter(|s| s.is_static).count(),
            "Activity scan complete"
        );

        Ok(ActivityScan { trace, shots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;

    fn solid(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(32, 32, Rgba([value, value, value, 255]))
    }

    fn sample(timestamp_s: f64, difference: f64) -> ActivitySample {
        ActivitySample {
            timestamp_s,
            difference,
        }
    }

    #[test]
    fn test_identical_frames_have_no_difference() {
        let a = LumaGrid::from_image(&solid(120), 64);
        let b = LumaGrid::from_image(&solid(120), 64);
        assert_eq!(frame_difference(&a, &b), 0.0);
        assert_eq!(a.size(), 64);
    }

    #[test]
    fn test_black_to_white_is_full_difference() {
        let a = LumaGrid::from_image(&solid(0), 16);
        let b = LumaGrid::from_image(&solid(255), 16);
        assert!((frame_difference(&a, &b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_luma_weights_green_most() {
        let red = LumaGrid::from_image(&RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])), 4);
        let green = LumaGrid::from_image(&RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255])), 4);
        let black = LumaGrid::from_image(&solid(0), 4);
        assert!(frame_difference(&black, &green) > frame_difference(&black, &red));
        assert!((frame_difference(&black, &red) - 0.299).abs() < 1e-4);
    }

    #[test]
    fn test_partition_splits_on_cuts() {
        let trace = [
            sample(0.0, 0.0),
            sample(1.0, 0.01),
            sample(2.0, 0.6),
            sample(3.0, 0.1),
            sample(4.0, 0.02),
        ];
        let shots = partition_shots(&trace, 5.0, 0.25, 0.03);
        assert_eq!(
            shots,
            vec![
                ShotSegment { start_s: 0.0, end_s: 2.0, is_static: true },
                ShotSegment { start_s: 2.0, end_s: 5.0, is_static: false },
            ]
        );
    }

    #[test]
    fn test_partition_of_empty_trace() {
        let shots = partition_shots(&[], 8.0, 0.25, 0.03);
        assert_eq!(shots, vec![ShotSegment { start_s: 0.0, end_s: 8.0, is_static: true }]);
    }

    #[test]
    fn test_peak_between_is_exclusive() {
        let scan = ActivityScan {
            trace: vec![sample(0.0, 0.0), sample(1.0, 0.2), sample(2.0, 0.9)],
            shots: vec![],
        };
        assert_eq!(scan.peak_between(0.0, 2.0), Some(0.2));
        assert_eq!(scan.peak_between(1.0, 2.0), None);
    }

    proptest! {
        #[test]
        fn prop_shots_partition_duration(
            raw in prop::collection::vec((-1.0f64..25.0, 0.0f64..1.0), 0..40),
            duration in 0.0f64..20.0,
            cut in 0.05f64..0.9,
        ) {
            let trace: Vec<ActivitySample> = raw.iter().map(|&(t, d)| sample(t, d)).collect();
            let shots = partition_shots(&trace, duration, cut, cut / 8.0);

            prop_assert!(!shots.is_empty());
            prop_assert_eq!(shots[0].start_s, 0.0);
            prop_assert_eq!(shots.last().unwrap().end_s, duration);
            for pair in shots.windows(2) {
                prop_assert_eq!(pair[0].end_s, pair[1].start_s);
            }
            for shot in &shots {
                prop_assert!(shot.end_s >= shot.start_s);
            }
        }
    }
}
