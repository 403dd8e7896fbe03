//! Manual subject tracking.
//!
//! A user-seeded tracker reports one position per frame, or nothing when it
//! loses the subject. Those reports are filtered with a constant-velocity
//! Kalman filter per axis (coasting through gaps) and handed to the
//! trajectory solver as ordinary anchors.

use clipframe_media_model::{AnchorPoint, Point2D};
use serde::{Deserialize, Serialize};

/// One tracker report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPoint {
    pub timestamp_s: f64,
    /// `None` when the tracker lost the subject on this frame.
    pub position: Option<Point2D>,
}

impl TrackedPoint {
    pub fn found(timestamp_s: f64, x: f64, y: f64) -> Self {
        Self {
            timestamp_s,
            position: Some(Point2D::new(x, y)),
        }
    }

    pub fn lost(timestamp_s: f64) -> Self {
        Self {
            timestamp_s,
            position: None,
        }
    }
}

/// Filter noise settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualTrackConfig {
    /// Acceleration noise spectral density.
    pub process_noise: f64,
    /// Variance of a tracker report.
    pub measurement_noise: f64,
    /// Consecutive lost reports after which coasting stops producing anchors.
    pub max_coast_frames: usize,
}

impl Default for ManualTrackConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.05,
            measurement_noise: 0.002,
            max_coast_frames: 15,
        }
    }
}

/// Constant-velocity filter for one axis.
#[derive(Debug, Clone)]
struct AxisFilter {
    position: f64,
    velocity: f64,
    covariance: [[f64; 2]; 2],
}

impl AxisFilter {
    fn new(position: f64) -> Self {
        Self {
            position,
            velocity: 0.0,
            covariance: [[1.0, 0.0], [0.0, 1.0]],
        }
    }

    fn predict(&mut self, dt: f64, q: f64) {
        self.position += self.velocity * dt;
        let [[p00, p01], [p10, p11]] = self.covariance;
        let dt2 = dt * dt;
        self.covariance = [
            [
                p00 + dt * (p10 + p01) + dt2 * p11 + q * dt2 * dt / 3.0,
                p01 + dt * p11 + q * dt2 / 2.0,
            ],
            [p10 + dt * p11 + q * dt2 / 2.0, p11 + q * dt],
        ];
    }

    fn update(&mut self, measurement: f64, r: f64) {
        let [[p00, p01], [p10, p11]] = self.covariance;
        let innovation = measurement - self.position;
        let s = p00 + r;
        if s <= 0.0 {
            return;
        }
        let k0 = p00 / s;
        let k1 = p10 / s;
        self.position += k0 * innovation;
        self.velocity += k1 * innovation;
        self.covariance = [
            [(1.0 - k0) * p00, (1.0 - k0) * p01],
            [p10 - k1 * p00, p11 - k1 * p01],
        ];
    }
}

/// Kalman smoother for manual tracks.
pub struct ManualTrackSmoother {
    config: ManualTrackConfig,
}

impl ManualTrackSmoother {
    pub fn new(config: ManualTrackConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ManualTrackConfig::default())
    }

    /// Filtered positions, one per input report until the track is lost for
    /// longer than `max_coast_frames`. Reports before the first found
    /// position are skipped.
    pub fn smooth(&self, points: &[TrackedPoint]) -> Vec<TrackedPoint> {
        let mut ordered: Vec<TrackedPoint> = points
            .iter()
            .filter(|p| p.timestamp_s.is_finite())
            .copied()
            .collect();
        ordered.sort_by(|a, b| a.timestamp_s.total_cmp(&b.timestamp_s));

        let Some((start, first)) = ordered
            .iter()
            .enumerate()
            .find_map(|(i, p)| p.position.map(|pos| (i, pos)))
        else {
            return Vec::new();
        };

        let mut fx = AxisFilter::new(first.x);
        let mut fy = AxisFilter::new(first.y);
        let mut last_t = ordered[start].timestamp_s;
        let mut coasting = 0usize;
        let mut out = Vec::with_capacity(ordered.len() - start);

        for point in &ordered[start..] {
            let dt = (point.timestamp_s - last_t).max(0.0);
            last_t = point.timestamp_s;

            fx.predict(dt, self.config.process_noise);
            fy.predict(dt, self.config.process_noise);

            match point.position {
                Some(p) => {
                    fx.update(p.x, self.config.measurement_noise);
                    fy.update(p.y, self.config.measurement_noise);
                    coasting = 0;
                }
                None => {
                    coasting += 1;
                    if coasting > self.config.max_coast_frames {
                        continue;
                    }
                }
            }

            out.push(TrackedPoint::found(
                point.timestamp_s,
                fx.position.clamp(0.0, 1.0),
                fy.position.clamp(0.0, 1.0),
            ));
        }

        tracing::debug!(
            reports = points.len(),
            smoothed = out.len(),
            "Manual track filtered"
        );
        out
    }

    /// Filtered track as solver anchors.
    pub fn to_anchors(&self, points: &[TrackedPoint]) -> Vec<AnchorPoint> {
        self.smooth(points)
            .into_iter()
            .filter_map(|p| {
                p.position
                    .map(|pos| AnchorPoint::at(p.timestamp_s, pos.x, pos.y))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_subject_stays_put() {
        let points: Vec<TrackedPoint> = (0..30)
            .map(|i| TrackedPoint::found(f64::from(i) / 30.0, 0.3, 0.6))
            .collect();
        let smoothed = ManualTrackSmoother::with_defaults().smooth(&points);
        assert_eq!(smoothed.len(), 30);
        for p in smoothed {
            let pos = p.position.unwrap();
            assert!((pos.x - 0.3).abs() < 1e-9);
            assert!((pos.y - 0.6).abs() < 1e-9);
        }
    }

    #[test]
    fn test_jitter_is_reduced() {
        let points: Vec<TrackedPoint> = (0..120)
            .map(|i| {
                let jitter = if i % 2 == 0 { 0.03 } else { -0.03 };
                TrackedPoint::found(f64::from(i) / 30.0, 0.5 + jitter, 0.5)
            })
            .collect();
        let smoothed = ManualTrackSmoother::with_defaults().smooth(&points);
        let tail: Vec<f64> = smoothed[60..].iter().map(|p| p.position.unwrap().x).collect();
        let spread = tail.iter().cloned().fold(f64::MIN, f64::max)
            - tail.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread < 0.06, "spread {spread}");
    }

    #[test]
    fn test_lost_frames_coast_then_stop() {
        let mut points: Vec<TrackedPoint> = (0..30)
            .map(|i| TrackedPoint::found(f64::from(i) / 30.0, 0.2 + f64::from(i) * 0.01, 0.5))
            .collect();
        for i in 30..60 {
            points.push(TrackedPoint::lost(f64::from(i) / 30.0));
        }

        let config = ManualTrackConfig {
            max_coast_frames: 5,
            ..Default::default()
        };
        let smoothed = ManualTrackSmoother::new(config).smooth(&points);
        assert_eq!(smoothed.len(), 35);

        // Still moving right while coasting.
        let last_found = smoothed[29].position.unwrap().x;
        let coasted = smoothed[34].position.unwrap().x;
        assert!(coasted > last_found);
    }

    #[test]
    fn test_leading_lost_reports_are_skipped() {
        let points = [
            TrackedPoint::lost(0.0),
            TrackedPoint::found(0.1, 0.4, 0.4),
            TrackedPoint::found(0.2, 0.4, 0.4),
        ];
        let anchors = ManualTrackSmoother::with_defaults().to_anchors(&points);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].timestamp_s, 0.1);
        assert!(ManualTrackSmoother::with_defaults()
            .smooth(&[TrackedPoint::lost(0.0)])
            .is_empty());
    }
}
