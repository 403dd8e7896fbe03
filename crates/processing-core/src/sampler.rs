//! Two-pass adaptive anchor sampling.
//!
//! Pass one is the fixed-interval activity scan in [`crate::activity`].
//! Pass two walks every shot, detects at both of its ends, and bisects an
//! interval only while the detections at its ends disagree or the activity
//! trace shows motion inside it. Static, agreeing stretches cost two
//! detector calls no matter how long they are.

use clipframe_common::config::SamplerDefaults;
use clipframe_common::error::ClipframeResult;
use clipframe_media_model::{sort_anchors, AnchorPoint, ShotSegment};
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityConfig, ActivityScan, ActivityScanner};
use crate::detection::{detect_anchor, FaceDetector, ScoringConfig};
use crate::frame::FrameSource;

/// Smallest interval the sampler will ever bisect.
const MIN_STOP_WIDTH_S: f64 = 1e-3;

/// Speed/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerQuality {
    Fast,
    #[default]
    Balanced,
    Precise,
}

impl SamplerQuality {
    /// Seconds between pass-one samples.
    pub fn scan_interval_s(&self) -> f64 {
        match self {
            SamplerQuality::Fast => 3.0,
            SamplerQuality::Balanced => 1.0,
            SamplerQuality::Precise => 0.5,
        }
    }

    /// Intervals narrower than this are not bisected.
    pub fn stop_width_s(&self) -> f64 {
        match self {
            SamplerQuality::Fast => 1.0,
            SamplerQuality::Balanced => 0.5,
            SamplerQuality::Precise => 0.25,
        }
    }
}

/// Sampler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub activity: ActivityConfig,
    pub stop_width_s: f64,
    /// Center delta that asks for a split.
    pub position_mismatch: f64,
    /// Center delta that forces a split past the depth limit.
    pub forced_mismatch: f64,
    /// Depth limit for static shots; `None` disables it.
    pub static_depth_limit: Option<u32>,
    pub scoring: ScoringConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from_defaults(&SamplerDefaults::default(), SamplerQuality::default())
    }
}

impl SamplerConfig {
    pub fn from_defaults(defaults: &SamplerDefaults, quality: SamplerQuality) -> Self {
        Self {
            activity: ActivityConfig::from_defaults(defaults, quality.scan_interval_s()),
            stop_width_s: quality.stop_width_s(),
            position_mismatch: defaults.position_mismatch,
            forced_mismatch: defaults.forced_mismatch,
            static_depth_limit: (quality == SamplerQuality::Fast).then_some(2),
            scoring: ScoringConfig::default(),
        }
    }

    /// Activity level inside an interval that asks for a split.
    fn activity_trigger(&self) -> f64 {
        self.activity.static_threshold * 3.0
    }
}

/// Why an interval was bisected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitReason {
    /// Exactly one end has a face.
    Existence,
    /// The faces are far apart.
    ForcedPosition,
    /// The faces are somewhat apart.
    Position,
    /// The activity trace moved inside the interval.
    Activity,
}

impl SplitReason {
    /// Forced splits ignore the static-shot depth limit.
    pub fn is_forced(&self) -> bool {
        matches!(self, SplitReason::Existence | SplitReason::ForcedPosition)
    }
}

/// Decide whether `[t1, t2]` with end detections `d1`, `d2` needs a midpoint.
pub fn split_reason(
    d1: Option<&AnchorPoint>,
    d2: Option<&AnchorPoint>,
    activity_peak: Option<f64>,
    config: &SamplerConfig,
) -> Option<SplitReason> {
    match (d1, d2) {
        (Some(_), None) | (None, Some(_)) => return Some(SplitReason::Existence),
        (Some(a), Some(b)) => {
            let delta = (a.center_x - b.center_x).abs();
            if delta > config.forced_mismatch {
                return Some(SplitReason::ForcedPosition);
            }
            if delta > config.position_mismatch {
                return Some(SplitReason::Position);
            }
        }
        (None, None) => {}
    }
    match activity_peak {
        Some(peak) if peak > config.activity_trigger() => Some(SplitReason::Activity),
        _ => None,
    }
}

/// Counters from one sampling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerStats {
    pub detector_calls: usize,
    pub splits: usize,
    pub max_depth: u32,
}

/// Everything the sampler produced.
#[derive(Debug, Clone, Default)]
pub struct SamplerOutput {
    pub scan: ActivityScan,
    /// Sorted by time.
    pub anchors: Vec<AnchorPoint>,
    pub stats: SamplerStats,
}

/// Pending bisection.
struct Interval {
    t1: f64,
    t2: f64,
    d1: Option<AnchorPoint>,
    d2: Option<AnchorPoint>,
    depth: u32,
}

/// Adaptive anchor sampler.
pub struct SceneSampler {
    config: SamplerConfig,
    detector: Box<dyn FaceDetector>,
}

impl SceneSampler {
    pub fn new(config: SamplerConfig, detector: Box<dyn FaceDetector>) -> Self {
        Self { config, detector }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Run both passes over `source`.
    pub async fn run(&self, source: &dyn FrameSource) -> ClipframeResult<SamplerOutput> {
        let scan = ActivityScanner::new(self.config.activity.clone())
            .scan(source)
            .await?;

        let mut stats = SamplerStats::default();
        let mut anchors = Vec::new();
        for shot in &scan.shots {
            anchors.extend(self.sample_shot(source, shot, &scan, &mut stats).await);
        }
        sort_anchors(&mut anchors);
        // Neighbouring shots share a boundary and see the same frame there.
        anchors.dedup_by(|later, earlier| later.timestamp_s == earlier.timestamp_s);

        tracing::info!(
            detector = self.detector.name(),
            shots = scan.shots.len(),
            anchors = anchors.len(),
            detector_calls = stats.detector_calls,
            splits = stats.splits,
            max_depth = stats.max_depth,
            "Adaptive sampling complete"
        );

        Ok(SamplerOutput {
            scan,
            anchors,
            stats,
        })
    }

    /// Anchors for one shot, unsorted.
    pub async fn sample_shot(
        &self,
        source: &dyn FrameSource,
        shot: &ShotSegment,
        scan: &ActivityScan,
        stats: &mut SamplerStats,
    ) -> Vec<AnchorPoint> {
        let mut anchors = Vec::new();

        let d1 = self.detect_at(source, shot.start_s, stats).await;
        let d2 = if shot.end_s > shot.start_s {
            self.detect_at(source, shot.end_s, stats).await
        } else {
            d1
        };
        anchors.extend(d1);
        if shot.end_s > shot.start_s {
            anchors.extend(d2);
        }

        let stop_width = self.config.stop_width_s.max(MIN_STOP_WIDTH_S);
        let mut work = vec![Interval {
            t1: shot.start_s,
            t2: shot.end_s,
            d1,
            d2,
            depth: 0,
        }];

        while let Some(interval) = work.pop() {
            let width = interval.t2 - interval.t1;
            if width.is_nan() || width < stop_width {
                continue;
            }

            let peak = scan.peak_between(interval.t1, interval.t2);
            let Some(reason) =
                split_reason(interval.d1.as_ref(), interval.d2.as_ref(), peak, &self.config)
            else {
                continue;
            };

            if shot.is_static && !reason.is_forced() {
                if let Some(limit) = self.config.static_depth_limit {
                    if interval.depth >= limit {
                        continue;
                    }
                }
            }

            let mid = interval.t1 + width / 2.0;
            let dm = self.detect_at(source, mid, stats).await;
            anchors.extend(dm);

            let depth = interval.depth + 1;
            stats.splits += 1;
            stats.max_depth = stats.max_depth.max(depth);
            tracing::trace!(t1 = interval.t1, t2 = interval.t2, ?reason, depth, "Bisecting");

            work.push(Interval {
                t1: mid,
                t2: interval.t2,
                d1: dm,
                d2: interval.d2,
                depth,
            });
            work.push(Interval {
                t1: interval.t1,
                t2: mid,
                d1: interval.d1,
                d2: dm,
                depth,
            });
        }

        anchors
    }

    /// Detection at `t`. Missing frames and detector failures both read as
    /// no face.
    async fn detect_at(
        &self,
        source: &dyn FrameSource,
        t: f64,
        stats: &mut SamplerStats,
    ) -> Option<AnchorPoint> {
        let frame = match source.frame_at(t).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(t, error = %e, "No frame for detection");
                return None;
            }
        };
        stats.detector_calls += 1;
        let anchor =
            detect_anchor(self.detector.as_ref(), &frame.image, t, &self.config.scoring).await;
        tokio::task::yield_now().await;
        anchor
    }
}
