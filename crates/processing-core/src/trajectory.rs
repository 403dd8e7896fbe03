//! Virtual cinematographer.
//!
//! Turns sparse face anchors into a dense camera path by running a
//! unit-mass spring toward a per-instant target. Only the horizontal axis
//! is simulated; the vertical center stays at `0.5 + vertical_bias`.

use clipframe_common::config::TrajectoryDefaults;
use clipframe_media_model::{sort_anchors, AnchorPoint, CameraKeyframe};
use serde::{Deserialize, Serialize};

/// Keyframe pairs closer than this are treated as one instant.
const COINCIDENT_EPSILON_S: f64 = 1e-4;

/// Gap between the held and the jumped keyframe of a hard cut.
const CUT_GAP_S: f64 = COINCIDENT_EPSILON_S / 2.0;

/// How the camera moves between anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mood {
    /// Pan continuously along the line between neighbouring anchors.
    #[default]
    Linear,
    /// Jump to the nearer anchor; large jumps cut instantly.
    Cut,
    /// Like `Cut` but with a softer spring for small moves.
    SmoothCut,
}

impl Mood {
    pub fn is_hard_cut(&self) -> bool {
        matches!(self, Mood::Cut | Mood::SmoothCut)
    }

    /// Spring used when the caller does not pick one.
    pub fn default_profile(&self) -> SpringProfile {
        match self {
            Mood::Linear => SpringProfile::Slow,
            Mood::Cut => SpringProfile::Fast,
            Mood::SmoothCut => SpringProfile::Normal,
        }
    }
}

/// Spring constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpringProfile {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl SpringProfile {
    pub fn stiffness(&self) -> f64 {
        match self {
            SpringProfile::Slow => 2.0,
            SpringProfile::Normal => 5.0,
            SpringProfile::Fast => 10.0,
        }
    }

    pub fn damping(&self) -> f64 {
        match self {
            SpringProfile::Slow => 4.0,
            SpringProfile::Normal => 3.0,
            SpringProfile::Fast => 2.0,
        }
    }
}

/// Solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    pub mood: Mood,
    pub profile: SpringProfile,
    /// Added to 0.5 to get the fixed vertical center.
    pub vertical_bias: f64,
    /// Simulation steps per second.
    pub simulation_hz: u32,
    /// Target jumps larger than this cut instead of panning (hard-cut moods).
    pub cut_distance_threshold: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self::from_defaults(&TrajectoryDefaults::default(), Mood::default())
    }
}

impl TrajectoryConfig {
    pub fn from_defaults(defaults: &TrajectoryDefaults, mood: Mood) -> Self {
        Self {
            mood,
            profile: mood.default_profile(),
            vertical_bias: defaults.vertical_bias,
            simulation_hz: defaults.simulation_hz,
            cut_distance_threshold: defaults.cut_distance_threshold,
        }
    }

    pub fn with_mood(mood: Mood) -> Self {
        Self::from_defaults(&TrajectoryDefaults::default(), mood)
    }

    fn step_s(&self) -> f64 {
        1.0 / f64::from(self.simulation_hz.max(1))
    }

    fn center_y(&self) -> f64 {
        0.5 + self.vertical_bias
    }
}

/// Spring-driven camera path solver.
pub struct TrajectorySolver {
    config: TrajectoryConfig,
}

impl TrajectorySolver {
    pub fn new(config: TrajectoryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrajectoryConfig::default())
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    /// Camera path over `[0, duration_s]`.
    ///
    /// Always returns at least two keyframes with strictly increasing
    /// timestamps. A non-positive duration is widened to one simulation
    /// step.
    pub fn solve(&self, anchors: &[AnchorPoint], duration_s: f64) -> Vec<CameraKeyframe> {
        let step = self.config.step_s();
        let duration_s = if duration_s.is_finite() && duration_s > 0.0 {
            duration_s
        } else {
            step
        };
        let center_y = self.config.center_y();

        let mut anchors: Vec<AnchorPoint> = anchors
            .iter()
            .filter(|a| a.timestamp_s.is_finite() && a.center_x.is_finite())
            .copied()
            .collect();

        if anchors.is_empty() {
            return vec![
                CameraKeyframe::new(0.0, 0.5, center_y, 1.0),
                CameraKeyframe::new(duration_s, 0.5, center_y, 1.0),
            ];
        }
        sort_anchors(&mut anchors);

        let stiffness = self.config.profile.stiffness();
        let damping = self.config.profile.damping();
        let hz = f64::from(self.config.simulation_hz.max(1));
        let steps = ((duration_s * hz).ceil() as usize).max(1);

        let mut previous_target = self.target_at(&anchors, 0.0);
        let mut position = clamp01(previous_target);
        let mut velocity = 0.0;
        let mut previous_t = 0.0;

        let mut keyframes = Vec::with_capacity(steps + 1);
        keyframes.push(CameraKeyframe::new(0.0, position, center_y, 1.0));

        for i in 1..=steps {
            let t = (i as f64 / hz).min(duration_s);
            if t <= previous_t {
                break;
            }
            let target = self.target_at(&anchors, t);

            let snapped = self.config.mood.is_hard_cut()
                && (target - previous_target).abs() > self.config.cut_distance_threshold;

            if snapped {
                // Hold the old framing right up to the cut so sampling never
                // blends across it.
                let hold_t = t - CUT_GAP_S;
                if hold_t > previous_t {
                    keyframes.push(CameraKeyframe::new(hold_t, position, center_y, 1.0));
                }
                position = clamp01(target);
                velocity = 0.0;
                tracing::trace!(t, from = previous_target, to = target, "Camera cut");
            } else {
                let dt = t - previous_t;
                let acceleration = (target - position) * stiffness - velocity * damping;
                velocity += acceleration * dt;
                position = clamp01(position + velocity * dt);
            }

            keyframes.push(CameraKeyframe::new(t, position, center_y, 1.0));
            previous_target = target;
            previous_t = t;
        }

        // Make sure the path reaches the end even if rounding stopped short.
        if previous_t < duration_s {
            keyframes.push(CameraKeyframe::new(duration_s, position, center_y, 1.0));
        }

        tracing::debug!(
            anchors = anchors.len(),
            keyframes = keyframes.len(),
            mood = ?self.config.mood,
            duration_s,
            "Trajectory solved"
        );

        keyframes
    }

    /// Horizontal target at `t`. `anchors` must be sorted and non-empty.
    fn target_at(&self, anchors: &[AnchorPoint], t: f64) -> f64 {
        let next = anchors.partition_point(|a| a.timestamp_s <= t);
        if next == 0 {
            return anchors[0].center_x;
        }
        let before = &anchors[next - 1];
        let Some(after) = anchors.get(next) else {
            return before.center_x;
        };

        let span = after.timestamp_s - before.timestamp_s;
        if span < COINCIDENT_EPSILON_S {
            return before.center_x;
        }

        match self.config.mood {
            Mood::Linear => {
                let alpha = (t - before.timestamp_s) / span;
                before.center_x + (after.center_x - before.center_x) * alpha
            }
            Mood::Cut | Mood::SmoothCut => {
                let midpoint = before.timestamp_s + span / 2.0;
                if t < midpoint {
                    before.center_x
                } else {
                    after.center_x
                }
            }
        }
    }
}

/// Camera position at `t`.
///
/// Holds the first keyframe before the path and the last one after it.
/// Returns `None` only for an empty path. The result's `timestamp_s` is `t`.
pub fn sample(keyframes: &[CameraKeyframe], t: f64) -> Option<CameraKeyframe> {
    let first = keyframes.first()?;
    let last = keyframes.last()?;

    if t.is_nan() || t <= first.timestamp_s {
        return Some(CameraKeyframe { timestamp_s: t, ..*first });
    }
    if t >= last.timestamp_s {
        return Some(CameraKeyframe { timestamp_s: t, ..*last });
    }

    let idx = keyframes.partition_point(|k| k.timestamp_s <= t) - 1;
    let a = &keyframes[idx];
    let b = &keyframes[idx + 1];

    let span = b.timestamp_s - a.timestamp_s;
    if span < COINCIDENT_EPSILON_S {
        return Some(CameraKeyframe { timestamp_s: t, ..*a });
    }

    let alpha = (t - a.timestamp_s) / span;
    Some(CameraKeyframe {
        timestamp_s: t,
        center_x: a.center_x + (b.center_x - a.center_x) * alpha,
        center_y: a.center_y + (b.center_y - a.center_y) * alpha,
        scale: a.scale + (b.scale - a.scale) * alpha,
    })
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipframe_media_model::validate_keyframes;
    use proptest::prelude::*;

    fn values(k: &CameraKeyframe) -> (f64, f64, f64) {
        (k.center_x, k.center_y, k.scale)
    }

    #[test]
    fn test_no_anchors_gives_centered_pair() {
        let keyframes = TrajectorySolver::with_defaults().solve(&[], 10.0);
        assert_eq!(keyframes.len(), 2);
        assert_eq!(keyframes[0], CameraKeyframe::new(0.0, 0.5, 0.45, 1.0));
        assert_eq!(keyframes[1], CameraKeyframe::new(10.0, 0.5, 0.45, 1.0));
    }

    #[test]
    fn test_one_keyframe_per_step() {
        let anchors = [AnchorPoint::at(0.0, 0.3, 0.5)];
        let keyframes = TrajectorySolver::with_defaults().solve(&anchors, 2.0);
        assert_eq!(keyframes.len(), 61);
        assert_eq!(keyframes[0].timestamp_s, 0.0);
        assert_eq!(keyframes[60].timestamp_s, 2.0);
        assert!(validate_keyframes(&keyframes).is_ok());
        assert!(keyframes.iter().all(|k| (k.center_x - 0.3).abs() < 1e-12));
    }

    #[test]
    fn test_cut_mood_snaps_at_midpoint() {
        let anchors = [AnchorPoint::at(0.0, 0.2, 0.5), AnchorPoint::at(2.0, 0.8, 0.5)];
        let solver = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Cut));
        let keyframes = solver.solve(&anchors, 2.0);
        assert!(validate_keyframes(&keyframes).is_ok());

        for k in &keyframes {
            if k.timestamp_s < 1.0 {
                assert!((k.center_x - 0.2).abs() < 1e-12, "{k:?}");
            } else {
                assert!((k.center_x - 0.8).abs() < 1e-12, "{k:?}");
            }
        }

        // No sampled instant lands between the two framings.
        for i in 0..=2000 {
            let t = f64::from(i) / 1000.0;
            let x = sample(&keyframes, t).unwrap().center_x;
            assert!(
                (x - 0.2).abs() < 1e-12 || (x - 0.8).abs() < 1e-12,
                "t={t} x={x}"
            );
        }
        assert_eq!(sample(&keyframes, 0.999).unwrap().center_x, 0.2);
        assert_eq!(sample(&keyframes, 1.0).unwrap().center_x, 0.8);
    }

    #[test]
    fn test_linear_mood_pans() {
        let anchors = [AnchorPoint::at(0.0, 0.2, 0.5), AnchorPoint::at(2.0, 0.8, 0.5)];
        let solver = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Linear));
        let keyframes = solver.solve(&anchors, 2.0);
        let mid = sample(&keyframes, 1.0).unwrap().center_x;
        assert!(mid > 0.2 && mid < 0.8);
        assert!(keyframes.windows(2).all(|w| w[1].center_x >= w[0].center_x - 1e-9));
    }

    #[test]
    fn test_small_jump_pans_in_cut_mood() {
        let anchors = [AnchorPoint::at(0.0, 0.4, 0.5), AnchorPoint::at(2.0, 0.5, 0.5)];
        let solver = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Cut));
        let keyframes = solver.solve(&anchors, 2.0);
        let after = sample(&keyframes, 1.0 + 1.0 / 30.0).unwrap().center_x;
        assert!(after > 0.4 && after < 0.5);
    }

    #[test]
    fn test_position_is_clamped() {
        let anchors = [AnchorPoint::at(0.0, 1.4, 0.5), AnchorPoint::at(1.0, -0.3, 0.5)];
        let keyframes = TrajectorySolver::with_defaults().solve(&anchors, 3.0);
        assert!(keyframes.iter().all(|k| (0.0..=1.0).contains(&k.center_x)));
    }

    #[test]
    fn test_sample_holds_ends_and_skips_coincident_pair() {
        let keyframes = [
            CameraKeyframe::new(0.0, 0.1, 0.45, 1.0),
            CameraKeyframe::new(1.0, 0.5, 0.45, 1.0),
            CameraKeyframe::new(1.00005, 0.9, 0.45, 1.0),
        ];
        assert_eq!(sample(&keyframes, -1.0).unwrap().center_x, 0.1);
        assert_eq!(sample(&keyframes, 5.0).unwrap().center_x, 0.9);
        assert!((sample(&keyframes, 0.5).unwrap().center_x - 0.3).abs() < 1e-12);
        assert_eq!(sample(&keyframes, 1.00002).unwrap().center_x, 0.5);
        assert_eq!(sample(&keyframes, f64::NAN).unwrap().center_x, 0.1);
        assert!(sample(&[], 0.0).is_none());
    }

    fn keyframe_path() -> impl Strategy<Value = Vec<CameraKeyframe>> {
        prop::collection::vec((0.001f64..2.0, 0.0f64..1.0, 0.0f64..1.0, 1.0f64..3.0), 1..24)
            .prop_map(|steps| {
                let mut t = 0.0;
                steps
                    .into_iter()
                    .map(|(gap, x, y, s)| {
                        t += gap;
                        CameraKeyframe::new(t, x, y, s)
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_sample_at_keyframe_is_exact(path in keyframe_path(), pick in any::<prop::sample::Index>()) {
            let k = pick.get(&path);
            let got = sample(&path, k.timestamp_s).unwrap();
            prop_assert_eq!(values(&got), values(k));
        }

        #[test]
        fn prop_sample_past_end_holds_last(path in keyframe_path(), extra in 0.0f64..100.0) {
            let last = path.last().unwrap();
            let got = sample(&path, last.timestamp_s + extra).unwrap();
            prop_assert_eq!(values(&got), values(last));
        }

        #[test]
        fn prop_sample_is_continuous(path in keyframe_path(), pick in any::<prop::sample::Index>()) {
            let idx = pick.index(path.len());
            let k = path[idx];
            let eps = 1e-8;
            for t in [k.timestamp_s - eps, k.timestamp_s + eps] {
                let got = sample(&path, t).unwrap();
                prop_assert!((got.center_x - k.center_x).abs() < 1e-4);
                prop_assert!((got.scale - k.scale).abs() < 1e-4);
            }
        }

        #[test]
        fn prop_solved_path_is_valid(
            raw in prop::collection::vec((0.0f64..12.0, -0.5f64..1.5), 0..12),
            duration in 0.1f64..12.0,
            mood in prop_oneof![Just(Mood::Linear), Just(Mood::Cut), Just(Mood::SmoothCut)],
        ) {
            let anchors: Vec<AnchorPoint> = raw.iter().map(|&(t, x)| AnchorPoint::at(t, x, 0.5)).collect();
            let keyframes = TrajectorySolver::new(TrajectoryConfig::with_mood(mood)).solve(&anchors, duration);
            prop_assert!(validate_keyframes(&keyframes).is_ok());
            prop_assert_eq!(keyframes[0].timestamp_s, 0.0);
            prop_assert!((keyframes.last().unwrap().timestamp_s - duration).abs() < 1e-9);
            prop_assert!(keyframes.iter().all(|k| (0.0..=1.0).contains(&k.center_x)));
        }
    }
}
