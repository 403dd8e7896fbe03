//! Face detector contract and candidate selection.

use clipframe_media_model::{AnchorPoint, Point2D};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Inner-lip landmark indices in the 68-point layout.
const INNER_LIP_UPPER: &[usize] = &[61, 62, 63];
const INNER_LIP_LOWER: &[usize] = &[65, 66, 67];
const CHIN: usize = 8;
const BROW: usize = 27;

/// Detector failure. Never fatal to a render; the sampler logs it and
/// treats the frame as having no face.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),

    #[error("detection failed: {0}")]
    Failed(String),
}

/// Facial landmarks in normalized image coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Point2D>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point2D>) -> Self {
        Self { points }
    }

    /// Mouth openness in `[0, 1]`.
    ///
    /// Inner-lip gap over brow-to-chin height, mapped so a closed mouth
    /// (2% of face height) is 0 and a wide one (12%) is 1. Needs the full
    /// 68-point layout; anything shorter reads as closed.
    pub fn mouth_openness(&self) -> f64 {
        if self.points.len() < 68 {
            return 0.0;
        }
        let mean_y = |indices: &[usize]| {
            indices.iter().map(|&i| self.points[i].y).sum::<f64>() / indices.len() as f64
        };
        let gap = (mean_y(INNER_LIP_LOWER) - mean_y(INNER_LIP_UPPER)).abs();
        let face_height = (self.points[CHIN].y - self.points[BROW].y).abs();
        if face_height < 1e-3 {
            return 0.0;
        }
        ((gap / face_height - 0.02) / 0.10).clamp(0.0, 1.0)
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point2D, Point2D)> {
        let first = self.points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some((min, max))
    }
}

/// One face reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub landmarks: Option<FaceLandmarks>,
}

impl FaceCandidate {
    pub fn from_box(center_x: f64, center_y: f64, width: f64, height: f64) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
            landmarks: None,
        }
    }

    /// Candidate spanning the bounds of a landmark set.
    pub fn from_landmarks(landmarks: FaceLandmarks) -> Option<Self> {
        let (min, max) = landmarks.bounds()?;
        Some(Self {
            center_x: (min.x + max.x) / 2.0,
            center_y: (min.y + max.y) / 2.0,
            width: max.x - min.x,
            height: max.y - min.y,
            landmarks: Some(landmarks),
        })
    }

    pub fn area(&self) -> f64 {
        (self.width * self.height).max(0.0)
    }

    pub fn mouth_openness(&self) -> f64 {
        self.landmarks
            .as_ref()
            .map(FaceLandmarks::mouth_openness)
            .unwrap_or(0.0)
    }
}

/// Face detector black box.
///
/// Returns zero or more candidates per call, in normalized coordinates.
#[async_trait::async_trait]
pub trait FaceDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, image: &RgbaImage) -> Result<Vec<FaceCandidate>, DetectorError>;
}

/// Candidate scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub center_weight: f64,
    pub area_weight: f64,
    /// Mouth openness above which a face counts as speaking.
    pub speaking_threshold: f64,
    pub speaking_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            center_weight: 20.0,
            area_weight: 30.0,
            speaking_threshold: 0.3,
            speaking_bonus: 100.0,
        }
    }
}

/// A scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFace {
    pub candidate: FaceCandidate,
    pub score: f64,
    pub is_speaking: bool,
}

impl ScoredFace {
    pub fn to_anchor(&self, timestamp_s: f64) -> AnchorPoint {
        AnchorPoint {
            timestamp_s,
            center_x: self.candidate.center_x,
            center_y: self.candidate.center_y,
            width: self.candidate.width,
            height: self.candidate.height,
            confidence_score: self.score,
            is_speaking: self.is_speaking,
        }
    }
}

pub fn score_candidate(candidate: &FaceCandidate, config: &ScoringConfig) -> ScoredFace {
    let center_bias = 1.0 - (candidate.center_x - 0.5).abs();
    let is_speaking = candidate.mouth_openness() > config.speaking_threshold;
    let mut score = config.center_weight * center_bias + config.area_weight * candidate.area();
    if is_speaking {
        score += config.speaking_bonus;
    }
    ScoredFace {
        candidate: candidate.clone(),
        score,
        is_speaking,
    }
}

/// Highest-scoring candidate. Ties keep the earlier one.
pub fn select_best(candidates: &[FaceCandidate], config: &ScoringConfig) -> Option<ScoredFace> {
    candidates
        .iter()
        .filter(|c| c.center_x.is_finite() && c.center_y.is_finite())
        .map(|c| score_candidate(c, config))
        .fold(None, |best: Option<ScoredFace>, next| match best {
            Some(b) if b.score >= next.score => Some(b),
            _ => Some(next),
        })
}

/// Run `detector` on `image` and turn the best face into an anchor.
///
/// Detector errors are logged and read as "no face".
pub async fn detect_anchor(
    detector: &dyn FaceDetector,
    image: &RgbaImage,
    timestamp_s: f64,
    config: &ScoringConfig,
) -> Option<AnchorPoint> {
    match detector.detect(image).await {
        Ok(candidates) => select_best(&candidates, config).map(|best| best.to_anchor(timestamp_s)),
        Err(e) => {
            tracing::warn!(
                detector = detector.name(),
                timestamp_s,
                error = %e,
                "Face detection failed, treating frame as empty"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks_with_gap(gap: f64) -> FaceLandmarks {
        let mut points = vec![Point2D::new(0.5, 0.5); 68];
        points[BROW] = Point2D::new(0.5, 0.3);
        points[CHIN] = Point2D::new(0.5, 0.7);
        for &i in INNER_LIP_UPPER {
            points[i] = Point2D::new(0.5, 0.6);
        }
        for &i in INNER_LIP_LOWER {
            points[i] = Point2D::new(0.5, 0.6 + gap);
        }
        FaceLandmarks::new(points)
    }

    #[test]
    fn test_mouth_openness() {
        assert_eq!(landmarks_with_gap(0.0).mouth_openness(), 0.0);
        // 0.04 / 0.4 = 10% of face height.
        assert!((landmarks_with_gap(0.04).mouth_openness() - 0.8).abs() < 1e-9);
        assert_eq!(FaceLandmarks::new(vec![Point2D::new(0.1, 0.1)]).mouth_openness(), 0.0);
    }

    #[test]
    fn test_score_prefers_centered_and_large() {
        let config = ScoringConfig::default();
        let centered = score_candidate(&FaceCandidate::from_box(0.5, 0.5, 0.2, 0.2), &config);
        assert!((centered.score - (20.0 + 30.0 * 0.04)).abs() < 1e-9);

        let off = FaceCandidate::from_box(0.9, 0.5, 0.2, 0.2);
        let big = FaceCandidate::from_box(0.5, 0.5, 0.5, 0.5);
        let best = select_best(&[off, big.clone()], &config).unwrap();
        assert_eq!(best.candidate, big);
    }

    #[test]
    fn test_speaker_beats_larger_silent_face() {
        let config = ScoringConfig::default();
        let silent = FaceCandidate::from_box(0.5, 0.5, 0.6, 0.6);
        let mut speaker = FaceCandidate::from_landmarks(landmarks_with_gap(0.04)).unwrap();
        speaker.center_x = 0.8;
        speaker.width = 0.1;
        speaker.height = 0.1;

        let best = select_best(&[silent, speaker.clone()], &config).unwrap();
        assert!(best.is_speaking);
        assert_eq!(best.candidate.center_x, 0.8);
        assert!(best.to_anchor(1.5).is_speaking);
    }

    #[test]
    fn test_select_best_of_nothing() {
        assert!(select_best(&[], &ScoringConfig::default()).is_none());
    }

    struct Broken;

    #[async_trait::async_trait]
    impl FaceDetector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn detect(&self, _image: &RgbaImage) -> Result<Vec<FaceCandidate>, DetectorError> {
            Err(DetectorError::Failed("model crashed".into()))
        }
    }

    #[tokio::test]
    async fn test_detector_failure_is_no_detection() {
        let image = RgbaImage::new(8, 8);
        let anchor = detect_anchor(&Broken, &image, 0.0, &ScoringConfig::default()).await;
        assert!(anchor.is_none());
    }
}
