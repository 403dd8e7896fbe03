//! Reframe data: face anchors, camera keyframes, and shot segments.

use serde::{Deserialize, Serialize};

/// A timestamped face detection used as ground truth for the camera path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    /// Source time in seconds.
    pub timestamp_s: f64,
    /// Horizontal face center, normalized.
    pub center_x: f64,
    /// Vertical face center, normalized.
    pub center_y: f64,
    /// Face box width, normalized.
    pub width: f64,
    /// Face box height, normalized.
    pub height: f64,
    /// Selection score of the chosen candidate.
    pub confidence_score: f64,
    /// Whether the mouth-openness metric marked the face as speaking.
    #[serde(default)]
    pub is_speaking: bool,
}

impl AnchorPoint {
    /// Anchor at `timestamp_s` centered on `(center_x, center_y)`.
    pub fn at(timestamp_s: f64, center_x: f64, center_y: f64) -> Self {
        Self {
            timestamp_s,
            center_x,
            center_y,
            width: 0.0,
            height: 0.0,
            confidence_score: 1.0,
            is_speaking: false,
        }
    }
}

/// Sort anchors by time. The sort is stable, so anchors sharing a
/// timestamp keep their detection order.
pub fn sort_anchors(anchors: &mut [AnchorPoint]) {
    anchors.sort_by(|a, b| a.timestamp_s.total_cmp(&b.timestamp_s));
}

/// A timestamped virtual-camera position.
///
/// Distinct from container keyframes: these describe where the crop window
/// sits, not which samples are decodable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraKeyframe {
    /// Source time in seconds.
    pub timestamp_s: f64,
    /// Camera center, normalized.
    pub center_x: f64,
    pub center_y: f64,
    /// Zoom factor; 1.0 shows the largest crop that fits the source.
    pub scale: f64,
}

impl CameraKeyframe {
    pub fn new(timestamp_s: f64, center_x: f64, center_y: f64, scale: f64) -> Self {
        Self {
            timestamp_s,
            center_x,
            center_y,
            scale,
        }
    }
}

/// Check the camera path invariant: at least two keyframes with strictly
/// increasing timestamps.
pub fn validate_keyframes(keyframes: &[CameraKeyframe]) -> Result<(), KeyframeError> {
    if keyframes.len() < 2 {
        return Err(KeyframeError::TooFew(keyframes.len()));
    }
    for (index, pair) in keyframes.windows(2).enumerate() {
        if pair[1].timestamp_s <= pair[0].timestamp_s {
            return Err(KeyframeError::NotIncreasing {
                index: index + 1,
                timestamp_s: pair[1].timestamp_s,
            });
        }
    }
    Ok(())
}

/// Camera path validation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyframeError {
    #[error("camera path needs at least 2 keyframes, got {0}")]
    TooFew(usize),

    #[error("keyframe {index} at {timestamp_s}s does not advance time")]
    NotIncreasing { index: usize, timestamp_s: f64 },
}

/// A contiguous span with no detected hard cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotSegment {
    pub start_s: f64,
    pub end_s: f64,
    /// No sampled frame difference exceeded the static threshold.
    pub is_static: bool,
}

impl ShotSegment {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_anchors_is_stable() {
        let mut anchors = vec![
            AnchorPoint::at(2.0, 0.1, 0.5),
            AnchorPoint::at(1.0, 0.2, 0.5),
            AnchorPoint::at(2.0, 0.3, 0.5),
        ];
        sort_anchors(&mut anchors);
        assert_eq!(anchors[0].center_x, 0.2);
        assert_eq!(anchors[1].center_x, 0.1);
        assert_eq!(anchors[2].center_x, 0.3);
    }

    #[test]
    fn test_validate_keyframes() {
        let ok = [
            CameraKeyframe::new(0.0, 0.5, 0.45, 1.0),
            CameraKeyframe::new(1.0, 0.5, 0.45, 1.0),
        ];
        assert!(validate_keyframes(&ok).is_ok());

        let single = [CameraKeyframe::new(0.0, 0.5, 0.45, 1.0)];
        assert_eq!(validate_keyframes(&single), Err(KeyframeError::TooFew(1)));

        let flat = [
            CameraKeyframe::new(0.0, 0.5, 0.45, 1.0),
            CameraKeyframe::new(0.0, 0.5, 0.45, 1.0),
        ];
        assert!(matches!(
            validate_keyframes(&flat),
            Err(KeyframeError::NotIncreasing { index: 1, .. })
        ));
    }

    #[test]
    fn test_keyframe_json_shape() {
        let kf = CameraKeyframe::new(1.5, 0.25, 0.45, 1.0);
        let json = serde_json::to_string(&kf).unwrap();
        assert!(json.contains("\"timestamp_s\":1.5"));
        assert!(json.contains("\"center_x\":0.25"));
    }

    #[test]
    fn test_anchor_defaults_speaking_flag() {
        let raw = r#"{"timestamp_s":0.0,"center_x":0.4,"center_y":0.5,"width":0.1,"height":0.2,"confidence_score":12.0}"#;
        let anchor: AnchorPoint = serde_json::from_str(raw).unwrap();
        assert!(!anchor.is_speaking);
    }
}
