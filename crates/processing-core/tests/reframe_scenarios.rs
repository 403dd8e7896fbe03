use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clipframe_common::error::ClipframeResult;
use clipframe_media_model::{validate_keyframes, AnchorPoint, CameraKeyframe};
use clipframe_processing_core::detection::{DetectorError, FaceCandidate, FaceDetector};
use clipframe_processing_core::{
    sample, FrameSource, Mood, SamplerConfig, SceneSampler, TrajectoryConfig, TrajectorySolver,
    VideoFrame,
};
use image::{Rgba, RgbaImage};

fn load_fixture_anchors() -> Vec<AnchorPoint> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("anchors")
        .join("two-speakers.json");

    let content = std::fs::read_to_string(path).expect("fixture anchors should be readable");
    serde_json::from_str(&content).expect("fixture anchors should parse")
}

fn fnv1a_64(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn signature(keyframes: &[CameraKeyframe]) -> String {
    keyframes
        .iter()
        .map(|kf| {
            format!(
                "{:.5}|{:.6}|{:.6}|{:.6}",
                kf.timestamp_s, kf.center_x, kf.center_y, kf.scale
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A flat grey 10 s clip at 30 fps.
struct FlatClip;

#[async_trait::async_trait]
impl FrameSource for FlatClip {
    fn duration_s(&self) -> f64 {
        10.0
    }

    async fn frame_at(&self, t_s: f64) -> ClipframeResult<Option<VideoFrame>> {
        let frame = (t_s.clamp(0.0, 10.0) * 30.0).floor() as i64;
        let image = RgbaImage::from_pixel(64, 36, Rgba([90, 90, 90, 255]));
        Ok(Some(VideoFrame::new(frame * 1_000_000 / 30, image)))
    }
}

struct NoFaces {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl FaceDetector for NoFaces {
    fn name(&self) -> &str {
        "no-faces"
    }

    async fn detect(&self, _image: &RgbaImage) -> Result<Vec<FaceCandidate>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }
}

#[tokio::test]
async fn faceless_clip_yields_two_centered_keyframes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sampler = SceneSampler::new(
        SamplerConfig::default(),
        Box::new(NoFaces {
            calls: calls.clone(),
        }),
    );
    let output = sampler.run(&FlatClip).await.unwrap();

    assert!(output.anchors.is_empty());
    assert_eq!(output.scan.shots.len(), 1);
    assert!(output.scan.shots[0].is_static);
    // Start and end of the only shot, nothing in between.
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let keyframes = TrajectorySolver::with_defaults().solve(&output.anchors, 10.0);
    assert_eq!(keyframes.len(), 2);
    assert_eq!(keyframes[0], CameraKeyframe::new(0.0, 0.5, 0.45, 1.0));
    assert_eq!(keyframes[1], CameraKeyframe::new(10.0, 0.5, 0.45, 1.0));
}

#[test]
fn cut_mood_on_fixture_switches_speakers_without_panning() {
    let anchors = load_fixture_anchors();
    let solver = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Cut));
    let keyframes = solver.solve(&anchors, 10.0);
    assert!(validate_keyframes(&keyframes).is_ok());

    // Speaker change between 3.0 and 3.75 cuts at the midpoint.
    let before = sample(&keyframes, 3.3).unwrap().center_x;
    let after = sample(&keyframes, 3.45).unwrap().center_x;
    assert!(before < 0.35, "before cut: {before}");
    assert!(after > 0.7, "after cut: {after}");

    // And back again between 6.5 and 8.0.
    assert!(sample(&keyframes, 7.2).unwrap().center_x > 0.6);
    assert!(sample(&keyframes, 7.3).unwrap().center_x < 0.35);
}

#[test]
fn linear_mood_on_fixture_stays_in_frame_and_is_stable() {
    let anchors = load_fixture_anchors();
    let solver = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Linear));

    let first = solver.solve(&anchors, 10.0);
    let second = solver.solve(&anchors, 10.0);

    assert_eq!(first.len(), 301);
    assert!(first.iter().all(|k| (0.0..=1.0).contains(&k.center_x)));
    assert!(first.iter().all(|k| (k.center_y - 0.45).abs() < 1e-12));
    assert_eq!(fnv1a_64(&signature(&first)), fnv1a_64(&signature(&second)));
}
