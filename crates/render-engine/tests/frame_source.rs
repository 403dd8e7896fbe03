//! Random frame lookup through codec sessions, and anchor sampling on top.

mod common;

use std::sync::Arc;

use clipframe_container::SyntheticSource;
use clipframe_processing_core::detection::{DetectorError, FaceCandidate, FaceDetector};
use clipframe_processing_core::{FrameSource, SamplerConfig, SceneSampler};
use clipframe_render_engine::{DecodedFrameSource, PipelineError};
use common::{FakeBackend, FakeOptions};
use image::RgbaImage;

fn open(backend: &FakeBackend) -> DecodedFrameSource {
    let data = SyntheticSource {
        width: 64,
        height: 36,
        duration_s: 3.0,
        gop_frames: 30,
        ..Default::default()
    }
    .build()
    .unwrap();
    DecodedFrameSource::open(data, Arc::new(backend.clone())).unwrap()
}

/// Frame index painted into the left half of a fake decoder picture.
fn painted_index(image: &RgbaImage) -> u32 {
    let p = image.get_pixel(0, 0).0;
    u32::from(p[0]) | (u32::from(p[1]) << 8)
}

#[tokio::test]
async fn test_frame_at_decodes_from_preceding_keyframe() {
    let backend = FakeBackend::default();
    let source = open(&backend);
    assert!((source.duration_s() - 3.0).abs() < 0.05);

    let frame = source.frame_at(2.5).await.unwrap().unwrap();
    assert_eq!(frame.timestamp_us, 2_500_000);
    assert_eq!(painted_index(&frame.image), 75);

    // Between two frames: the earlier one.
    let frame = source.frame_at(1.01).await.unwrap().unwrap();
    assert_eq!(painted_index(&frame.image), 30);

    assert_eq!(backend.live_sessions(), 0);
}

#[tokio::test]
async fn test_frame_at_clamps_to_source() {
    let backend = FakeBackend::new(FakeOptions {
        reorder_delay: 3,
        ..Default::default()
    });
    let source = open(&backend);

    let last = source.frame_at(99.0).await.unwrap().unwrap();
    assert_eq!(painted_index(&last.image), 89);
    let first = source.frame_at(-1.0).await.unwrap().unwrap();
    assert_eq!(painted_index(&first.image), 0);
}

#[test]
fn test_unreadable_source_is_rejected_up_front() {
    let err = DecodedFrameSource::open(
        bytes::Bytes::from_static(b"not a container"),
        Arc::new(FakeBackend::default()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PipelineError::Parse(_)));
}

/// Always sees one face left of center.
struct LeftFace;

#[async_trait::async_trait]
impl FaceDetector for LeftFace {
    fn name(&self) -> &str {
        "left-face"
    }

    async fn detect(&self, _image: &RgbaImage) -> Result<Vec<FaceCandidate>, DetectorError> {
        Ok(vec![FaceCandidate::from_box(0.3, 0.4, 0.2, 0.3)])
    }
}

#[tokio::test]
async fn test_sampler_runs_over_decoded_frames() {
    let backend = FakeBackend::default();
    let source = open(&backend);

    let output = SceneSampler::new(SamplerConfig::default(), Box::new(LeftFace))
        .run(&source)
        .await
        .unwrap();

    assert!(!output.anchors.is_empty());
    assert!(output.anchors.iter().all(|a| (a.center_x - 0.3).abs() < 1e-9));
    assert!(output.anchors.windows(2).all(|w| w[0].timestamp_s <= w[1].timestamp_s));
    assert_eq!(backend.live_sessions(), 0);
}
