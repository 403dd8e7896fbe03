//! Transcode pipeline scenarios against instrumented fake codecs.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use clipframe_common::config::CompositorPreference;
use clipframe_container::{ContainerReader, ContainerWriter, SyntheticSource};
use clipframe_media_model::{AnchorPoint, CameraKeyframe, MediaSample, RenderConfig, TrackKind};
use clipframe_processing_core::{Mood, TrajectoryConfig, TrajectorySolver};
use clipframe_render_engine::{
    PipelineConfig, PipelineError, ProgressCallback, RenderPhase, RenderProgress,
    TranscodePipeline,
};
use common::{decode_marker, FakeBackend, FakeOptions};
use proptest::prelude::*;

fn source(duration_s: f64, gop_frames: u32) -> Bytes {
    SyntheticSource {
        width: 64,
        height: 36,
        duration_s,
        gop_frames,
        ..Default::default()
    }
    .build()
    .unwrap()
}

/// Vertical output of the 64x36 source.
fn vertical(start_s: f64, end_s: f64) -> RenderConfig {
    let mut request = RenderConfig::trim(36, 64, 30, start_s, end_s);
    request.keyframes = Some(vec![CameraKeyframe::new(0.0, 0.5, 0.45, 1.0)]);
    request
}

fn pipeline(backend: &FakeBackend) -> TranscodePipeline {
    let config = PipelineConfig {
        backpressure_poll: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    TranscodePipeline::new(Arc::new(backend.clone()), config)
}

fn video_of(data: &Bytes) -> Vec<MediaSample> {
    let reader = ContainerReader::open(data.clone()).unwrap();
    reader.all_samples(TrackKind::Video).to_vec()
}

#[tokio::test]
async fn test_reframe_render_drops_preroll_and_retimes() {
    let backend = FakeBackend::default();
    let output = pipeline(&backend)
        .run(source(10.0, 30), &vertical(2.5, 5.0), None)
        .await
        .unwrap();

    let stats = &output.stats;
    assert!(!stats.passthrough);
    // Decoding starts at the 2.0 s keyframe.
    assert_eq!(stats.preroll_dropped, 15);
    assert_eq!(stats.frames_encoded, 75);
    assert_eq!(stats.source_start_us, 2_500_000);
    assert!(stats.peak_in_flight <= 5);

    let video = video_of(&output.data);
    assert_eq!(video.len(), 75);
    assert_eq!(video[0].timestamp_us, 0);
    assert!(video[0].is_key());
    assert_eq!(decode_marker(&video[0]).0, 75);
    assert_eq!(decode_marker(&video[74]).0, 149);
    assert!(video.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us));

    let reader = ContainerReader::open(output.data.clone()).unwrap();
    let audio = reader.all_samples(TrackKind::Audio);
    assert!(!audio.is_empty());
    assert!(audio.iter().all(|s| s.timestamp_us >= 0 && s.timestamp_us <= 2_500_000));

    assert_eq!(backend.live_sessions(), 0);
}

#[tokio::test]
async fn test_cut_trajectory_switches_crop_side_at_midpoint() {
    let anchors = vec![AnchorPoint::at(2.5, 0.1, 0.45), AnchorPoint::at(4.5, 0.9, 0.45)];
    let keyframes = TrajectorySolver::new(TrajectoryConfig::with_mood(Mood::Cut)).solve(&anchors, 10.0);

    let mut request = RenderConfig::trim(36, 64, 30, 2.5, 5.0);
    request.keyframes = Some(keyframes);

    let backend = FakeBackend::default();
    let output = pipeline(&backend)
        .run(source(10.0, 30), &request, None)
        .await
        .unwrap();
    let video = video_of(&output.data);

    // Output index i shows source time 2.5 + i / 30.
    assert_eq!(decode_marker(&video[15]), (90, false));
    assert_eq!(decode_marker(&video[29]), (104, false));
    assert_eq!(decode_marker(&video[31]), (106, true));
    assert_eq!(decode_marker(&video[45]), (120, true));
}

#[tokio::test]
async fn test_passthrough_request_skips_codecs() {
    let backend = FakeBackend::default();
    let request = RenderConfig::trim(64, 36, 30, 2.0, 5.0);
    let output = pipeline(&backend)
        .run(source(10.0, 30), &request, None)
        .await
        .unwrap();

    assert!(output.stats.passthrough);
    assert_eq!(backend.sessions_created(), 0);

    let video = video_of(&output.data);
    assert_eq!(video[0].timestamp_us, 0);
    let last = video.last().unwrap();
    let duration_us = last.timestamp_us + last.duration_us;
    assert!((duration_us - 3_000_000).abs() <= 1_000_000, "duration {duration_us}");
}

#[tokio::test]
async fn test_unsupported_output_fails_before_any_session() {
    let backend = FakeBackend::new(FakeOptions {
        max_size: Some((32, 32)),
        ..Default::default()
    });
    let err = pipeline(&backend)
        .run(source(2.0, 30), &vertical(0.0, 1.0), None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CodecUnsupported(_)));
    assert_eq!(backend.sessions_created(), 0);
}

#[tokio::test]
async fn test_decode_failure_aborts_and_releases_sessions() {
    let backend = FakeBackend::new(FakeOptions {
        fail_decode_at: Some(40),
        ..Default::default()
    });
    let err = pipeline(&backend)
        .run(source(4.0, 30), &vertical(0.0, 3.0), None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Decode(_)));
    assert_eq!(backend.sessions_created(), 2);
    assert_eq!(backend.live_sessions(), 0);
}

#[tokio::test]
async fn test_source_errors() {
    let backend = FakeBackend::default();
    let err = pipeline(&backend)
        .run(Bytes::from_static(b"definitely not an mp4"), &vertical(0.0, 1.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Parse(_)));

    let audio_only = {
        let synthetic = SyntheticSource::default();
        let mut writer = ContainerWriter::new();
        let track = writer.add_audio_track(synthetic.audio_config()).unwrap();
        for sample in synthetic.audio_samples().iter().take(20) {
            writer.add_sample(track, sample).unwrap();
        }
        writer.finalize().unwrap()
    };
    let err = pipeline(&backend)
        .run(audio_only, &vertical(0.0, 1.0), None)
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::NoVideoTrack);
}

#[tokio::test]
async fn test_trim_past_end_is_empty() {
    let backend = FakeBackend::default();
    let err = pipeline(&backend)
        .run(source(2.0, 30), &vertical(5.0, 6.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyTrim { .. }));
}

#[tokio::test]
async fn test_lagging_encoder_still_creates_track_lazily() {
    let backend = FakeBackend::new(FakeOptions {
        encoder_lag: 4,
        reorder_delay: 2,
        ..Default::default()
    });
    let output = pipeline(&backend)
        .run(source(3.0, 30), &vertical(0.5, 2.5), None)
        .await
        .unwrap();

    let video = video_of(&output.data);
    assert_eq!(video.len(), 60);
    assert_eq!(decode_marker(&video[0]).0, 15);
}

#[tokio::test]
async fn test_progress_is_monotonic_per_phase() {
    let seen: Arc<Mutex<Vec<RenderProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p));

    let backend = FakeBackend::default();
    pipeline(&backend)
        .run(source(4.0, 30), &vertical(0.0, 4.0), Some(callback))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let phases: Vec<RenderPhase> = seen.iter().map(|p| p.phase).collect();
    let first_rendering = phases.iter().position(|p| *p == RenderPhase::Rendering).unwrap();
    let first_finalizing = phases.iter().position(|p| *p == RenderPhase::Finalizing).unwrap();
    assert_eq!(phases[0], RenderPhase::Initializing);
    assert!(first_rendering < first_finalizing);

    for phase in [RenderPhase::Rendering, RenderPhase::Finalizing] {
        let percents: Vec<f64> = seen.iter().filter(|p| p.phase == phase).map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{phase:?}: {percents:?}");
        assert_eq!(percents.last().copied(), Some(100.0));
    }
    assert_eq!(seen.last().unwrap().total_frames, 120);
}

#[tokio::test]
async fn test_cancel_before_start_is_aborted() {
    let backend = FakeBackend::default();
    let pipeline = pipeline(&backend);
    pipeline.cancel_flag().cancel();
    let err = pipeline
        .run(source(2.0, 30), &vertical(0.0, 1.0), None)
        .await
        .unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(backend.live_sessions(), 0);
}

#[tokio::test]
async fn test_decoder_deeper_than_bound_stays_within_bound() {
    for (bound, reorder) in [(1, 3), (2, 2), (2, 4), (5, 8)] {
        let backend = FakeBackend::new(FakeOptions {
            reorder_delay: reorder,
            encode_delay: Duration::from_micros(300),
            ..Default::default()
        });
        let config = PipelineConfig {
            max_in_flight_frames: bound,
            backpressure_poll: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let output = TranscodePipeline::new(Arc::new(backend.clone()), config)
            .run(source(3.0, 30), &vertical(0.4, 2.6), None)
            .await
            .unwrap();

        assert!(
            output.stats.peak_in_flight <= bound,
            "bound={bound} reorder={reorder} peak={}",
            output.stats.peak_in_flight
        );
        // Held pictures come back on flush, none are lost.
        assert_eq!(output.stats.frames_encoded, 66);
        assert_eq!(output.stats.frames_decoded, output.stats.samples_submitted);
        assert_eq!(backend.live_sessions(), 0);
    }
}

#[tokio::test]
async fn test_gpu_preference_renders_or_fails_before_sessions() {
    let backend = FakeBackend::default();
    let config = PipelineConfig {
        backpressure_poll: Duration::from_millis(1),
        compositor: CompositorPreference::Gpu,
        ..PipelineConfig::default()
    };
    let result = TranscodePipeline::new(Arc::new(backend.clone()), config)
        .run(source(2.0, 30), &vertical(0.0, 1.0), None)
        .await;

    match result {
        Ok(output) => assert_eq!(output.stats.frames_encoded, 30),
        // No adapter on this machine: nothing was opened.
        Err(PipelineError::Compositor(_)) => assert_eq!(backend.sessions_created(), 0),
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.live_sessions(), 0);
}

#[tokio::test]
async fn test_cpu_preference_renders() {
    let backend = FakeBackend::default();
    let config = PipelineConfig {
        backpressure_poll: Duration::from_millis(1),
        compositor: CompositorPreference::Cpu,
        ..PipelineConfig::default()
    };
    let output = TranscodePipeline::new(Arc::new(backend.clone()), config)
        .run(source(2.0, 30), &vertical(0.0, 1.0), None)
        .await
        .unwrap();
    assert_eq!(output.stats.frames_encoded, 30);
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_gop_ceiling_respected(start in 0u32..60, len in 31u32..240) {
        // One source keyframe every 10 s: every output key beyond the
        // first comes from the ceiling.
        let start_s = f64::from(start) / 30.0;
        let end_s = start_s + f64::from(len) / 30.0;
        let backend = FakeBackend::default();
        let output = block_on(pipeline(&backend).run(source(10.0, 300), &vertical(start_s, end_s), None)).unwrap();

        let video = video_of(&output.data);
        let last = video.last().unwrap();
        let duration_us = last.timestamp_us + last.duration_us;
        let keys = video.iter().filter(|s| s.is_key()).count() as i64;
        prop_assert!(keys >= duration_us / 2_000_000);

        let key_times: Vec<i64> = video.iter().filter(|s| s.is_key()).map(|s| s.timestamp_us).collect();
        let mut prev = 0;
        for t in key_times.iter().skip(1).chain(std::iter::once(&duration_us)) {
            prop_assert!(t - prev <= 2_000_000 + 1_000_000 / 30);
            prev = *t;
        }
    }

    #[test]
    fn prop_in_flight_frames_stay_bounded(
        bound in 1usize..7,
        reorder in 0usize..10,
        slow_encoder in any::<bool>(),
    ) {
        let backend = FakeBackend::new(FakeOptions {
            reorder_delay: reorder,
            encode_delay: if slow_encoder { Duration::from_micros(300) } else { Duration::ZERO },
            ..Default::default()
        });
        let config = PipelineConfig {
            max_in_flight_frames: bound,
            backpressure_poll: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let pipeline = TranscodePipeline::new(Arc::new(backend.clone()), config);
        let output = block_on(pipeline.run(source(3.0, 30), &vertical(0.4, 2.6), None)).unwrap();

        prop_assert!(output.stats.peak_in_flight <= bound);
        prop_assert_eq!(output.stats.frames_encoded, 66);
        prop_assert_eq!(backend.live_sessions(), 0);
    }
}
