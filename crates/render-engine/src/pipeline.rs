//! Transcode pipeline.
//!
//! One run turns a source container plus a [`RenderConfig`] into a new
//! container. Stages run strictly in order:
//!
//! ```text
//! Init ─► Demux ─┬─► Passthrough ──────────────────────┐
//!                └─► Probe ─► DecodeEncodeLoop ─► AudioCopy ─┴─► Finalize
//! ```
//!
//! Inside the decode/encode loop a decode side and an encode side run
//! concurrently on the same task, joined by a bounded channel. Every decoded
//! frame holds a [`FrameGauge`] slot until the encoder has consumed it.
//! The decode side pulls pictures out of the decoder one at a time and only
//! while the gauge is under the in-flight bound, and stops feeding samples
//! while the gauge plus the decoder's own queue are at the bound.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clipframe_common::clock::DriftMeasurement;
use clipframe_common::config::{CompositorPreference, RenderDefaults};
use clipframe_container::remux::shifted_audio;
use clipframe_container::{ContainerReader, ContainerWriter, PassthroughRemuxer};
use clipframe_media_model::{CameraKeyframe, MediaSample, RenderConfig, TrackId, TrackKind};
use clipframe_processing_core::{trajectory, VideoFrame};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::codec::{CodecBackend, EncodedChunk, EncoderSettings, VideoDecoder, VideoEncoder};
use crate::compositor::Compositor;
use crate::error::PipelineError;
use crate::inflight::{FrameGauge, InFlightFrame};
use crate::overlay::OverlayRasterizer;
use crate::progress::{CancelFlag, ProgressCallback, ProgressReporter, RenderPhase};

/// First audio sample further than this from the first video frame is
/// worth a warning.
const AV_DRIFT_WARN_MS: f64 = 50.0;

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum decoded frames alive before the encoder consumes them.
    pub max_in_flight_frames: usize,

    /// Longest output span without a keyframe (us).
    pub gop_ceiling_us: i64,

    /// Sleep between backpressure checks.
    pub backpressure_poll: Duration,

    pub bitrate_factor: f64,
    pub min_bitrate: u64,

    pub compositor: CompositorPreference,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_defaults(&RenderDefaults::default())
    }
}

impl PipelineConfig {
    pub fn from_defaults(defaults: &RenderDefaults) -> Self {
        Self {
            max_in_flight_frames: defaults.max_in_flight_frames.max(1),
            gop_ceiling_us: defaults.gop_ceiling_us,
            backpressure_poll: Duration::from_millis(defaults.backpressure_poll_ms.max(1)),
            bitrate_factor: defaults.bitrate_factor,
            min_bitrate: defaults.min_bitrate,
            compositor: defaults.compositor,
        }
    }

    /// Output bitrate for a request.
    pub fn resolve_bitrate(&self, request: &RenderConfig) -> u64 {
        let defaults = RenderDefaults {
            bitrate_factor: self.bitrate_factor,
            min_bitrate: self.min_bitrate,
            ..RenderDefaults::default()
        };
        defaults.resolve_bitrate(request.bitrate, request.width, request.height, request.fps)
    }
}

/// Counters from one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Served by copying samples instead of transcoding.
    pub passthrough: bool,
    pub samples_submitted: u64,
    pub frames_decoded: u64,
    /// Decoded frames before the trim start, discarded unrendered.
    pub preroll_dropped: u64,
    pub frames_encoded: u64,
    pub forced_keyframes: u64,
    pub output_keyframes: u64,
    pub video_samples_written: u64,
    pub audio_samples_written: u64,
    /// Highest number of decoded frames alive at once.
    pub peak_in_flight: usize,
    /// Source time that became zero in the output.
    pub source_start_us: i64,
}

/// Successful run result.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub data: Bytes,
    pub stats: PipelineStats,
}

/// Whether the output video track exists yet. The track description is
/// only known once the encoder has produced its first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputTrack {
    PendingTrackInit,
    TrackReady(TrackId),
}

impl OutputTrack {
    /// Append one encoder chunk, creating the track on the first one.
    fn write(
        &mut self,
        writer: &mut ContainerWriter,
        chunk: EncodedChunk,
    ) -> Result<(), PipelineError> {
        let track = match *self {
            OutputTrack::TrackReady(track) => track,
            OutputTrack::PendingTrackInit => {
                let config = chunk.config.ok_or(PipelineError::TrackNotInitialized)?;
                tracing::info!(
                    codec = %config.codec,
                    description_bytes = config.description.len(),
                    "Output video track created from first encoder output"
                );
                let track = writer.add_video_track(config)?;
                *self = OutputTrack::TrackReady(track);
                track
            }
        };
        writer.add_sample(track, &chunk.sample)?;
        Ok(())
    }
}

/// Runs render requests against one codec backend.
pub struct TranscodePipeline {
    backend: Arc<dyn CodecBackend>,
    config: PipelineConfig,
    rasterizer: Option<OverlayRasterizer>,
    cancel: CancelFlag,
}

impl TranscodePipeline {
    pub fn new(backend: Arc<dyn CodecBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            rasterizer: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_defaults(backend: Arc<dyn CodecBackend>) -> Self {
        Self::new(backend, PipelineConfig::default())
    }

    /// Use a caller-owned cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rasterize overlays with a specific font setup instead of the system
    /// font search.
    pub fn with_rasterizer(mut self, rasterizer: OverlayRasterizer) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Render `request` from the container in `source`.
    ///
    /// Codec sessions are created for this call only and dropped before it
    /// returns, whatever the outcome.
    pub async fn run(
        &self,
        source: Bytes,
        request: &RenderConfig,
        progress: Option<ProgressCallback>,
    ) -> Result<RenderOutput, PipelineError> {
        let mut reporter = ProgressReporter::new(progress);
        let result = self.run_stages(source, request, &mut reporter).await;
        match &result {
            Ok(output) => tracing::info!(
                bytes = output.data.len(),
                frames = output.stats.frames_encoded,
                passthrough = output.stats.passthrough,
                "Render complete"
            ),
            Err(PipelineError::Aborted) => tracing::info!("Render aborted"),
            Err(e) => tracing::error!(error = %e, phase = ?reporter.phase(), "Render failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        source: Bytes,
        request: &RenderConfig,
        reporter: &mut ProgressReporter,
    ) -> Result<RenderOutput, PipelineError> {
        // Init
        reporter.enter(RenderPhase::Initializing);
        request.validate()?;
        self.cancel.check()?;

        // Demux
        let reader = ContainerReader::open(source)?;
        let video_config = reader
            .video_config()
            .cloned()
            .ok_or(PipelineError::NoVideoTrack)?;
        let (src_w, src_h) = video_config
            .dimensions()
            .ok_or(PipelineError::NoVideoTrack)?;
        tracing::info!(
            codec = %video_config.codec,
            width = src_w,
            height = src_h,
            duration_s = reader.info().duration_secs(),
            has_audio = reader.audio_config().is_some(),
            "Source demuxed"
        );
        self.cancel.check()?;

        if request.is_passthrough(src_w, src_h) {
            return self.passthrough(&reader, request, reporter);
        }

        // Probe before any session or overlay work.
        let settings = EncoderSettings::h264(
            request.width,
            request.height,
            request.fps,
            self.config.resolve_bitrate(request),
        );
        self.backend.probe_decoder(&video_config)?;
        self.backend.probe(&settings)?;
        tracing::info!(
            backend = self.backend.name(),
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate,
            "Codec capability probe passed"
        );

        let samples = reader.all_samples(TrackKind::Video);
        let (start_us, end_us) = (request.start_us(), request.end_us());
        let feed = select_feed(&reader, start_us, end_us).ok_or(PipelineError::EmptyTrim {
            start_s: request.start_s,
            end_s: request.end_s,
        })?;
        let total_frames = samples
            .iter()
            .filter(|s| s.timestamp_us >= start_us && s.timestamp_us < end_us)
            .count() as u64;
        reporter.set_total_frames(total_frames);

        let mut compositor = Compositor::create(
            (src_w, src_h),
            (request.width, request.height),
            self.config.compositor,
        )
        .await?;
        if let Some(elements) = request.overlays.as_deref().filter(|o| !o.is_empty()) {
            let layer = match &self.rasterizer {
                Some(rasterizer) => rasterizer.rasterize(elements, request.width, request.height)?,
                None => OverlayRasterizer::new().rasterize(elements, request.width, request.height)?,
            };
            compositor = compositor.with_overlay(layer);
        }
        tracing::info!(
            engine = compositor.engine_name(),
            overlay = compositor.has_overlay(),
            "Compositor ready"
        );
        self.cancel.check()?;

        let mut decoder = self.backend.create_decoder(&video_config)?;
        let mut encoder = self.backend.create_encoder(&settings)?;

        // DecodeEncodeLoop
        reporter.enter(RenderPhase::Rendering);
        let gauge = FrameGauge::new();
        let (tx, rx) = mpsc::channel(self.config.max_in_flight_frames.max(1));

        let decode_side = feed_decoder(
            decoder.as_mut(),
            &samples[feed],
            &gauge,
            tx,
            &self.config,
            &self.cancel,
        );
        let mut encode_side = EncodeSide {
            encoder: encoder.as_mut(),
            compositor: &mut compositor,
            keyframes: request.keyframes.as_deref().filter(|k| !k.is_empty()),
            writer: ContainerWriter::new(),
            track: OutputTrack::PendingTrackInit,
            trim: (start_us, end_us),
            gop_ceiling_us: self.config.gop_ceiling_us,
            first_retained_us: None,
            last_keyframe_us: None,
            processed: 0,
            stats: PipelineStats::default(),
            reporter: &mut *reporter,
        };
        let (decoded, ()) = tokio::try_join!(
            decode_side,
            encode_side.consume(rx, &self.cancel)
        )?;

        let EncodeSide {
            mut writer,
            track,
            first_retained_us,
            mut stats,
            ..
        } = encode_side;
        stats.samples_submitted = decoded.samples_submitted;
        stats.frames_decoded = decoded.frames_decoded;
        stats.peak_in_flight = gauge.peak();

        let offset_us = first_retained_us.ok_or(PipelineError::EmptyTrim {
            start_s: request.start_s,
            end_s: request.end_s,
        })?;
        if track == OutputTrack::PendingTrackInit {
            return Err(PipelineError::TrackNotInitialized);
        }
        stats.source_start_us = offset_us;
        drop(decoder);
        drop(encoder);

        // AudioCopy
        self.cancel.check()?;
        if let Some(audio_config) = reader.audio_config() {
            let audio_track = writer.add_audio_track(audio_config.clone())?;
            let mut first_audio_us = None;
            for sample in shifted_audio(reader.all_samples(TrackKind::Audio), offset_us, end_us) {
                first_audio_us.get_or_insert(sample.timestamp_us);
                writer.add_sample(audio_track, &sample)?;
                stats.audio_samples_written += 1;
            }
            if let Some(measured_us) = first_audio_us {
                let drift = DriftMeasurement {
                    reference_us: 0,
                    measured_us,
                };
                if drift.exceeds_threshold_ms(AV_DRIFT_WARN_MS) {
                    tracing::warn!(drift_ms = drift.drift_ms(), "Audio starts away from first video frame");
                }
            }
            tracing::debug!(samples = stats.audio_samples_written, "Audio copied");
        }

        // Finalize
        self.cancel.check()?;
        reporter.enter(RenderPhase::Finalizing);
        let data = writer.finalize()?;
        reporter.complete_phase();

        Ok(RenderOutput { data, stats })
    }

    fn passthrough(
        &self,
        reader: &ContainerReader,
        request: &RenderConfig,
        reporter: &mut ProgressReporter,
    ) -> Result<RenderOutput, PipelineError> {
        tracing::info!(start_s = request.start_s, end_s = request.end_s, "Using passthrough remux");
        reporter.enter(RenderPhase::Rendering);
        let output = PassthroughRemuxer::new(reader).remux(request.start_s, request.end_s)?;
        reporter.set_total_frames(output.video_samples as u64);
        reporter.complete_phase();

        self.cancel.check()?;
        reporter.enter(RenderPhase::Finalizing);
        reporter.complete_phase();

        Ok(RenderOutput {
            data: output.data,
            stats: PipelineStats {
                passthrough: true,
                video_samples_written: output.video_samples as u64,
                audio_samples_written: output.audio_samples as u64,
                source_start_us: output.source_start_us,
                ..PipelineStats::default()
            },
        })
    }
}

/// Samples to decode for a trim: from the sync sample at or before the
/// start through the last sample presented before the end.
fn select_feed(
    reader: &ContainerReader,
    start_us: i64,
    end_us: i64,
) -> Option<std::ops::RangeInclusive<usize>> {
    let samples = reader.all_samples(TrackKind::Video);
    let first = reader.sync_sample_at_or_before(start_us)?;
    let last = samples.iter().rposition(|s| s.timestamp_us < end_us)?;
    let in_range = samples
        .iter()
        .any(|s| s.timestamp_us >= start_us && s.timestamp_us < end_us);
    (in_range && last >= first).then_some(first..=last)
}

#[derive(Debug, Default)]
struct DecodeCounts {
    samples_submitted: u64,
    frames_decoded: u64,
}

/// Decode side: submit samples in decode order under backpressure and hand
/// every decoded frame to the encode side.
async fn feed_decoder(
    decoder: &mut dyn VideoDecoder,
    samples: &[MediaSample],
    gauge: &FrameGauge,
    tx: mpsc::Sender<InFlightFrame>,
    config: &PipelineConfig,
    cancel: &CancelFlag,
) -> Result<DecodeCounts, PipelineError> {
    let mut counts = DecodeCounts::default();

    for sample in samples {
        wait_for_input(&*decoder, gauge, config, cancel).await?;
        decoder.decode(sample).await?;
        counts.samples_submitted += 1;
        forward_ready(decoder, gauge, &tx, config, cancel, &mut counts).await?;
    }

    cancel.check()?;
    decoder.flush().await?;
    forward_ready(decoder, gauge, &tx, config, cancel, &mut counts).await?;

    tracing::debug!(
        samples = counts.samples_submitted,
        frames = counts.frames_decoded,
        "Decoder drained"
    );
    Ok(counts)
}

/// Pull every picture the decoder has ready, one at a time. A picture is
/// only taken out of the decoder once the gauge has a free slot for it.
async fn forward_ready(
    decoder: &mut dyn VideoDecoder,
    gauge: &FrameGauge,
    tx: &mpsc::Sender<InFlightFrame>,
    config: &PipelineConfig,
    cancel: &CancelFlag,
    counts: &mut DecodeCounts,
) -> Result<(), PipelineError> {
    loop {
        wait_for_slot(gauge, config, cancel).await?;
        let Some(frame) = decoder.next_frame().await? else {
            return Ok(());
        };
        counts.frames_decoded += 1;
        tx.send(gauge.admit(frame))
            .await
            .map_err(|_| PipelineError::Decode("encode side stopped accepting frames".into()))?;
    }
}

/// Wait until another sample can be submitted: in-flight frames plus the
/// decoder's queue must stay under the bound.
///
/// With nothing in flight the decoder is fed regardless of its queue, since
/// only more input can make it release frames. The gauge itself is still
/// guarded by [`wait_for_slot`].
async fn wait_for_input(
    decoder: &dyn VideoDecoder,
    gauge: &FrameGauge,
    config: &PipelineConfig,
    cancel: &CancelFlag,
) -> Result<(), PipelineError> {
    let mut waited = false;
    loop {
        cancel.check()?;
        let in_flight = gauge.current();
        let queued = decoder.queue_depth();
        if in_flight == 0 || in_flight + queued < config.max_in_flight_frames {
            return Ok(());
        }
        if !waited {
            tracing::trace!(in_flight, queued, "Backpressure: waiting for encoder");
            waited = true;
        }
        tokio::time::sleep(config.backpressure_poll).await;
    }
}

/// Wait until the gauge is below the bound. The decode side is the only
/// producer, so the slot is still free when the next frame is admitted.
async fn wait_for_slot(
    gauge: &FrameGauge,
    config: &PipelineConfig,
    cancel: &CancelFlag,
) -> Result<(), PipelineError> {
    loop {
        cancel.check()?;
        if gauge.current() < config.max_in_flight_frames {
            return Ok(());
        }
        tokio::time::sleep(config.backpressure_poll).await;
    }
}

/// Encode side state.
struct EncodeSide<'a> {
    encoder: &'a mut dyn VideoEncoder,
    compositor: &'a mut Compositor,
    keyframes: Option<&'a [CameraKeyframe]>,
    writer: ContainerWriter,
    track: OutputTrack,
    trim: (i64, i64),
    gop_ceiling_us: i64,
    first_retained_us: Option<i64>,
    last_keyframe_us: Option<i64>,
    processed: u64,
    stats: PipelineStats,
    reporter: &'a mut ProgressReporter,
}

impl EncodeSide<'_> {
    async fn consume(
        &mut self,
        mut rx: mpsc::Receiver<InFlightFrame>,
        cancel: &CancelFlag,
    ) -> Result<(), PipelineError> {
        loop {
            let next = tokio::select! {
                frame = rx.recv() => frame,
                _ = cancel.cancelled() => return Err(PipelineError::Aborted),
            };
            let Some(frame) = next else {
                break;
            };
            self.submit(frame).await?;
        }

        cancel.check()?;
        let chunks = self.encoder.flush().await?;
        cancel.check()?;
        self.write_chunks(chunks)?;

        tracing::debug!(
            encoded = self.stats.frames_encoded,
            forced_keyframes = self.stats.forced_keyframes,
            "Encoder drained"
        );
        Ok(())
    }

    async fn submit(&mut self, frame: InFlightFrame) -> Result<(), PipelineError> {
        let ts = frame.timestamp_us();
        let (start_us, end_us) = self.trim;
        if ts < start_us {
            self.stats.preroll_dropped += 1;
            return Ok(());
        }
        if ts >= end_us {
            return Ok(());
        }

        let first = *self.first_retained_us.get_or_insert(ts);
        let new_ts = ts - first;

        let camera = self
            .keyframes
            .and_then(|k| trajectory::sample(k, frame.frame().timestamp_secs()));
        let crop = self.compositor.crop_for(camera.as_ref());
        let image = self.compositor.render(&frame.frame().image, &crop)?;
        let frame = frame.with_image(image).with_timestamp(new_ts);

        let force = match self.last_keyframe_us {
            None => true,
            Some(last) => new_ts - last >= self.gop_ceiling_us,
        };
        if force {
            self.last_keyframe_us = Some(new_ts);
            self.stats.forced_keyframes += 1;
            tracing::debug!(timestamp_us = new_ts, "Forcing output keyframe");
        }

        let chunks = self.encoder.encode(frame.frame(), force).await?;
        frame.release();
        self.stats.frames_encoded += 1;
        self.write_chunks(chunks)?;

        self.processed += 1;
        self.reporter.frames_done(self.processed);
        Ok(())
    }

    fn write_chunks(&mut self, chunks: Vec<EncodedChunk>) -> Result<(), PipelineError> {
        for chunk in chunks {
            if chunk.sample.is_key() {
                self.stats.output_keyframes += 1;
            }
            self.track.write(&mut self.writer, chunk)?;
            self.stats.video_samples_written += 1;
        }
        Ok(())
    }
}
