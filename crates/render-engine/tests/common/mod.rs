//! Instrumented fake codecs.
//!
//! The fake decoder turns synthetic access units back into pictures that
//! carry their frame index: the left half is `[lo, hi, 0]` and the right
//! half `[lo, hi, 255]`. The fake encoder records the center pixel of each
//! frame as the sample payload, so a test can read back which source frame
//! (and which half of it) ended up at every output position.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clipframe_container::synthetic::frame_index;
use clipframe_container::SyntheticSource;
use clipframe_media_model::{MediaSample, SampleKind, TrackConfig};
use clipframe_processing_core::VideoFrame;
use clipframe_render_engine::codec::is_h264;
use clipframe_render_engine::{
    CodecBackend, CodecError, EncodedChunk, EncoderSettings, VideoDecoder, VideoEncoder,
};
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Samples the decoder holds before returning a picture.
    pub reorder_delay: usize,
    /// Simulated decode time per sample.
    pub decode_delay: Duration,
    /// Simulated encode time per frame.
    pub encode_delay: Duration,
    /// Chunks the encoder holds back before returning them.
    pub encoder_lag: usize,
    /// Frame index whose decode fails.
    pub fail_decode_at: Option<u32>,
    /// Largest encoder output accepted by the probe.
    pub max_size: Option<(u32, u32)>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub live_sessions: AtomicUsize,
    pub sessions_created: AtomicUsize,
    pub samples_decoded: AtomicUsize,
    pub frames_encoded: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub options: FakeOptions,
    pub counters: Arc<Counters>,
}

impl FakeBackend {
    pub fn new(options: FakeOptions) -> Self {
        Self {
            options,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.counters.live_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.counters.sessions_created.load(Ordering::SeqCst)
    }

    fn guard(&self) -> SessionGuard {
        self.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.counters.live_sessions.fetch_add(1, Ordering::SeqCst);
        SessionGuard(self.counters.clone())
    }
}

struct SessionGuard(Arc<Counters>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CodecBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn probe_decoder(&self, config: &TrackConfig) -> Result<(), CodecError> {
        if is_h264(&config.codec) {
            Ok(())
        } else {
            Err(CodecError::unsupported(config.codec.clone()))
        }
    }

    fn probe(&self, settings: &EncoderSettings) -> Result<(), CodecError> {
        match self.options.max_size {
            Some((w, h)) if settings.width > w || settings.height > h => Err(CodecError::unsupported(
                format!("{}x{} exceeds {w}x{h}", settings.width, settings.height),
            )),
            _ => Ok(()),
        }
    }

    fn create_decoder(&self, config: &TrackConfig) -> Result<Box<dyn VideoDecoder>, CodecError> {
        let (width, height) = config.dimensions().unwrap_or((64, 36));
        Ok(Box::new(FakeDecoder {
            width,
            height,
            options: self.options.clone(),
            held: Vec::new(),
            draining: false,
            counters: self.counters.clone(),
            _guard: self.guard(),
        }))
    }

    fn create_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, CodecError> {
        Ok(Box::new(FakeEncoder {
            settings: settings.clone(),
            options: self.options.clone(),
            held: Vec::new(),
            config_sent: false,
            keyframe_sent: false,
            counters: self.counters.clone(),
            _guard: self.guard(),
        }))
    }
}

/// Picture for frame `index`.
pub fn frame_image(index: u32, width: u32, height: u32) -> RgbaImage {
    let (lo, hi) = ((index & 0xff) as u8, ((index >> 8) & 0xff) as u8);
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([lo, hi, 0, 255])
        } else {
            Rgba([lo, hi, 255, 255])
        }
    })
}

/// Source frame index and side (`true` = right) recorded in an output
/// sample by the fake encoder.
pub fn decode_marker(sample: &MediaSample) -> (u32, bool) {
    let d = &sample.data;
    (u32::from(d[0]) | (u32::from(d[1]) << 8), d[2] > 127)
}

struct FakeDecoder {
    width: u32,
    height: u32,
    options: FakeOptions,
    /// `(pts, frame index)` of accepted samples.
    held: Vec<(i64, u32)>,
    /// Set by `flush`: everything held is releasable.
    draining: bool,
    counters: Arc<Counters>,
    _guard: SessionGuard,
}

impl FakeDecoder {
    fn emit(&mut self) -> VideoFrame {
        let first = self
            .held
            .iter()
            .enumerate()
            .min_by_key(|(_, (pts, _))| *pts)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let (pts, index) = self.held.remove(first);
        VideoFrame::new(pts, frame_image(index, self.width, self.height))
    }
}

#[async_trait::async_trait]
impl VideoDecoder for FakeDecoder {
    fn queue_depth(&self) -> usize {
        self.held.len()
    }

    async fn decode(&mut self, sample: &MediaSample) -> Result<(), CodecError> {
        if !self.options.decode_delay.is_zero() {
            tokio::time::sleep(self.options.decode_delay).await;
        }
        let index = frame_index(&sample.data).ok_or_else(|| CodecError::decode("bad payload"))?;
        if self.options.fail_decode_at == Some(index) {
            return Err(CodecError::decode(format!("injected failure at frame {index}")));
        }
        self.counters.samples_decoded.fetch_add(1, Ordering::SeqCst);
        self.held.push((sample.timestamp_us, index));
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, CodecError> {
        let ready = if self.draining {
            !self.held.is_empty()
        } else {
            self.held.len() > self.options.reorder_delay
        };
        Ok(ready.then(|| self.emit()))
    }

    async fn flush(&mut self) -> Result<(), CodecError> {
        self.draining = true;
        Ok(())
    }
}

struct FakeEncoder {
    settings: EncoderSettings,
    options: FakeOptions,
    held: Vec<MediaSample>,
    config_sent: bool,
    keyframe_sent: bool,
    counters: Arc<Counters>,
    _guard: SessionGuard,
}

impl FakeEncoder {
    fn chunk(&mut self, sample: MediaSample) -> EncodedChunk {
        let config = (!self.config_sent).then(|| {
            let mut config = SyntheticSource::default().video_config();
            config.params = clipframe_media_model::TrackParams::Video {
                width: self.settings.width,
                height: self.settings.height,
            };
            config
        });
        self.config_sent = true;
        EncodedChunk { sample, config }
    }
}

#[async_trait::async_trait]
impl VideoEncoder for FakeEncoder {
    async fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedChunk>, CodecError> {
        if !self.options.encode_delay.is_zero() {
            tokio::time::sleep(self.options.encode_delay).await;
        }
        if frame.width() != self.settings.width || frame.height() != self.settings.height {
            return Err(CodecError::encode("frame size does not match encoder"));
        }
        self.counters.frames_encoded.fetch_add(1, Ordering::SeqCst);

        let center = frame.image.get_pixel(frame.width() / 2, frame.height() / 2).0;
        let key = force_keyframe || !self.keyframe_sent;
        self.keyframe_sent = true;
        let kind = if key { SampleKind::Key } else { SampleKind::Delta };
        let duration = 1_000_000 / i64::from(self.settings.fps.max(1));
        self.held.push(MediaSample::new(
            kind,
            frame.timestamp_us,
            duration,
            Bytes::from(vec![center[0], center[1], center[2]]),
        ));

        let mut out = Vec::new();
        while self.held.len() > self.options.encoder_lag {
            let sample = self.held.remove(0);
            out.push(self.chunk(sample));
        }
        Ok(out)
    }

    async fn flush(&mut self) -> Result<Vec<EncodedChunk>, CodecError> {
        let held = std::mem::take(&mut self.held);
        Ok(held.into_iter().map(|s| self.chunk(s)).collect())
    }
}
