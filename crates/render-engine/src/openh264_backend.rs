//! Software H.264 backend built on OpenH264.
//!
//! Container samples use AVCC framing while OpenH264 speaks Annex B, so
//! every sample is converted on the way in and every encoder output on the
//! way out. Parameter sets travel in the `avcC` record, never in samples.

use std::collections::VecDeque;

use bytes::Bytes;
use clipframe_container::avc::{annex_b_to_avcc, avcc_to_annex_b, parse_annex_b, AvcConfig};
use clipframe_media_model::{MediaSample, SampleKind, TrackConfig};
use clipframe_processing_core::VideoFrame;
use image::RgbaImage;
use openh264::decoder::{DecodedYUV, Decoder as H264Decoder};
use openh264::encoder::{BitRate, Encoder as H264Encoder, EncoderConfig, FrameRate, RateControlMode};
use openh264::formats::{YUVBuffer, YUVSource};
use openh264::OpenH264API;

use crate::codec::{
    is_h264, CodecBackend, CodecError, EncodedChunk, EncoderSettings, VideoDecoder, VideoEncoder,
};

/// Largest frame edge accepted by the probe.
const MAX_DIMENSION: u32 = 4096;
/// Largest frame area accepted by the probe (level 5.1).
const MAX_AREA: u32 = 4096 * 2304;

#[derive(Debug, Clone, Default)]
pub struct OpenH264Backend;

impl OpenH264Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CodecBackend for OpenH264Backend {
    fn name(&self) -> &str {
        "openh264"
    }

    fn probe_decoder(&self, config: &TrackConfig) -> Result<(), CodecError> {
        if !is_h264(&config.codec) {
            return Err(CodecError::unsupported(format!(
                "openh264 can not decode {}",
                config.codec
            )));
        }
        AvcConfig::parse(&config.description)
            .map(|_| ())
            .map_err(|e| CodecError::unsupported(format!("avcC record: {e}")))
    }

    fn probe(&self, settings: &EncoderSettings) -> Result<(), CodecError> {
        if !is_h264(&settings.codec) {
            return Err(CodecError::unsupported(format!(
                "openh264 can not encode {}",
                settings.codec
            )));
        }
        let (w, h) = (settings.width, settings.height);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(CodecError::unsupported(format!("{w}x{h} is not a valid 4:2:0 size")));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION || w * h > MAX_AREA {
            return Err(CodecError::unsupported(format!("{w}x{h} exceeds openh264 limits")));
        }
        Ok(())
    }

    fn create_decoder(&self, config: &TrackConfig) -> Result<Box<dyn VideoDecoder>, CodecError> {
        self.probe_decoder(config)?;
        let avc = AvcConfig::parse(&config.description)
            .map_err(|e| CodecError::unsupported(e.to_string()))?;
        let decoder = H264Decoder::new()
            .map_err(|e| CodecError::decode(format!("OpenH264 decoder init failed: {e:?}")))?;
        tracing::debug!(codec = %config.codec, "OpenH264 decoder created");
        Ok(Box::new(OpenH264Decoder {
            decoder,
            parameter_sets: avc.parameter_sets_annex_b(),
            nal_length_size: avc.nal_length_size,
            sent_parameter_sets: false,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
        }))
    }

    fn create_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, CodecError> {
        self.probe(settings)?;
        let bitrate = u32::try_from(settings.bitrate).unwrap_or(u32::MAX);
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(bitrate))
            .max_frame_rate(FrameRate::from_hz(settings.fps.max(1) as f32))
            .rate_control_mode(RateControlMode::Bitrate);
        let encoder = H264Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| CodecError::encode(format!("OpenH264 encoder init failed: {e:?}")))?;
        tracing::info!(
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            bitrate = settings.bitrate,
            "OpenH264 encoder created"
        );
        Ok(Box::new(OpenH264Encoder {
            encoder,
            settings: settings.clone(),
            config_sent: false,
        }))
    }
}

struct OpenH264Decoder {
    decoder: H264Decoder,
    parameter_sets: Vec<u8>,
    nal_length_size: u8,
    sent_parameter_sets: bool,
    /// Presentation times of submitted samples not yet decoded, ascending.
    pending: VecDeque<i64>,
    /// Decoded pictures not yet pulled.
    ready: VecDeque<VideoFrame>,
}

impl OpenH264Decoder {
    fn queue_pts(&mut self, pts: i64) {
        let at = self.pending.partition_point(|&t| t <= pts);
        self.pending.insert(at, pts);
    }
}

fn to_rgba(yuv: &DecodedYUV<'_>) -> Result<RgbaImage, CodecError> {
    let (w, h) = yuv.dimensions();
    let mut rgba = vec![0u8; w * h * 4];
    yuv.write_rgba8(&mut rgba);
    RgbaImage::from_raw(w as u32, h as u32, rgba)
        .ok_or_else(|| CodecError::decode("decoded picture has an unexpected size"))
}

#[async_trait::async_trait]
impl VideoDecoder for OpenH264Decoder {
    fn queue_depth(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    async fn decode(&mut self, sample: &MediaSample) -> Result<(), CodecError> {
        let mut packet = Vec::with_capacity(sample.data.len() + self.parameter_sets.len());
        if !self.sent_parameter_sets {
            packet.extend_from_slice(&self.parameter_sets);
            self.sent_parameter_sets = true;
        }
        let annex_b = avcc_to_annex_b(&sample.data, self.nal_length_size)
            .map_err(|e| CodecError::decode(e.to_string()))?;
        packet.extend_from_slice(&annex_b);
        self.queue_pts(sample.timestamp_us);

        let image = match self.decoder.decode(&packet) {
            Ok(Some(yuv)) => Some(to_rgba(&yuv)?),
            Ok(None) => None,
            Err(e) => return Err(CodecError::decode(format!("{e:?}"))),
        };
        if let Some(image) = image {
            let pts = self.pending.pop_front().unwrap_or(sample.timestamp_us);
            self.ready.push_back(VideoFrame::new(pts, image));
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, CodecError> {
        Ok(self.ready.pop_front())
    }

    async fn flush(&mut self) -> Result<(), CodecError> {
        let images = self
            .decoder
            .flush_remaining()
            .map_err(|e| CodecError::decode(format!("{e:?}")))?
            .iter()
            .map(to_rgba)
            .collect::<Result<Vec<_>, _>>()?;
        let flushed = images.len();
        for image in images {
            let pts = match self.pending.pop_front() {
                Some(pts) => pts,
                None => self.ready.back().map_or(0, |f| f.timestamp_us),
            };
            self.ready.push_back(VideoFrame::new(pts, image));
        }
        if !self.pending.is_empty() {
            tracing::debug!(
                dropped = self.pending.len(),
                "Decoder flushed with samples that produced no picture"
            );
            self.pending.clear();
        }
        tracing::trace!(flushed, "OpenH264 decoder drained");
        Ok(())
    }
}

struct OpenH264Encoder {
    encoder: H264Encoder,
    settings: EncoderSettings,
    config_sent: bool,
}

#[async_trait::async_trait]
impl VideoEncoder for OpenH264Encoder {
    async fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedChunk>, CodecError> {
        let (w, h) = (frame.width(), frame.height());
        if (w, h) != (self.settings.width, self.settings.height) {
            return Err(CodecError::encode(format!(
                "frame is {w}x{h}, encoder expects {}x{}",
                self.settings.width, self.settings.height
            )));
        }
        if force_keyframe {
            self.encoder.force_intra_frame();
        }

        let yuv = YUVBuffer::from_vec(rgba_to_i420(&frame.image), w as usize, h as usize);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CodecError::encode(format!("{e:?}")))?;

        let mut annex_b = Vec::new();
        for layer_idx in 0..bitstream.num_layers() {
            if let Some(layer) = bitstream.layer(layer_idx) {
                for nal_idx in 0..layer.nal_count() {
                    if let Some(nal) = layer.nal_unit(nal_idx) {
                        annex_b.extend_from_slice(nal);
                    }
                }
            }
        }
        if annex_b.is_empty() {
            // Rate control skipped the frame.
            return Ok(Vec::new());
        }

        let unit = parse_annex_b(&annex_b);
        let config = match (self.config_sent, unit.sps, unit.pps) {
            (false, Some(sps), Some(pps)) => {
                let record = AvcConfig::from_parameter_sets(
                    Bytes::copy_from_slice(sps),
                    Bytes::copy_from_slice(pps),
                )
                .map_err(|e| CodecError::encode(e.to_string()))?;
                self.config_sent = true;
                Some(TrackConfig::video(record.codec_string("avc1"), w, h, record.to_bytes()))
            }
            _ => None,
        };

        let kind = if unit.is_idr { SampleKind::Key } else { SampleKind::Delta };
        let duration = 1_000_000 / i64::from(self.settings.fps.max(1));
        let sample = MediaSample::new(
            kind,
            frame.timestamp_us,
            duration,
            Bytes::from(annex_b_to_avcc(&annex_b)),
        );
        Ok(vec![EncodedChunk { sample, config }])
    }

    async fn flush(&mut self) -> Result<Vec<EncodedChunk>, CodecError> {
        Ok(Vec::new())
    }
}

/// BT.601 limited-range RGBA to planar I420, chroma averaged over 2x2.
fn rgba_to_i420(image: &RgbaImage) -> Vec<u8> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut out = vec![0u8; w * h + 2 * cw * ch];
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for (x, y, p) in image.enumerate_pixels() {
        let [r, g, b, _] = p.0.map(f32::from);
        y_plane[y as usize * w + x as usize] =
            (0.257 * r + 0.504 * g + 0.098 * b + 16.0).round().clamp(0.0, 255.0) as u8;
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                    if x < w && y < h {
                        let p = image.get_pixel(x as u32, y as u32).0;
                        r += f32::from(p[0]);
                        g += f32::from(p[1]);
                        b += f32::from(p[2]);
                        n += 1.0;
                    }
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_plane[cy * cw + cx] =
                (-0.148 * r - 0.291 * g + 0.439 * b + 128.0).round().clamp(0.0, 255.0) as u8;
            v_plane[cy * cw + cx] =
                (0.439 * r - 0.368 * g - 0.071 * b + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
