//! Synthetic MP4 sources for tests and diagnostics.
//!
//! Video samples are single-NAL H.264 access units whose payload carries the
//! frame index, so fake decoders can turn them back into recognizable
//! frames. Audio samples are opaque AAC-sized blobs.

use bytes::{BufMut, Bytes};
use clipframe_media_model::{MediaSample, SampleKind, TrackConfig};

use crate::aac::AudioSpecificConfig;
use crate::avc::{nal_type, AvcConfig};
use crate::error::WriterError;
use crate::writer::ContainerWriter;

/// AAC frames carry 1024 PCM samples.
const AAC_FRAME_SAMPLES: i64 = 1024;

/// Parameters of a generated clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_s: f64,
    /// Frames between sync samples.
    pub gop_frames: u32,
    pub with_audio: bool,
    pub audio_sample_rate: u32,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 30,
            duration_s: 10.0,
            gop_frames: 30,
            with_audio: true,
            audio_sample_rate: 48_000,
        }
    }
}

impl SyntheticSource {
    pub fn frame_count(&self) -> u32 {
        (self.duration_s * f64::from(self.fps)).round().max(0.0) as u32
    }

    /// Presentation time of frame `index`.
    pub fn frame_timestamp_us(&self, index: u32) -> i64 {
        i64::from(index) * 1_000_000 / i64::from(self.fps.max(1))
    }

    pub fn video_config(&self) -> TrackConfig {
        // Baseline profile, level 3.0.
        let record = AvcConfig {
            profile: 0x42,
            compatibility: 0xc0,
            level: 0x1e,
            nal_length_size: 4,
            sps: vec![Bytes::from_static(&[0x67, 0x42, 0xc0, 0x1e, 0xda, 0x02, 0x80])],
            pps: vec![Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80])],
        };
        TrackConfig::video(
            record.codec_string("avc1"),
            self.width,
            self.height,
            record.to_bytes(),
        )
    }

    pub fn audio_config(&self) -> TrackConfig {
        let asc = AudioSpecificConfig::encode(2, self.audio_sample_rate, 2)
            .unwrap_or_else(|| Bytes::from_static(&[0x11, 0x90]));
        TrackConfig::audio("mp4a.40.2", 2, self.audio_sample_rate, asc)
    }

    /// Video samples in decode order.
    pub fn video_samples(&self) -> Vec<MediaSample> {
        let count = self.frame_count();
        (0..count)
            .map(|i| {
                let key = i % self.gop_frames.max(1) == 0;
                let ts = self.frame_timestamp_us(i);
                let duration = self.frame_timestamp_us(i + 1) - ts;
                let kind = if key { SampleKind::Key } else { SampleKind::Delta };
                MediaSample::new(kind, ts, duration, frame_payload(i, key))
            })
            .collect()
    }

    pub fn audio_samples(&self) -> Vec<MediaSample> {
        let rate = i64::from(self.audio_sample_rate.max(1));
        let total_us = (self.duration_s * 1_000_000.0).round() as i64;
        let mut samples = Vec::new();
        let mut index = 0i64;
        loop {
            let ts = index * AAC_FRAME_SAMPLES * 1_000_000 / rate;
            if ts >= total_us {
                break;
            }
            let next = (index + 1) * AAC_FRAME_SAMPLES * 1_000_000 / rate;
            let payload = Bytes::from(vec![(index % 251) as u8; 16]);
            samples.push(MediaSample::new(SampleKind::Key, ts, next - ts, payload));
            index += 1;
        }
        samples
    }

    /// Serialize the clip as an MP4 file.
    pub fn build(&self) -> Result<Bytes, WriterError> {
        let mut writer = ContainerWriter::new();
        let video = writer.add_video_track(self.video_config())?;
        for sample in self.video_samples() {
            writer.add_sample(video, &sample)?;
        }
        if self.with_audio {
            let audio = writer.add_audio_track(self.audio_config())?;
            for sample in self.audio_samples() {
                writer.add_sample(audio, &sample)?;
            }
        }
        writer.finalize()
    }
}

/// Length-prefixed access unit holding one slice NAL tagged with `index`.
pub fn frame_payload(index: u32, key: bool) -> Bytes {
    let header = if key {
        0x60 | nal_type::IDR_SLICE
    } else {
        0x40 | nal_type::NON_IDR_SLICE
    };
    let mut buf = Vec::with_capacity(9);
    buf.put_u32(5);
    buf.put_u8(header);
    buf.put_u32(index);
    Bytes::from(buf)
}

/// Frame index carried by a payload built with [`frame_payload`].
pub fn frame_index(payload: &[u8]) -> Option<u32> {
    if payload.len() < 9 {
        return None;
    }
    Some(u32::from_be_bytes([payload[5], payload[6], payload[7], payload[8]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_payload_roundtrip() {
        let payload = frame_payload(1234, true);
        assert_eq!(frame_index(&payload), Some(1234));
        assert!(crate::avc::avcc_contains_idr(&payload, 4));
        assert!(!crate::avc::avcc_contains_idr(&frame_payload(3, false), 4));
    }

    #[test]
    fn test_gop_layout() {
        let source = SyntheticSource {
            duration_s: 2.0,
            gop_frames: 15,
            ..Default::default()
        };
        let samples = source.video_samples();
        assert_eq!(samples.len(), 60);
        let keys: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_key())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(keys, vec![0, 15, 30, 45]);
    }
}
