//! Encoded media samples and track configuration.
//!
//! A [`MediaSample`] is one encoded access unit exactly as it sits in the
//! container. Payloads are [`Bytes`] slices, so samples produced by the
//! reader share the source buffer instead of copying it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether a sample can be decoded without reference to earlier samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Sync sample (IDR for H.264).
    Key,
    /// Depends on earlier samples.
    Delta,
}

/// One encoded access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSample {
    /// Key or delta.
    pub kind: SampleKind,

    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,

    /// Decode timestamp in microseconds. Equal to `timestamp_us` for
    /// streams without reordering.
    pub decode_timestamp_us: i64,

    /// Duration in microseconds.
    pub duration_us: i64,

    /// Encoded payload.
    pub data: Bytes,
}

impl MediaSample {
    /// A sample whose decode and presentation times coincide.
    pub fn new(kind: SampleKind, timestamp_us: i64, duration_us: i64, data: Bytes) -> Self {
        Self {
            kind,
            timestamp_us,
            decode_timestamp_us: timestamp_us,
            duration_us,
            data,
        }
    }

    pub fn is_key(&self) -> bool {
        self.kind == SampleKind::Key
    }

    /// Composition offset (pts - dts) in microseconds.
    pub fn composition_offset_us(&self) -> i64 {
        self.timestamp_us - self.decode_timestamp_us
    }

    /// Presentation timestamp in seconds.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }

    /// Copy of this sample with both timestamps moved by `-offset_us`.
    pub fn shifted(&self, offset_us: i64) -> Self {
        Self {
            timestamp_us: self.timestamp_us - offset_us,
            decode_timestamp_us: self.decode_timestamp_us - offset_us,
            ..self.clone()
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Track media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Media-type specific track parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackParams {
    Video { width: u32, height: u32 },
    Audio { channels: u16, sample_rate: u32 },
}

/// Codec configuration of one track.
///
/// Read once from the source container (or reported once by the encoder's
/// first output) and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackConfig {
    /// Codec string, e.g. `avc1.64001f` or `mp4a.40.2`.
    pub codec: String,

    /// Spatial or audio parameters.
    pub params: TrackParams,

    /// Codec-specific decoder configuration, without any box header
    /// (avcC record for H.264, AudioSpecificConfig for AAC).
    pub description: Bytes,
}

impl TrackConfig {
    pub fn video(codec: impl Into<String>, width: u32, height: u32, description: Bytes) -> Self {
        Self {
            codec: codec.into(),
            params: TrackParams::Video { width, height },
            description,
        }
    }

    pub fn audio(
        codec: impl Into<String>,
        channels: u16,
        sample_rate: u32,
        description: Bytes,
    ) -> Self {
        Self {
            codec: codec.into(),
            params: TrackParams::Audio {
                channels,
                sample_rate,
            },
            description,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.params {
            TrackParams::Video { .. } => TrackKind::Video,
            TrackParams::Audio { .. } => TrackKind::Audio,
        }
    }

    /// `(width, height)` for video tracks.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.params {
            TrackParams::Video { width, height } => Some((width, height)),
            TrackParams::Audio { .. } => None,
        }
    }

    /// Width / height for video tracks.
    pub fn aspect_ratio(&self) -> Option<f64> {
        self.dimensions()
            .filter(|(w, h)| *w > 0 && *h > 0)
            .map(|(w, h)| w as f64 / h as f64)
    }
}

/// Handle to a track inside a container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

/// Summary of an opened container.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Longest track duration in microseconds.
    pub duration_us: i64,

    /// Major brand of the file type box.
    pub major_brand: String,

    /// Video track configuration.
    pub video: TrackConfig,

    /// Audio track configuration, if the file has one.
    pub audio: Option<TrackConfig>,

    /// Number of video samples.
    pub video_sample_count: usize,

    /// Number of audio samples.
    pub audio_sample_count: usize,
}

impl MediaInfo {
    pub fn duration_secs(&self) -> f64 {
        self.duration_us as f64 / 1_000_000.0
    }

    /// Average video frame rate derived from sample count and duration.
    pub fn average_fps(&self) -> Option<f64> {
        if self.duration_us <= 0 || self.video_sample_count == 0 {
            return None;
        }
        Some(self.video_sample_count as f64 / self.duration_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifted_moves_both_timestamps() {
        let mut sample = MediaSample::new(SampleKind::Delta, 2_000_000, 33_333, Bytes::new());
        sample.decode_timestamp_us = 1_966_667;
        let shifted = sample.shifted(2_000_000);
        assert_eq!(shifted.timestamp_us, 0);
        assert_eq!(shifted.decode_timestamp_us, -33_333);
        assert_eq!(shifted.composition_offset_us(), sample.composition_offset_us());
    }

    #[test]
    fn test_track_config_kind_and_aspect() {
        let video = TrackConfig::video("avc1.64001f", 1920, 1080, Bytes::new());
        assert_eq!(video.kind(), TrackKind::Video);
        assert!((video.aspect_ratio().unwrap() - 16.0 / 9.0).abs() < 1e-9);

        let audio = TrackConfig::audio("mp4a.40.2", 2, 48_000, Bytes::new());
        assert_eq!(audio.kind(), TrackKind::Audio);
        assert!(audio.dimensions().is_none());
    }

    #[test]
    fn test_average_fps() {
        let info = MediaInfo {
            duration_us: 10_000_000,
            major_brand: "isom".into(),
            video: TrackConfig::video("avc1.42c01e", 640, 360, Bytes::new()),
            audio: None,
            video_sample_count: 300,
            audio_sample_count: 0,
        };
        assert!((info.average_fps().unwrap() - 30.0).abs() < 1e-9);
    }
}
