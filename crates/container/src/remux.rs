//! Passthrough trimming: copy encoded samples into a new container without
//! decoding them.

use std::ops::RangeInclusive;

use bytes::Bytes;
use clipframe_common::clock::secs_to_us;
use clipframe_media_model::{MediaSample, TrackKind};

use crate::error::{ParseError, RemuxError};
use crate::reader::ContainerReader;
use crate::writer::ContainerWriter;

/// Result of a passthrough trim.
#[derive(Debug, Clone)]
pub struct RemuxOutput {
    /// Serialized output container.
    pub data: Bytes,
    /// Video samples copied.
    pub video_samples: usize,
    /// Audio samples copied.
    pub audio_samples: usize,
    /// Source presentation time of the first copied video sample, which
    /// becomes time zero in the output.
    pub source_start_us: i64,
    /// Presentation span of the copied video samples.
    pub duration_us: i64,
}

/// Copies a trimmed range of a parsed container into a new one.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughRemuxer<'a> {
    reader: &'a ContainerReader,
}

impl<'a> PassthroughRemuxer<'a> {
    pub fn new(reader: &'a ContainerReader) -> Self {
        Self { reader }
    }

    /// Indices of the video samples a trim of `[start_us, end_us]` copies:
    /// from the last sync sample at or before `start_us` through the last
    /// sample presented at or before `end_us`.
    pub fn select_video_range(&self, start_us: i64, end_us: i64) -> Option<RangeInclusive<usize>> {
        let samples = self.reader.all_samples(TrackKind::Video);
        let first = self.reader.sync_sample_at_or_before(start_us)?;
        let last = samples
            .iter()
            .rposition(|s| s.timestamp_us <= end_us)?;
        (last >= first).then_some(first..=last)
    }

    /// Trim `[start_s, end_s)` by copying samples verbatim.
    pub fn remux(&self, start_s: f64, end_s: f64) -> Result<RemuxOutput, RemuxError> {
        let start_us = secs_to_us(start_s);
        let end_us = secs_to_us(end_s);

        let range = self
            .select_video_range(start_us, end_us)
            .ok_or(RemuxError::EmptyRange { start_s, end_s })?;

        let video = &self.reader.all_samples(TrackKind::Video)[range.clone()];
        let offset_us = video[0].timestamp_us;

        let mut writer = ContainerWriter::new();
        let video_config = self
            .reader
            .video_config()
            .cloned()
            .ok_or(ParseError::NoVideoTrack)?;
        let video_track = writer.add_video_track(video_config)?;
        for sample in video {
            writer.add_sample(video_track, &sample.shifted(offset_us))?;
        }

        let mut audio_samples = 0;
        if let Some(audio_config) = self.reader.audio_config() {
            let audio_track = writer.add_audio_track(audio_config.clone())?;
            for sample in shifted_audio(self.reader.all_samples(TrackKind::Audio), offset_us, end_us) {
                writer.add_sample(audio_track, &sample)?;
                audio_samples += 1;
            }
        }

        let duration_us = video
            .iter()
            .map(|s| s.timestamp_us + s.duration_us)
            .max()
            .unwrap_or(offset_us)
            - offset_us;

        let data = writer.finalize()?;

        tracing::info!(
            start_s,
            end_s,
            source_start_us = offset_us,
            video_samples = video.len(),
            audio_samples,
            bytes = data.len(),
            "Passthrough remux complete"
        );

        Ok(RemuxOutput {
            data,
            video_samples: video.len(),
            audio_samples,
            source_start_us: offset_us,
            duration_us,
        })
    }
}

/// Audio samples presented in `[offset_us, end_us]`, moved so `offset_us`
/// becomes zero. Samples that would land before zero are dropped.
pub fn shifted_audio(
    samples: &[MediaSample],
    offset_us: i64,
    end_us: i64,
) -> impl Iterator<Item = MediaSample> + '_ {
    samples
        .iter()
        .filter(move |s| s.timestamp_us <= end_us)
        .map(move |s| s.shifted(offset_us))
        .filter(|s| s.timestamp_us >= 0)
}
