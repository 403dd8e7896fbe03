//! Random access to decoded frames of a container.

use std::sync::Arc;

use bytes::Bytes;
use clipframe_common::clock::secs_to_us;
use clipframe_common::error::ClipframeResult;
use clipframe_container::ContainerReader;
use clipframe_media_model::{TrackConfig, TrackKind};
use clipframe_processing_core::{FrameSource, VideoFrame};

use crate::codec::CodecBackend;
use crate::error::PipelineError;

/// Decodes on demand: every lookup starts a fresh decoder at the sync
/// sample preceding the requested time.
pub struct DecodedFrameSource {
    reader: ContainerReader,
    config: TrackConfig,
    backend: Arc<dyn CodecBackend>,
}

impl DecodedFrameSource {
    /// Wrap a parsed container. Fails if the backend can not decode it.
    pub fn new(reader: ContainerReader, backend: Arc<dyn CodecBackend>) -> Result<Self, PipelineError> {
        let config = reader
            .video_config()
            .cloned()
            .ok_or(PipelineError::NoVideoTrack)?;
        backend.probe_decoder(&config)?;
        Ok(Self {
            reader,
            config,
            backend,
        })
    }

    pub fn open(data: Bytes, backend: Arc<dyn CodecBackend>) -> Result<Self, PipelineError> {
        Self::new(ContainerReader::open(data)?, backend)
    }

    pub fn reader(&self) -> &ContainerReader {
        &self.reader
    }
}

#[async_trait::async_trait]
impl FrameSource for DecodedFrameSource {
    fn duration_s(&self) -> f64 {
        self.reader.info().duration_secs()
    }

    async fn frame_at(&self, t_s: f64) -> ClipframeResult<Option<VideoFrame>> {
        let target_us = secs_to_us(t_s.clamp(0.0, self.duration_s()));
        let samples = self.reader.all_samples(TrackKind::Video);
        let Some(start) = self.reader.sync_sample_at_or_before(target_us) else {
            return Ok(None);
        };

        let mut decoder = self.backend.create_decoder(&self.config)?;
        let mut best: Option<VideoFrame> = None;
        let mut keep = |frame: VideoFrame| {
            let better = match &best {
                None => true,
                Some(current) if current.timestamp_us > target_us => {
                    frame.timestamp_us < current.timestamp_us
                }
                Some(current) => {
                    frame.timestamp_us <= target_us && frame.timestamp_us >= current.timestamp_us
                }
            };
            if better {
                best = Some(frame);
            }
        };

        // A picture presented at or before the target decodes no later than
        // it. The sync sample itself is always fed.
        for (i, sample) in samples[start..].iter().enumerate() {
            if i > 0 && sample.decode_timestamp_us > target_us {
                break;
            }
            decoder.decode(sample).await?;
            while let Some(frame) = decoder.next_frame().await? {
                keep(frame);
            }
        }
        decoder.flush().await?;
        while let Some(frame) = decoder.next_frame().await? {
            keep(frame);
        }

        tracing::trace!(
            t_s,
            found_us = best.as_ref().map(|f| f.timestamp_us),
            "Frame lookup"
        );
        Ok(best)
    }
}
