//! MP4 muxer.
//!
//! Collects encoded samples per track and serializes `ftyp`, `mdat`, `moov`
//! on [`ContainerWriter::finalize`]. Every track uses the microsecond
//! timescale the reader normalizes to, so sample timestamps are written
//! without conversion.

use bytes::{BufMut, Bytes, BytesMut};
use clipframe_common::clock::MEDIA_TIMESCALE;
use clipframe_media_model::{MediaSample, TrackConfig, TrackId, TrackKind, TrackParams};

use crate::aac::build_esds;
use crate::boxes::{write_box, write_full_box, FourCc, UNITY_MATRIX};
use crate::error::WriterError;

/// Output container under construction.
#[derive(Debug, Default)]
pub struct ContainerWriter {
    tracks: Vec<WriterTrack>,
    /// Payloads in append order; laid out back to back inside `mdat`.
    payloads: Vec<Bytes>,
    payload_len: u64,
}

#[derive(Debug)]
struct WriterTrack {
    id: TrackId,
    config: TrackConfig,
    entry: FourCc,
    samples: Vec<SampleRecord>,
}

#[derive(Debug, Clone, Copy)]
struct SampleRecord {
    /// Offset from the start of the `mdat` payload.
    payload_offset: u64,
    size: u32,
    pts: i64,
    dts: i64,
    duration: i64,
    is_key: bool,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the video track. Must happen before its first sample.
    pub fn add_video_track(&mut self, config: TrackConfig) -> Result<TrackId, WriterError> {
        self.add_track(TrackKind::Video, config)
    }

    /// Register the audio track.
    pub fn add_audio_track(&mut self, config: TrackConfig) -> Result<TrackId, WriterError> {
        self.add_track(TrackKind::Audio, config)
    }

    fn add_track(&mut self, kind: TrackKind, config: TrackConfig) -> Result<TrackId, WriterError> {
        if config.kind() != kind {
            return Err(WriterError::KindMismatch { expected: kind });
        }
        if self.tracks.iter().any(|t| t.config.kind() == kind) {
            return Err(WriterError::DuplicateTrack(kind));
        }
        let entry = sample_entry_type(&config)?;

        let id = TrackId(self.tracks.len() as u32 + 1);
        tracing::debug!(track = id.0, codec = %config.codec, ?kind, "Added output track");
        self.tracks.push(WriterTrack {
            id,
            config,
            entry,
            samples: Vec::new(),
        });
        Ok(id)
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.config.kind() == kind)
    }

    /// Number of samples appended to a track so far.
    pub fn sample_count(&self, track_id: TrackId) -> usize {
        self.tracks
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.samples.len())
            .unwrap_or(0)
    }

    /// Append one encoded sample. Samples of a track must arrive in
    /// non-decreasing decode order.
    pub fn add_sample(&mut self, track_id: TrackId, sample: &MediaSample) -> Result<(), WriterError> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(WriterError::TrackNotInitialized(track_id))?;

        if let Some(last) = track.samples.last() {
            if sample.decode_timestamp_us < last.dts {
                return Err(WriterError::OutOfOrder {
                    previous_us: last.dts,
                    timestamp_us: sample.decode_timestamp_us,
                });
            }
        }

        track.samples.push(SampleRecord {
            payload_offset: self.payload_len,
            size: sample.data.len() as u32,
            pts: sample.timestamp_us,
            dts: sample.decode_timestamp_us,
            duration: sample.duration_us.max(0),
            is_key: sample.is_key(),
        });
        self.payload_len += sample.data.len() as u64;
        self.payloads.push(sample.data.clone());
        Ok(())
    }

    /// Serialize the container.
    pub fn finalize(self) -> Result<Bytes, WriterError> {
        if self.tracks.is_empty() {
            return Err(WriterError::NoTracks);
        }

        let mut head = Vec::new();
        write_ftyp(&mut head);

        let large_mdat = self.payload_len + 8 > u64::from(u32::MAX);
        if large_mdat {
            head.put_u32(1);
            head.put_slice(b"mdat");
            head.put_u64(self.payload_len + 16);
        } else {
            head.put_u32((self.payload_len + 8) as u32);
            head.put_slice(b"mdat");
        }
        let data_start = head.len() as u64;

        let mut moov = Vec::new();
        write_moov(&mut moov, &self.tracks, data_start);

        let total = head.len() + self.payload_len as usize + moov.len();
        let mut out = BytesMut::with_capacity(total);
        out.put_slice(&head);
        for payload in &self.payloads {
            out.put_slice(payload);
        }
        out.put_slice(&moov);

        tracing::debug!(
            tracks = self.tracks.len(),
            bytes = out.len(),
            "Finalized container"
        );
        Ok(out.freeze())
    }
}

fn sample_entry_type(config: &TrackConfig) -> Result<FourCc, WriterError> {
    let codec = config.codec.as_str();
    match config.kind() {
        TrackKind::Video if codec.starts_with("avc1") => Ok(*b"avc1"),
        TrackKind::Video if codec.starts_with("avc3") => Ok(*b"avc3"),
        TrackKind::Audio if codec.starts_with("mp4a") => Ok(*b"mp4a"),
        _ => Err(WriterError::UnsupportedCodec(config.codec.clone())),
    }
}

impl WriterTrack {
    /// Presentation span of the track in microseconds.
    fn duration(&self) -> u64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (last.dts - first.dts + last.duration).max(0) as u64,
            _ => 0,
        }
    }

    fn first_dts(&self) -> i64 {
        self.samples.first().map(|s| s.dts).unwrap_or(0)
    }
}

fn write_ftyp(buf: &mut Vec<u8>) {
    write_box(buf, b"ftyp", |b| {
        b.put_slice(b"isom");
        b.put_u32(0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            b.put_slice(brand);
        }
    });
}

fn write_moov(buf: &mut Vec<u8>, tracks: &[WriterTrack], data_start: u64) {
    let movie_duration = tracks
        .iter()
        .map(|t| t.duration() + t.first_dts().max(0) as u64)
        .max()
        .unwrap_or(0);

    write_box(buf, b"moov", |b| {
        write_mvhd(b, movie_duration, tracks.len() as u32 + 1);
        for track in tracks {
            write_trak(b, track, data_start);
        }
    });
}

/// Version 1 is only needed once a duration overflows 32 bits.
fn header_version(duration: u64) -> u8 {
    u8::from(duration > u64::from(u32::MAX))
}

fn put_times(b: &mut Vec<u8>, version: u8, duration: u64, timescale: Option<u32>, track_id: Option<u32>) {
    if version == 1 {
        b.put_u64(0); // creation_time
        b.put_u64(0); // modification_time
    } else {
        b.put_u32(0);
        b.put_u32(0);
    }
    if let Some(timescale) = timescale {
        b.put_u32(timescale);
    }
    if let Some(track_id) = track_id {
        b.put_u32(track_id);
        b.put_u32(0); // reserved
    }
    if version == 1 {
        b.put_u64(duration);
    } else {
        b.put_u32(duration as u32);
    }
}

fn write_mvhd(buf: &mut Vec<u8>, duration: u64, next_track_id: u32) {
    let version = header_version(duration);
    write_full_box(buf, b"mvhd", version, 0, |b| {
        put_times(b, version, duration, Some(MEDIA_TIMESCALE), None);
        b.put_u32(0x0001_0000); // rate 1.0
        b.put_u16(0x0100); // volume 1.0
        b.put_slice(&[0; 10]);
        for m in UNITY_MATRIX {
            b.put_u32(m);
        }
        b.put_slice(&[0; 24]); // pre_defined
        b.put_u32(next_track_id);
    });
}

fn write_trak(buf: &mut Vec<u8>, track: &WriterTrack, data_start: u64) {
    write_box(buf, b"trak", |b| {
        write_tkhd(b, track);
        write_edts(b, track);
        write_box(b, b"mdia", |b| {
            let duration = track.duration();
            let version = header_version(duration);
            write_full_box(b, b"mdhd", version, 0, |b| {
                put_times(b, version, duration, Some(MEDIA_TIMESCALE), None);
                b.put_u16(0x55c4); // language "und"
                b.put_u16(0);
            });
            write_hdlr(b, track.config.kind());
            write_box(b, b"minf", |b| {
                match track.config.kind() {
                    TrackKind::Video => write_full_box(b, b"vmhd", 0, 1, |b| {
                        b.put_u16(0); // graphicsmode
                        b.put_slice(&[0; 6]); // opcolor
                    }),
                    TrackKind::Audio => write_full_box(b, b"smhd", 0, 0, |b| {
                        b.put_u16(0); // balance
                        b.put_u16(0);
                    }),
                }
                write_box(b, b"dinf", |b| {
                    write_full_box(b, b"dref", 0, 0, |b| {
                        b.put_u32(1);
                        // Self-contained data reference.
                        write_full_box(b, b"url ", 0, 1, |_| {});
                    });
                });
                write_stbl(b, track, data_start);
            });
        });
    });
}

fn write_tkhd(buf: &mut Vec<u8>, track: &WriterTrack) {
    let duration = track.duration() + track.first_dts().max(0) as u64;
    let version = header_version(duration);
    write_full_box(buf, b"tkhd", version, 0x000003, |b| {
        put_times(b, version, duration, None, Some(track.id.0));
        b.put_slice(&[0; 8]);
        b.put_i16(0); // layer
        b.put_i16(0); // alternate_group
        let volume = if track.config.kind() == TrackKind::Audio {
            0x0100
        } else {
            0
        };
        b.put_u16(volume);
        b.put_u16(0);
        for m in UNITY_MATRIX {
            b.put_u32(m);
        }
        let (width, height) = track.config.dimensions().unwrap_or((0, 0));
        b.put_u32(width << 16);
        b.put_u32(height << 16);
    });
}

/// Edit list keeping decode timestamps intact on read-back: a positive
/// first decode time becomes an empty edit, a negative one a media-time
/// skip.
fn write_edts(buf: &mut Vec<u8>, track: &WriterTrack) {
    let first_dts = track.first_dts();
    if first_dts == 0 || track.samples.is_empty() {
        return;
    }
    let duration = track.duration();
    write_box(buf, b"edts", |b| {
        let entries: Vec<(u64, i64)> = if first_dts > 0 {
            vec![(first_dts as u64, -1), (duration, 0)]
        } else {
            vec![(duration.saturating_sub(first_dts.unsigned_abs()), -first_dts)]
        };
        write_full_box(b, b"elst", 1, 0, |b| {
            b.put_u32(entries.len() as u32);
            for (segment_duration, media_time) in entries {
                b.put_u64(segment_duration);
                b.put_i64(media_time);
                b.put_u32(0x0001_0000); // rate 1.0
            }
        });
    });
}

fn write_hdlr(buf: &mut Vec<u8>, kind: TrackKind) {
    let (handler, name): (&[u8; 4], &[u8]) = match kind {
        TrackKind::Video => (b"vide", b"VideoHandler\0"),
        TrackKind::Audio => (b"soun", b"SoundHandler\0"),
    };
    write_full_box(buf, b"hdlr", 0, 0, |b| {
        b.put_u32(0);
        b.put_slice(handler);
        b.put_slice(&[0; 12]);
        b.put_slice(name);
    });
}

fn write_stbl(buf: &mut Vec<u8>, track: &WriterTrack, data_start: u64) {
    write_box(buf, b"stbl", |b| {
        write_stsd(b, track);
        write_stts(b, &track.samples);
        write_ctts(b, &track.samples);
        if track.config.kind() == TrackKind::Video {
            write_full_box(b, b"stss", 0, 0, |b| {
                let sync: Vec<u32> = track
                    .samples
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_key)
                    .map(|(i, _)| i as u32 + 1)
                    .collect();
                b.put_u32(sync.len() as u32);
                for number in sync {
                    b.put_u32(number);
                }
            });
        }
        // One sample per chunk.
        write_full_box(b, b"stsc", 0, 0, |b| {
            if track.samples.is_empty() {
                b.put_u32(0);
            } else {
                b.put_u32(1);
                b.put_u32(1);
                b.put_u32(1);
                b.put_u32(1);
            }
        });
        write_full_box(b, b"stsz", 0, 0, |b| {
            b.put_u32(0);
            b.put_u32(track.samples.len() as u32);
            for s in &track.samples {
                b.put_u32(s.size);
            }
        });
        let offsets: Vec<u64> = track
            .samples
            .iter()
            .map(|s| data_start + s.payload_offset)
            .collect();
        if offsets.last().copied().unwrap_or(0) <= u64::from(u32::MAX) {
            write_full_box(b, b"stco", 0, 0, |b| {
                b.put_u32(offsets.len() as u32);
                for offset in &offsets {
                    b.put_u32(*offset as u32);
                }
            });
        } else {
            write_full_box(b, b"co64", 0, 0, |b| {
                b.put_u32(offsets.len() as u32);
                for offset in &offsets {
                    b.put_u64(*offset);
                }
            });
        }
    });
}

fn write_stsd(buf: &mut Vec<u8>, track: &WriterTrack) {
    write_full_box(buf, b"stsd", 0, 0, |b| {
        b.put_u32(1);
        match track.config.params {
            TrackParams::Video { width, height } => {
                write_box(b, &track.entry, |b| {
                    b.put_slice(&[0; 6]);
                    b.put_u16(1); // data_reference_index
                    b.put_slice(&[0; 16]);
                    b.put_u16(width as u16);
                    b.put_u16(height as u16);
                    b.put_u32(0x0048_0000); // 72 dpi
                    b.put_u32(0x0048_0000);
                    b.put_u32(0);
                    b.put_u16(1); // frame_count
                    b.put_slice(&[0; 32]); // compressorname
                    b.put_u16(0x0018); // depth
                    b.put_i16(-1);
                    write_box(b, b"avcC", |b| b.put_slice(&track.config.description));
                });
            }
            TrackParams::Audio {
                channels,
                sample_rate,
            } => {
                write_box(b, &track.entry, |b| {
                    b.put_slice(&[0; 6]);
                    b.put_u16(1);
                    b.put_slice(&[0; 8]);
                    b.put_u16(channels);
                    b.put_u16(16); // samplesize
                    b.put_u32(0);
                    // 16.16 fixed point; rates above 65535 Hz do not fit.
                    b.put_u32(sample_rate.min(0xFFFF) << 16);
                    let esds = build_esds(track.id.0 as u16, &track.config.description, 0);
                    write_box(b, b"esds", |b| b.put_slice(&esds));
                });
            }
        }
    });
}

fn write_stts(buf: &mut Vec<u8>, samples: &[SampleRecord]) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        let delta = samples
            .get(i + 1)
            .map(|next| next.dts - sample.dts)
            .unwrap_or(sample.duration)
            .clamp(0, i64::from(u32::MAX)) as u32;
        match runs.last_mut() {
            Some((count, last)) if *last == delta => *count += 1,
            _ => runs.push((1, delta)),
        }
    }
    write_full_box(buf, b"stts", 0, 0, |b| {
        b.put_u32(runs.len() as u32);
        for (count, delta) in runs {
            b.put_u32(count);
            b.put_u32(delta);
        }
    });
}

fn write_ctts(buf: &mut Vec<u8>, samples: &[SampleRecord]) {
    let offsets: Vec<i32> = samples
        .iter()
        .map(|s| (s.pts - s.dts).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
        .collect();
    if offsets.iter().all(|&o| o == 0) {
        return;
    }

    let mut runs: Vec<(u32, i32)> = Vec::new();
    for offset in offsets {
        match runs.last_mut() {
            Some((count, last)) if *last == offset => *count += 1,
            _ => runs.push((1, offset)),
        }
    }
    let version = u8::from(runs.iter().any(|(_, o)| *o < 0));
    write_full_box(buf, b"ctts", version, 0, |b| {
        b.put_u32(runs.len() as u32);
        for (count, offset) in runs {
            b.put_u32(count);
            b.put_i32(offset);
        }
    });
}
