//! MP4 demuxer.
//!
//! Walks `moov` to find the first video and first audio track, expands their
//! sample tables into [`MediaSample`] records, and normalizes every
//! timestamp to microseconds. Sample payloads are slices of the input
//! buffer; nothing is decoded.

use bytes::Bytes;
use clipframe_common::clock::ticks_to_us;
use clipframe_media_model::{MediaInfo, MediaSample, SampleKind, TrackConfig, TrackKind};

use crate::aac::{parse_esds, AudioSpecificConfig};
use crate::avc::AvcConfig;
use crate::boxes::{find_box, fourcc_str, iter_boxes, require_box, ByteCursor, FourCc};
use crate::error::ParseError;

/// Parsed source container with materialized sample lists.
#[derive(Debug, Clone)]
pub struct ContainerReader {
    info: MediaInfo,
    video_samples: Vec<MediaSample>,
    audio_samples: Vec<MediaSample>,
}

impl ContainerReader {
    /// Parse a complete MP4 file held in memory.
    pub fn open(data: impl Into<Bytes>) -> Result<Self, ParseError> {
        let data: Bytes = data.into();
        let top = iter_boxes(&data)?;

        let major_brand = top
            .iter()
            .find(|b| &b.box_type == b"ftyp")
            .and_then(|ftyp| ftyp.body(&data).get(..4).map(|b| [b[0], b[1], b[2], b[3]]))
            .map(|brand| fourcc_str(&brand))
            .unwrap_or_else(|| "isom".to_string());

        let moov = top
            .iter()
            .find(|b| &b.box_type == b"moov")
            .map(|h| h.body(&data))
            .ok_or_else(|| ParseError::malformed("missing 'moov' box"))?;

        let movie_timescale = parse_mvhd_timescale(require_box(moov, b"mvhd")?)?;

        let mut video: Option<ParsedTrack> = None;
        let mut audio: Option<ParsedTrack> = None;

        for trak in iter_boxes(moov)?.iter().filter(|b| &b.box_type == b"trak") {
            let track = match parse_trak(trak.body(moov), movie_timescale, &data)? {
                Some(track) => track,
                None => continue,
            };
            match track.config.kind() {
                TrackKind::Video if video.is_none() => video = Some(track),
                TrackKind::Audio if audio.is_none() => audio = Some(track),
                kind => {
                    tracing::debug!(?kind, codec = %track.config.codec, "Skipping additional track");
                }
            }
        }

        let video = video.ok_or(ParseError::NoVideoTrack)?;

        let duration_us = video
            .duration_us
            .max(audio.as_ref().map(|a| a.duration_us).unwrap_or(0));

        tracing::debug!(
            brand = %major_brand,
            video_codec = %video.config.codec,
            video_samples = video.samples.len(),
            audio_samples = audio.as_ref().map(|a| a.samples.len()).unwrap_or(0),
            duration_us,
            "Parsed container"
        );

        let info = MediaInfo {
            duration_us,
            major_brand,
            video_sample_count: video.samples.len(),
            audio_sample_count: audio.as_ref().map(|a| a.samples.len()).unwrap_or(0),
            video: video.config,
            audio: audio.as_ref().map(|a| a.config.clone()),
        };

        Ok(Self {
            info,
            video_samples: video.samples,
            audio_samples: audio.map(|a| a.samples).unwrap_or_default(),
        })
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn video_config(&self) -> Option<&TrackConfig> {
        Some(&self.info.video)
    }

    pub fn audio_config(&self) -> Option<&TrackConfig> {
        self.info.audio.as_ref()
    }

    /// Every sample of a track in decode order.
    pub fn all_samples(&self, kind: TrackKind) -> &[MediaSample] {
        match kind {
            TrackKind::Video => &self.video_samples,
            TrackKind::Audio => &self.audio_samples,
        }
    }

    /// Index of the last sync sample presented at or before `timestamp_us`,
    /// falling back to the first sync sample.
    pub fn sync_sample_at_or_before(&self, timestamp_us: i64) -> Option<usize> {
        let samples = &self.video_samples;
        samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_key() && s.timestamp_us <= timestamp_us)
            .map(|(i, _)| i)
            .next_back()
            .or_else(|| samples.iter().position(|s| s.is_key()))
    }
}

struct ParsedTrack {
    config: TrackConfig,
    samples: Vec<MediaSample>,
    duration_us: i64,
}

fn parse_mvhd_timescale(body: &[u8]) -> Result<u32, ParseError> {
    let mut cursor = ByteCursor::new(body);
    let (version, _) = cursor.full_box_header()?;
    if version == 1 {
        cursor.skip(16)?;
    } else {
        cursor.skip(8)?;
    }
    cursor.u32()
}

fn parse_trak(
    trak: &[u8],
    movie_timescale: u32,
    file: &Bytes,
) -> Result<Option<ParsedTrack>, ParseError> {
    let mdia = require_box(trak, b"mdia")?;
    let handler = parse_hdlr(require_box(mdia, b"hdlr")?)?;
    if &handler != b"vide" && &handler != b"soun" {
        tracing::debug!(handler = %fourcc_str(&handler), "Ignoring non-media track");
        return Ok(None);
    }

    let (timescale, media_duration) = parse_mdhd(require_box(mdia, b"mdhd")?)?;
    if timescale == 0 {
        return Err(ParseError::malformed("track timescale is zero"));
    }

    let stbl = require_box(require_box(mdia, b"minf")?, b"stbl")?;
    let config = match parse_stsd(require_box(stbl, b"stsd")?, &handler)? {
        Some(config) => config,
        None => return Ok(None),
    };

    let edit_offset_us = match find_box(trak, b"edts")? {
        Some(edts) => match find_box(edts.body(trak), b"elst")? {
            Some(elst) => parse_elst_offset(elst.body(edts.body(trak)), movie_timescale, timescale)?,
            None => 0,
        },
        None => 0,
    };

    let table = SampleTable::parse(stbl, file.len())?;
    let samples = table.expand(timescale, edit_offset_us, file, &handler == b"vide")?;

    let duration_us = if media_duration > 0 {
        ticks_to_us(media_duration as i64, timescale)
    } else {
        samples
            .iter()
            .map(|s| s.timestamp_us + s.duration_us)
            .max()
            .unwrap_or(0)
    };

    Ok(Some(ParsedTrack {
        config,
        samples,
        duration_us,
    }))
}

fn parse_hdlr(body: &[u8]) -> Result<FourCc, ParseError> {
    let mut cursor = ByteCursor::new(body);
    cursor.full_box_header()?;
    cursor.u32()?; // pre_defined
    cursor.fourcc()
}

fn parse_mdhd(body: &[u8]) -> Result<(u32, u64), ParseError> {
    let mut cursor = ByteCursor::new(body);
    let (version, _) = cursor.full_box_header()?;
    if version == 1 {
        cursor.skip(16)?;
        let timescale = cursor.u32()?;
        let duration = cursor.u64()?;
        Ok((timescale, duration))
    } else {
        cursor.skip(8)?;
        let timescale = cursor.u32()?;
        let duration = cursor.u32()?;
        // All-ones marks an unknown duration.
        let duration = if duration == u32::MAX { 0 } else { u64::from(duration) };
        Ok((timescale, duration))
    }
}

/// Presentation offset in microseconds implied by the edit list: leading
/// empty edits delay the track, the first media edit skips `media_time`.
fn parse_elst_offset(
    body: &[u8],
    movie_timescale: u32,
    media_timescale: u32,
) -> Result<i64, ParseError> {
    let mut cursor = ByteCursor::new(body);
    let (version, _) = cursor.full_box_header()?;
    let count = cursor.u32()?;

    let mut delay_us = 0i64;
    for _ in 0..count {
        let (segment_duration, media_time) = if version == 1 {
            (cursor.u64()? as i64, cursor.u64()? as i64)
        } else {
            (i64::from(cursor.u32()?), i64::from(cursor.i32()?))
        };
        cursor.skip(4)?; // media_rate
        if media_time == -1 {
            delay_us += ticks_to_us(segment_duration, movie_timescale);
            continue;
        }
        return Ok(delay_us - ticks_to_us(media_time, media_timescale));
    }
    Ok(delay_us)
}

/// First sample description of a track as a [`TrackConfig`].
fn parse_stsd(body: &[u8], handler: &FourCc) -> Result<Option<TrackConfig>, ParseError> {
    let mut cursor = ByteCursor::new(body);
    cursor.full_box_header()?;
    let count = cursor.u32()?;
    if count == 0 {
        return Err(ParseError::malformed("stsd has no sample entries"));
    }

    let entries = cursor.rest();
    let entry = match iter_boxes(entries)?.into_iter().next() {
        Some(entry) => entry,
        None => return Err(ParseError::malformed("stsd entry list is empty")),
    };
    let fourcc = entry.box_type;
    let body = entry.body(entries);

    match handler {
        b"vide" => parse_visual_entry(&fourcc, body).map(Some),
        b"soun" => parse_audio_entry(&fourcc, body).map(Some),
        _ => Ok(None),
    }
}

/// Size of the fixed VisualSampleEntry fields preceding child boxes.
const VISUAL_ENTRY_FIXED: usize = 78;

fn parse_visual_entry(fourcc: &FourCc, body: &[u8]) -> Result<TrackConfig, ParseError> {
    let mut cursor = ByteCursor::new(body);
    cursor.skip(24)?;
    let width = u32::from(cursor.u16()?);
    let height = u32::from(cursor.u16()?);
    cursor.skip(VISUAL_ENTRY_FIXED - 28)?;
    let children = cursor.rest();

    match fourcc {
        b"avc1" | b"avc3" => {
            let avcc = require_box(children, b"avcC")?;
            let record = AvcConfig::parse(avcc)?;
            Ok(TrackConfig::video(
                record.codec_string(&fourcc_str(fourcc)),
                width,
                height,
                Bytes::copy_from_slice(avcc),
            ))
        }
        _ => {
            // Unknown codecs are surfaced by the capability probe, not here.
            Ok(TrackConfig::video(fourcc_str(fourcc), width, height, Bytes::new()))
        }
    }
}

fn parse_audio_entry(fourcc: &FourCc, body: &[u8]) -> Result<TrackConfig, ParseError> {
    let mut cursor = ByteCursor::new(body);
    cursor.skip(8)?; // reserved + data_reference_index
    let version = cursor.u16()?;
    cursor.skip(6)?;
    let channels = cursor.u16()?;
    cursor.skip(6)?; // sample size, pre_defined, reserved
    let sample_rate = cursor.u32()? >> 16;
    // QuickTime sound description extensions.
    match version {
        1 => cursor.skip(16)?,
        2 => cursor.skip(36)?,
        _ => {}
    }
    let children = cursor.rest();

    if fourcc == b"mp4a" {
        let esds = parse_esds(require_box(children, b"esds")?)?;
        let asc = AudioSpecificConfig::parse(&esds.audio_specific_config)?;
        let channels = if asc.channels > 0 { asc.channels } else { channels };
        return Ok(TrackConfig::audio(
            asc.codec_string(),
            channels,
            asc.sample_rate,
            esds.audio_specific_config,
        ));
    }

    Ok(TrackConfig::audio(
        fourcc_str(fourcc),
        channels,
        sample_rate,
        Bytes::new(),
    ))
}

/// Raw sample table boxes of one track.
#[derive(Debug, Default)]
struct SampleTable {
    /// (sample_count, delta)
    stts: Vec<(u32, u32)>,
    /// (sample_count, offset)
    ctts: Vec<(u32, i32)>,
    /// 1-based sync sample numbers; `None` means every sample is sync.
    stss: Option<Vec<u32>>,
    /// (first_chunk, samples_per_chunk)
    stsc: Vec<(u32, u32)>,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
}

impl SampleTable {
    fn parse(stbl: &[u8], file_len: usize) -> Result<Self, ParseError> {
        let mut table = SampleTable::default();

        for child in iter_boxes(stbl)? {
            let mut cursor = ByteCursor::new(child.body(stbl));
            match &child.box_type {
                b"stts" => {
                    cursor.full_box_header()?;
                    for _ in 0..cursor.u32()? {
                        table.stts.push((cursor.u32()?, cursor.u32()?));
                    }
                }
                b"ctts" => {
                    // Version 0 offsets are unsigned on paper, but writers
                    // routinely store negative values there too.
                    cursor.full_box_header()?;
                    for _ in 0..cursor.u32()? {
                        table.ctts.push((cursor.u32()?, cursor.i32()?));
                    }
                }
                b"stss" => {
                    cursor.full_box_header()?;
                    let count = cursor.u32()?;
                    let mut sync = Vec::with_capacity(count.min(1 << 16) as usize);
                    for _ in 0..count {
                        sync.push(cursor.u32()?);
                    }
                    table.stss = Some(sync);
                }
                b"stsc" => {
                    cursor.full_box_header()?;
                    for _ in 0..cursor.u32()? {
                        let first_chunk = cursor.u32()?;
                        let per_chunk = cursor.u32()?;
                        cursor.u32()?; // sample_description_index
                        table.stsc.push((first_chunk, per_chunk));
                    }
                }
                b"stsz" => {
                    cursor.full_box_header()?;
                    let constant = cursor.u32()?;
                    let count = cursor.u32()?;
                    if constant != 0 {
                        if u64::from(constant) * u64::from(count) > file_len as u64 {
                            return Err(ParseError::malformed(format!(
                                "{count} samples of {constant} bytes exceed the file size"
                            )));
                        }
                        table.sizes = vec![constant; count as usize];
                    } else {
                        for _ in 0..count {
                            table.sizes.push(cursor.u32()?);
                        }
                    }
                }
                b"stz2" => {
                    return Err(ParseError::malformed("compact sample sizes (stz2) are not supported"));
                }
                b"stco" => {
                    cursor.full_box_header()?;
                    for _ in 0..cursor.u32()? {
                        table.chunk_offsets.push(u64::from(cursor.u32()?));
                    }
                }
                b"co64" => {
                    cursor.full_box_header()?;
                    for _ in 0..cursor.u32()? {
                        table.chunk_offsets.push(cursor.u64()?);
                    }
                }
                _ => {}
            }
        }

        Ok(table)
    }

    /// Absolute file offset of every sample.
    fn sample_offsets(&self) -> Result<Vec<u64>, ParseError> {
        let total = self.sizes.len();
        let mut offsets = Vec::with_capacity(total);
        if total == 0 {
            return Ok(offsets);
        }
        if self.stsc.is_empty() {
            return Err(ParseError::malformed("samples present but stsc is empty"));
        }

        let mut sample = 0usize;
        for (entry_idx, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let first = first_chunk.checked_sub(1).ok_or_else(|| {
                ParseError::malformed("stsc chunk numbers are 1-based")
            })? as usize;
            let last = self
                .stsc
                .get(entry_idx + 1)
                .map(|&(next, _)| (next as usize).saturating_sub(1))
                .unwrap_or(self.chunk_offsets.len());

            for chunk in first..last.min(self.chunk_offsets.len()) {
                let mut offset = self.chunk_offsets[chunk];
                for _ in 0..per_chunk {
                    if sample >= total {
                        return Ok(offsets);
                    }
                    offsets.push(offset);
                    offset += u64::from(self.sizes[sample]);
                    sample += 1;
                }
            }
        }

        if offsets.len() < total {
            return Err(ParseError::malformed(format!(
                "chunk map covers {} of {total} samples",
                offsets.len()
            )));
        }
        Ok(offsets)
    }

    fn expand(
        &self,
        timescale: u32,
        edit_offset_us: i64,
        file: &Bytes,
        is_video: bool,
    ) -> Result<Vec<MediaSample>, ParseError> {
        let total = self.sizes.len();
        let offsets = self.sample_offsets()?;

        let mut deltas = Vec::with_capacity(total);
        for &(count, delta) in &self.stts {
            for _ in 0..count {
                if deltas.len() == total {
                    break;
                }
                deltas.push(delta);
            }
        }
        if deltas.len() < total {
            return Err(ParseError::malformed(format!(
                "stts covers {} of {total} samples",
                deltas.len()
            )));
        }

        let mut composition = Vec::with_capacity(if self.ctts.is_empty() { 0 } else { total });
        for &(count, offset) in &self.ctts {
            for _ in 0..count {
                if composition.len() == total {
                    break;
                }
                composition.push(offset);
            }
        }

        let mut is_sync = vec![self.stss.is_none(); total];
        if let Some(sync) = &self.stss {
            for &number in sync {
                if let Some(flag) = (number as usize).checked_sub(1).and_then(|i| is_sync.get_mut(i)) {
                    *flag = true;
                }
            }
        }

        let mut samples = Vec::with_capacity(total);
        let mut dts_ticks: i64 = 0;
        for i in 0..total {
            let start = offsets[i];
            let size = u64::from(self.sizes[i]);
            let end = start
                .checked_add(size)
                .filter(|&end| end <= file.len() as u64)
                .ok_or_else(|| {
                    ParseError::malformed(format!(
                        "sample {i} at offset {start} (+{size}) lies outside the file"
                    ))
                })?;

            let cts_ticks = dts_ticks + i64::from(composition.get(i).copied().unwrap_or(0));
            let kind = if is_sync[i] || !is_video {
                SampleKind::Key
            } else {
                SampleKind::Delta
            };

            samples.push(MediaSample {
                kind,
                timestamp_us: ticks_to_us(cts_ticks, timescale) + edit_offset_us,
                decode_timestamp_us: ticks_to_us(dts_ticks, timescale) + edit_offset_us,
                duration_us: ticks_to_us(i64::from(deltas[i]), timescale),
                data: file.slice(start as usize..end as usize),
            });
            dts_ticks += i64::from(deltas[i]);
        }

        Ok(samples)
    }
}
