//! AAC configuration: the MPEG-4 `esds` descriptor chain and the
//! AudioSpecificConfig it carries.

use bytes::{BufMut, Bytes};

use crate::boxes::ByteCursor;
use crate::error::ParseError;

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

/// MPEG-4 Audio object type indication in the decoder config descriptor.
pub const OBJECT_TYPE_MPEG4_AUDIO: u8 = 0x40;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Fields of an AudioSpecificConfig relevant to track setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpecificConfig {
    /// Parse the leading fields of an AudioSpecificConfig.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut bits = BitReader::new(data);
        let mut object_type = bits.read(5)? as u8;
        if object_type == 31 {
            object_type = 32 + bits.read(6)? as u8;
        }
        let freq_index = bits.read(4)? as usize;
        let sample_rate = if freq_index == 0x0F {
            bits.read(24)?
        } else {
            *SAMPLE_RATES.get(freq_index).ok_or_else(|| {
                ParseError::malformed(format!("reserved AAC sampling index {freq_index}"))
            })?
        };
        let channel_config = bits.read(4)? as u16;
        // Channel configuration 7 is 7.1 (eight channels).
        let channels = if channel_config == 7 { 8 } else { channel_config };

        Ok(Self {
            object_type,
            sample_rate,
            channels,
        })
    }

    /// Two-byte AudioSpecificConfig for a standard sample rate.
    pub fn encode(object_type: u8, sample_rate: u32, channels: u16) -> Option<Bytes> {
        let freq_index = SAMPLE_RATES.iter().position(|&r| r == sample_rate)? as u16;
        let channel_config = if channels == 8 { 7 } else { channels };
        if object_type >= 31 || channel_config > 7 {
            return None;
        }
        let packed = (u16::from(object_type) << 11) | (freq_index << 7) | (channel_config << 3);
        Some(Bytes::copy_from_slice(&packed.to_be_bytes()))
    }

    /// RFC 6381 codec string, e.g. `mp4a.40.2`.
    pub fn codec_string(&self) -> String {
        format!("mp4a.{:02x}.{}", OBJECT_TYPE_MPEG4_AUDIO, self.object_type)
    }
}

/// Decoder configuration pulled out of an `esds` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsdsInfo {
    pub object_type_indication: u8,
    pub audio_specific_config: Bytes,
}

/// Parse the body of an `esds` full box.
pub fn parse_esds(body: &[u8]) -> Result<EsdsInfo, ParseError> {
    let mut cursor = ByteCursor::new(body);
    cursor.full_box_header()?;

    let (tag, len) = read_descriptor_header(&mut cursor)?;
    if tag != ES_DESCRIPTOR_TAG {
        return Err(ParseError::malformed(format!(
            "esds starts with descriptor tag {tag:#04x}"
        )));
    }
    let mut es = ByteCursor::new(cursor.bytes(len.min(cursor.remaining()))?);
    es.u16()?; // ES_ID
    let flags = es.u8()?;
    if flags & 0x80 != 0 {
        es.u16()?; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = es.u8()? as usize;
        es.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        es.u16()?; // OCR_ES_Id
    }

    let mut object_type_indication = None;
    let mut asc = None;
    while es.remaining() > 0 {
        let (tag, len) = read_descriptor_header(&mut es)?;
        let payload = es.bytes(len.min(es.remaining()))?;
        if tag != DECODER_CONFIG_TAG {
            continue;
        }
        let mut dc = ByteCursor::new(payload);
        object_type_indication = Some(dc.u8()?);
        dc.skip(12)?; // streamType, bufferSizeDB, maxBitrate, avgBitrate
        while dc.remaining() > 0 {
            let (tag, len) = read_descriptor_header(&mut dc)?;
            let inner = dc.bytes(len.min(dc.remaining()))?;
            if tag == DECODER_SPECIFIC_INFO_TAG {
                asc = Some(Bytes::copy_from_slice(inner));
            }
        }
    }

    Ok(EsdsInfo {
        object_type_indication: object_type_indication
            .ok_or_else(|| ParseError::malformed("esds has no decoder config descriptor"))?,
        audio_specific_config: asc
            .ok_or_else(|| ParseError::malformed("esds has no decoder specific info"))?,
    })
}

/// Build an `esds` body (full box header included) around an
/// AudioSpecificConfig.
pub fn build_esds(track_id: u16, asc: &[u8], avg_bitrate: u32) -> Vec<u8> {
    let mut decoder_specific = Vec::new();
    write_descriptor(&mut decoder_specific, DECODER_SPECIFIC_INFO_TAG, asc);

    let mut decoder_config = Vec::new();
    decoder_config.put_u8(OBJECT_TYPE_MPEG4_AUDIO);
    decoder_config.put_u8((0x05 << 2) | 0x01); // audio stream
    decoder_config.put_uint(0, 3); // bufferSizeDB
    decoder_config.put_u32(avg_bitrate); // maxBitrate
    decoder_config.put_u32(avg_bitrate);
    decoder_config.put_slice(&decoder_specific);

    let mut es = Vec::new();
    es.put_u16(track_id);
    es.put_u8(0);
    write_descriptor(&mut es, DECODER_CONFIG_TAG, &decoder_config);
    write_descriptor(&mut es, SL_CONFIG_TAG, &[0x02]);

    let mut body = Vec::new();
    body.put_u32(0); // version + flags
    write_descriptor(&mut body, ES_DESCRIPTOR_TAG, &es);
    body
}

fn read_descriptor_header(cursor: &mut ByteCursor<'_>) -> Result<(u8, usize), ParseError> {
    let tag = cursor.u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let b = cursor.u8()?;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            return Ok((tag, len));
        }
    }
    Ok((tag, len))
}

fn write_descriptor(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.put_u8(tag);
    let len = payload.len();
    let mut groups = Vec::with_capacity(4);
    let mut rest = len;
    loop {
        groups.push((rest & 0x7F) as u8);
        rest >>= 7;
        if rest == 0 || groups.len() == 4 {
            break;
        }
    }
    for (i, group) in groups.iter().rev().enumerate() {
        let more = if i + 1 < groups.len() { 0x80 } else { 0 };
        buf.put_u8(group | more);
    }
    buf.put_slice(payload);
}

/// MSB-first bit reader.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read(&mut self, count: u32) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .data
                .get(self.bit / 8)
                .ok_or_else(|| ParseError::malformed("AudioSpecificConfig is truncated"))?;
            let bit = (byte >> (7 - (self.bit % 8))) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit += 1;
        }
        Ok(value)
    }
}
