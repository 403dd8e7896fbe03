//! H.264 bitstream helpers: the avcC decoder configuration record and
//! conversion between length-prefixed (AVCC) and Annex B NAL framing.

use bytes::{BufMut, Bytes};

use crate::boxes::ByteCursor;
use crate::error::ParseError;

/// NAL unit type constants (lower five bits of the NAL header).
pub mod nal_type {
    pub const NON_IDR_SLICE: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// Type of a NAL unit from its first byte.
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Parsed `AVCDecoderConfigurationRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// Bytes used by each NAL length prefix in samples (1, 2 or 4).
    pub nal_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Build a record from one SPS and one PPS, taking profile and level from
    /// the SPS header bytes.
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self, ParseError> {
        if sps.len() < 4 {
            return Err(ParseError::malformed("SPS too short for profile/level"));
        }
        Ok(Self {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            nal_length_size: 4,
            sps: vec![sps],
            pps: vec![pps],
        })
    }

    /// Parse the body of an `avcC` box.
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        let mut cursor = ByteCursor::new(record);
        let version = cursor.u8()?;
        if version != 1 {
            return Err(ParseError::malformed(format!(
                "unsupported avcC configuration version {version}"
            )));
        }
        let profile = cursor.u8()?;
        let compatibility = cursor.u8()?;
        let level = cursor.u8()?;
        let nal_length_size = (cursor.u8()? & 0x03) + 1;
        if nal_length_size == 3 {
            return Err(ParseError::malformed("avcC NAL length size of 3 is invalid"));
        }

        let sps_count = cursor.u8()? & 0x1F;
        let mut sps = Vec::with_capacity(sps_count as usize);
        for _ in 0..sps_count {
            let len = cursor.u16()? as usize;
            sps.push(Bytes::copy_from_slice(cursor.bytes(len)?));
        }

        let pps_count = cursor.u8()?;
        let mut pps = Vec::with_capacity(pps_count as usize);
        for _ in 0..pps_count {
            let len = cursor.u16()? as usize;
            pps.push(Bytes::copy_from_slice(cursor.bytes(len)?));
        }

        Ok(Self {
            profile,
            compatibility,
            level,
            nal_length_size,
            sps,
            pps,
        })
    }

    /// Serialize as an `avcC` box body.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::new();
        buf.put_u8(1);
        buf.put_u8(self.profile);
        buf.put_u8(self.compatibility);
        buf.put_u8(self.level);
        buf.put_u8(0xFC | (self.nal_length_size.saturating_sub(1) & 0x03));
        buf.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            buf.put_u16(sps.len() as u16);
            buf.put_slice(sps);
        }
        buf.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            buf.put_u16(pps.len() as u16);
            buf.put_slice(pps);
        }
        Bytes::from(buf)
    }

    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub fn codec_string(&self, sample_entry: &str) -> String {
        format!(
            "{sample_entry}.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// Parameter sets in Annex B framing, prepended to the first access unit
    /// handed to an Annex B decoder.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in self.sps.iter().chain(self.pps.iter()) {
            out.put_slice(&START_CODE);
            out.put_slice(nal);
        }
        out
    }
}

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Split Annex B data on 3- and 4-byte start codes.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(_, body_start)) in starts.iter().enumerate() {
        let mut end = starts
            .get(idx + 1)
            .map(|&(code_start, _)| code_start)
            .unwrap_or(data.len());
        // A 4-byte start code leaves one extra zero before the 3-byte match.
        while end > body_start && data[end - 1] == 0 && idx + 1 < starts.len() {
            end -= 1;
        }
        if end > body_start {
            nals.push(&data[body_start..end]);
        }
    }
    nals
}

/// Annex B access unit split into parameter sets and everything else.
#[derive(Debug, Default)]
pub struct AnnexBUnit<'a> {
    pub sps: Option<&'a [u8]>,
    pub pps: Option<&'a [u8]>,
    pub nals: Vec<&'a [u8]>,
    pub is_idr: bool,
}

/// Classify the NAL units of one Annex B access unit.
pub fn parse_annex_b(data: &[u8]) -> AnnexBUnit<'_> {
    let mut unit = AnnexBUnit::default();
    for nal in split_annex_b(data) {
        match nal_unit_type(nal) {
            Some(nal_type::SPS) => unit.sps = Some(nal),
            Some(nal_type::PPS) => unit.pps = Some(nal),
            Some(nal_type::AUD) => {}
            Some(t) => {
                if t == nal_type::IDR_SLICE {
                    unit.is_idr = true;
                }
                unit.nals.push(nal);
            }
            None => {}
        }
    }
    unit
}

/// Convert the non-parameter-set NAL units of an Annex B access unit to
/// 4-byte length-prefixed framing for an `avc1` sample.
pub fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    let unit = parse_annex_b(data);
    let mut out = Vec::with_capacity(data.len());
    for nal in unit.nals {
        out.put_u32(nal.len() as u32);
        out.put_slice(nal);
    }
    out
}

/// Convert a length-prefixed sample to Annex B framing.
pub fn avcc_to_annex_b(data: &[u8], nal_length_size: u8) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(data.len() + 16);
    for nal in iter_avcc(data, nal_length_size)? {
        out.put_slice(&START_CODE);
        out.put_slice(nal);
    }
    Ok(out)
}

/// NAL units of a length-prefixed sample.
pub fn iter_avcc(data: &[u8], nal_length_size: u8) -> Result<Vec<&[u8]>, ParseError> {
    let mut cursor = ByteCursor::new(data);
    let mut nals = Vec::new();
    while cursor.remaining() > 0 {
        let len = match nal_length_size {
            1 => cursor.u8()? as usize,
            2 => cursor.u16()? as usize,
            4 => cursor.u32()? as usize,
            n => {
                return Err(ParseError::malformed(format!(
                    "unsupported NAL length size {n}"
                )))
            }
        };
        nals.push(cursor.bytes(len)?);
    }
    Ok(nals)
}

/// Whether a length-prefixed sample contains an IDR slice.
pub fn avcc_contains_idr(data: &[u8], nal_length_size: u8) -> bool {
    iter_avcc(data, nal_length_size)
        .map(|nals| {
            nals.iter()
                .any(|nal| nal_unit_type(nal) == Some(nal_type::IDR_SLICE))
        })
        .unwrap_or(false)
}
