//! ISO base media box primitives.
//!
//! Reading walks box headers over a borrowed byte slice and never copies
//! payloads. Writing appends to a `Vec<u8>` through [`bytes::BufMut`] and
//! patches the size field once the body is known.

use bytes::BufMut;

use crate::error::ParseError;

/// A four-character box or brand code.
pub type FourCc = [u8; 4];

/// Render a four-character code for logs and error messages.
pub fn fourcc_str(code: &FourCc) -> String {
    code.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCc,
    /// Offset of the first header byte within the parent slice.
    pub offset: usize,
    /// Total size including the header.
    pub size: usize,
    /// 8, or 16 for boxes using a 64-bit largesize.
    pub header_size: usize,
}

impl BoxHeader {
    /// Byte range of the body within the parent slice.
    pub fn body_range(&self) -> std::ops::Range<usize> {
        self.offset + self.header_size..self.offset + self.size
    }

    /// Body bytes within the parent slice.
    pub fn body<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.body_range()]
    }
}

/// Split a slice into its sequence of boxes.
///
/// A size of 0 extends the box to the end of the slice, a size of 1 means a
/// 64-bit largesize follows the type. Boxes that claim more bytes than the
/// slice holds are rejected.
pub fn iter_boxes(data: &[u8]) -> Result<Vec<BoxHeader>, ParseError> {
    let mut boxes = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < 8 {
            return Err(ParseError::malformed(format!(
                "{remaining} trailing bytes at offset {offset} are too short for a box header"
            )));
        }

        let mut cursor = ByteCursor::new(&data[offset..]);
        let size32 = cursor.u32()?;
        let box_type = cursor.fourcc()?;

        let (size, header_size) = match size32 {
            0 => (remaining, 8),
            1 => {
                let large = cursor.u64()?;
                let large = usize::try_from(large).map_err(|_| {
                    ParseError::malformed(format!(
                        "box '{}' size {large} does not fit in memory",
                        fourcc_str(&box_type)
                    ))
                })?;
                (large, 16)
            }
            n => (n as usize, 8),
        };

        if size < header_size {
            return Err(ParseError::malformed(format!(
                "box '{}' at offset {offset} has invalid size {size}",
                fourcc_str(&box_type)
            )));
        }
        if size > remaining {
            return Err(ParseError::malformed(format!(
                "box '{}' at offset {offset} claims {size} bytes but only {remaining} remain",
                fourcc_str(&box_type)
            )));
        }

        boxes.push(BoxHeader {
            box_type,
            offset,
            size,
            header_size,
        });
        offset += size;
    }

    Ok(boxes)
}

/// First child box of the given type.
pub fn find_box(data: &[u8], box_type: &FourCc) -> Result<Option<BoxHeader>, ParseError> {
    Ok(iter_boxes(data)?
        .into_iter()
        .find(|b| &b.box_type == box_type))
}

/// Body of the first child box of the given type, or a `Malformed` error
/// naming the missing box.
pub fn require_box<'a>(data: &'a [u8], box_type: &FourCc) -> Result<&'a [u8], ParseError> {
    find_box(data, box_type)?
        .map(|header| header.body(data))
        .ok_or_else(|| ParseError::malformed(format!("missing '{}' box", fourcc_str(box_type))))
}

/// Bounds-checked big-endian reader over a box body.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Unread bytes.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::malformed(format!(
                "need {n} bytes at offset {} but only {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ParseError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<u32, ParseError> {
        let b = self.bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn u32(&mut self) -> Result<u32, ParseError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, ParseError> {
        self.u32().map(|v| v as i32)
    }

    pub fn u64(&mut self) -> Result<u64, ParseError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn fourcc(&mut self) -> Result<FourCc, ParseError> {
        let b = self.bytes(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Version byte and 24-bit flags of a full box.
    pub fn full_box_header(&mut self) -> Result<(u8, u32), ParseError> {
        let version = self.u8()?;
        let flags = self.u24()?;
        Ok((version, flags))
    }
}

/// Append a box whose body is produced by `body`.
pub fn write_box(buf: &mut Vec<u8>, box_type: &FourCc, body: impl FnOnce(&mut Vec<u8>)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(box_type);
    body(buf);
    patch_size(buf, start);
}

/// Append a full box (version + flags header).
pub fn write_full_box(
    buf: &mut Vec<u8>,
    box_type: &FourCc,
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_box(buf, box_type, |buf| {
        buf.put_u8(version);
        buf.put_uint(u64::from(flags & 0x00FF_FFFF), 3);
        body(buf);
    });
}

fn patch_size(buf: &mut [u8], start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Unity transformation matrix used by `mvhd` and `tkhd`.
pub const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];
