//! Box (atom) primitives for ISO base media files.
//!
//! Every box starts with a 4-byte big-endian size (header included) and a
//! 4-byte type. A size of 1 means a 64-bit size follows the type; a size of 0
//! means the box runs to the end of the file. "Full boxes" add a 1-byte
//! version and 3 bytes of flags.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ContainerError, ContainerResult};

/// Movie-level timescale (millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Video media timescale.
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Seconds between 1904-01-01 (box epoch) and 1970-01-01.
pub const BOX_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Start a box whose size is patched later. Returns the size field position.
pub fn begin_box<W: Write + Seek>(writer: &mut W, box_type: &[u8; 4]) -> ContainerResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_all(box_type)?;
    Ok(pos)
}

/// Start a full box (version + flags) whose size is patched later.
pub fn begin_full_box<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
) -> ContainerResult<u64> {
    let pos = begin_box(writer, box_type)?;
    writer.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00FF_FFFF))?;
    Ok(pos)
}

/// Patch the 32-bit size of the box started at `size_pos`.
pub fn end_box<W: Write + Seek>(writer: &mut W, size_pos: u64) -> ContainerResult<()> {
    let current = writer.stream_position()?;
    let size = current - size_pos;
    if size > u32::MAX as u64 {
        return Err(ContainerError::Overflow(format!(
            "box of {size} bytes needs a 64-bit header"
        )));
    }
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Start a box with a 64-bit size. Returns the position of the box start.
pub fn begin_large_box<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
) -> ContainerResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(1)?;
    writer.write_all(box_type)?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(pos)
}

/// Patch the 64-bit size of the box started at `box_pos`.
pub fn end_large_box<W: Write + Seek>(writer: &mut W, box_pos: u64) -> ContainerResult<()> {
    let current = writer.stream_position()?;
    writer.seek(SeekFrom::Start(box_pos + 8))?;
    writer.write_u64::<BigEndian>(current - box_pos)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Signed 16.16 fixed point.
pub fn write_fixed_16_16<W: Write>(writer: &mut W, value: f64) -> ContainerResult<()> {
    writer.write_i32::<BigEndian>((value * 65_536.0).round() as i32)?;
    Ok(())
}

/// Signed 2.30 fixed point (matrix u, v, w).
pub fn write_fixed_2_30<W: Write>(writer: &mut W, value: f64) -> ContainerResult<()> {
    writer.write_i32::<BigEndian>((value * 1_073_741_824.0).round() as i32)?;
    Ok(())
}

/// Signed 8.8 fixed point (volume).
pub fn write_fixed_8_8<W: Write>(writer: &mut W, value: f64) -> ContainerResult<()> {
    writer.write_i16::<BigEndian>((value * 256.0).round() as i16)?;
    Ok(())
}

pub fn fixed_16_16_to_f64(raw: i32) -> f64 {
    raw as f64 / 65_536.0
}

pub fn fixed_2_30_to_f64(raw: i32) -> f64 {
    raw as f64 / 1_073_741_824.0
}

pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> ContainerResult<()> {
    writer.write_all(&vec![0u8; count])?;
    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits.
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_lowercase()) {
        return encode_language("und");
    }
    bytes
        .iter()
        .fold(0u16, |acc, b| (acc << 5) | (b - 0x60) as u16)
}

/// Current time in box-epoch seconds.
pub fn box_creation_time() -> u32 {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix + BOX_EPOCH_OFFSET).min(u32::MAX as u64) as u32
}

/// Convert nanoseconds to timescale ticks (rounded to nearest).
pub fn ns_to_ticks(ns: u64, timescale: u32) -> u64 {
    ((ns as u128 * timescale as u128 + 500_000_000) / 1_000_000_000) as u64
}

/// Convert timescale ticks to nanoseconds.
pub fn ticks_to_ns(ticks: u64, timescale: u32) -> u64 {
    (ticks as u128 * 1_000_000_000 / timescale.max(1) as u128) as u64
}

/// Rescale ticks between timescales (rounded to nearest).
pub fn rescale(ticks: u64, from: u32, to: u32) -> u64 {
    ((ticks as u128 * to as u128 + from as u128 / 2) / from.max(1) as u128) as u64
}

/// Header of a box read from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    /// Header length in bytes (8 or 16).
    pub header_len: u64,
    /// Total box size; `None` when the box runs to end of file.
    pub size: Option<u64>,
}

impl BoxHeader {
    pub fn type_str(&self) -> String {
        String::from_utf8_lossy(&self.box_type).into_owned()
    }

    /// Body length, when the size is known.
    pub fn body_len(&self) -> Option<u64> {
        self.size.map(|s| s.saturating_sub(self.header_len))
    }
}

/// Read a box header. Returns `Ok(None)` at a clean end of stream.
pub fn read_box_header<R: Read>(reader: &mut R) -> ContainerResult<Option<BoxHeader>> {
    let mut first = [0u8; 4];
    match reader.read_exact(&mut first) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let size32 = u32::from_be_bytes(first);
    let mut box_type = [0u8; 4];
    reader.read_exact(&mut box_type)?;

    let (size, header_len) = match size32 {
        0 => (None, 8),
        1 => (Some(reader.read_u64::<BigEndian>()?), 16),
        n => (Some(n as u64), 8),
    };
    if let Some(size) = size {
        if size < header_len {
            return Err(ContainerError::Malformed(format!(
                "box '{}' declares size {size} smaller than its header",
                String::from_utf8_lossy(&box_type)
            )));
        }
    }
    Ok(Some(BoxHeader {
        box_type,
        header_len,
        size,
    }))
}

/// Iterate over the child boxes packed in `data`, yielding `(type, body)`.
pub fn child_boxes(data: &[u8]) -> ContainerResult<Vec<([u8; 4], &[u8])>> {
    let mut children = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let mut cursor = &data[pos..];
        let header = match read_box_header(&mut cursor)? {
            Some(header) => header,
            None => break,
        };
        let start = pos + header.header_len as usize;
        let end = match header.size {
            Some(size) => pos
                .checked_add(size as usize)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    ContainerError::Malformed(format!(
                        "box '{}' overruns its parent",
                        header.type_str()
                    ))
                })?,
            None => data.len(),
        };
        if start > end {
            return Err(ContainerError::Malformed("truncated box header".into()));
        }
        children.push((header.box_type, &data[start..end]));
        pos = end;
    }
    Ok(children)
}

/// First child of the given type.
pub fn find_child<'a>(data: &'a [u8], box_type: &[u8; 4]) -> ContainerResult<Option<&'a [u8]>> {
    Ok(child_boxes(data)?
        .into_iter()
        .find(|(t, _)| t == box_type)
        .map(|(_, body)| body))
}

/// Like [`find_child`] but missing boxes are an error.
pub fn require_child<'a>(data: &'a [u8], box_type: &[u8; 4]) -> ContainerResult<&'a [u8]> {
    find_child(data, box_type)?.ok_or_else(|| {
        ContainerError::Malformed(format!(
            "missing '{}' box",
            String::from_utf8_lossy(box_type)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn placeholder_box_gets_patched() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = begin_box(&mut cursor, b"moov").unwrap();
        cursor.write_all(&[0xAA; 20]).unwrap();
        end_box(&mut cursor, pos).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 28);
        assert_eq!(&buf[0..4], &[0, 0, 0, 28]);
        assert_eq!(&buf[4..8], b"moov");
    }

    #[test]
    fn full_box_carries_version_and_flags() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = begin_full_box(&mut cursor, b"tkhd", 0, 0x000003).unwrap();
        end_box(&mut cursor, pos).unwrap();
        let buf = cursor.into_inner();
        assert_eq!(&buf[8..12], &[0, 0, 0, 3]);
    }

    #[test]
    fn large_box_header_roundtrips() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = begin_large_box(&mut cursor, b"mdat").unwrap();
        cursor.write_all(&[0xBB; 32]).unwrap();
        end_large_box(&mut cursor, pos).unwrap();

        let buf = cursor.into_inner();
        let header = read_box_header(&mut buf.as_slice()).unwrap().unwrap();
        assert_eq!(&header.box_type, b"mdat");
        assert_eq!(header.header_len, 16);
        assert_eq!(header.size, Some(48));
        assert_eq!(header.body_len(), Some(32));
    }

    #[test]
    fn undersized_box_is_malformed() {
        let bytes = [0u8, 0, 0, 4, b'f', b'r', b'e', b'e'];
        assert!(matches!(
            read_box_header(&mut bytes.as_slice()),
            Err(ContainerError::Malformed(_))
        ));
    }

    #[test]
    fn child_boxes_walks_siblings() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 9]);
        data.extend_from_slice(b"aaaa");
        data.push(7);
        data.extend_from_slice(&[0, 0, 0, 8]);
        data.extend_from_slice(b"bbbb");
        let children = child_boxes(&data).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], (*b"aaaa", &[7u8][..]));
        assert!(children[1].1.is_empty());
        assert!(require_child(&data, b"cccc").is_err());
    }

    #[test]
    fn fixed_point_helpers() {
        let mut buf = Vec::new();
        write_fixed_16_16(&mut buf, -1.0).unwrap();
        let raw = i32::from_be_bytes(buf[0..4].try_into().unwrap());
        assert_eq!(fixed_16_16_to_f64(raw), -1.0);

        buf.clear();
        write_fixed_2_30(&mut buf, 1.0).unwrap();
        assert_eq!(&buf, &[0x40, 0, 0, 0]);
    }

    #[test]
    fn language_packing() {
        assert_eq!(encode_language("und"), 0x55C4);
        assert_eq!(encode_language("eng"), 5575);
        assert_eq!(encode_language("EN"), 0x55C4);
    }

    #[test]
    fn tick_conversions() {
        assert_eq!(ns_to_ticks(1_000_000_000, VIDEO_TIMESCALE), 90_000);
        assert_eq!(ns_to_ticks(33_333_333, VIDEO_TIMESCALE), 3_000);
        assert_eq!(ticks_to_ns(44_100, 44_100), 1_000_000_000);
        assert_eq!(rescale(90_000, VIDEO_TIMESCALE, MOVIE_TIMESCALE), 1_000);
    }
}
