//! Container reader.
//!
//! Parses `moov` into per-track sample tables and reads sample payloads on
//! demand. Any ISO base media file with `vide`/`soun` tracks can be opened to
//! inspect geometry and timing; payload decoding is limited to the raw RGB24
//! (`raw `) and 16-bit little-endian PCM (`sowt`) entries the writer emits.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use duet_media_model::geometry::{AffineTransform, Size};
use duet_media_model::sample::{AudioFormat, TrackKind};

use crate::atoms::{
    child_boxes, find_child, fixed_16_16_to_f64, read_box_header, require_child, ticks_to_ns,
};
use crate::error::{ContainerError, ContainerResult};

/// Location and timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    pub offset: u64,
    pub size: u32,
    /// Decode time in track ticks.
    pub dts: u64,
    pub duration: u32,
}

/// A parsed `trak`.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub kind: TrackKind,
    /// Sample entry four-character code (`raw `, `sowt`, `avc1`, ...).
    pub codec: String,
    pub timescale: u32,
    /// Leading empty edit, in nanoseconds.
    pub start_ns: u64,
    /// Track header matrix.
    pub transform: AffineTransform,
    /// Track header size before the matrix is applied.
    pub natural_size: Size,
    /// Coded frame dimensions from the sample entry.
    pub coded_width: u32,
    pub coded_height: u32,
    /// Audio parameters for sound tracks.
    pub audio: Option<AudioFormat>,
    pub samples: Vec<SampleEntry>,
}

impl TrackInfo {
    /// Presentation time of a sample on the file timeline.
    pub fn sample_time_ns(&self, index: usize) -> Option<u64> {
        self.samples
            .get(index)
            .map(|s| self.start_ns + ticks_to_ns(s.dts, self.timescale))
    }

    /// End of the last sample on the file timeline.
    pub fn end_ns(&self) -> u64 {
        match self.samples.last() {
            Some(last) => self.start_ns + ticks_to_ns(last.dts + last.duration as u64, self.timescale),
            None => self.start_ns,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_ns() as f64 / 1e9
    }

    /// Index of the sample displayed at `time_ns`: the last sample starting
    /// at or before it, or the first sample for earlier times.
    pub fn sample_index_at(&self, time_ns: u64) -> Option<usize> {
        if self.samples.is_empty() {
            return None;
        }
        let after = self
            .samples
            .partition_point(|s| self.start_ns + ticks_to_ns(s.dts, self.timescale) <= time_ns);
        Some(after.saturating_sub(1))
    }

    /// Average frame rate implied by the sample durations.
    pub fn nominal_fps(&self) -> f64 {
        let total: u64 = self.samples.iter().map(|s| s.duration as u64).sum();
        if total == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * self.timescale as f64 / total as f64
    }

    pub fn is_raw_video(&self) -> bool {
        self.kind == TrackKind::Video && self.codec == "raw "
    }

    pub fn is_pcm_audio(&self) -> bool {
        self.kind == TrackKind::Audio && self.codec == "sowt" && self.audio.is_some()
    }
}

/// Reads container metadata and sample payloads.
pub struct ContainerReader<R: Read + Seek> {
    reader: R,
    tracks: Vec<TrackInfo>,
    movie_timescale: u32,
    movie_duration: u64,
}

impl ContainerReader<BufReader<File>> {
    /// Open a file from disk.
    pub fn open(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Scan top-level boxes and parse `moov`.
    pub fn from_reader(mut reader: R) -> ContainerResult<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut moov: Option<Vec<u8>> = None;
        let mut saw_ftyp = false;
        let mut position = 0u64;

        while let Some(header) = read_box_header(&mut reader)? {
            let body_start = position + header.header_len;
            let remaining = file_len.saturating_sub(body_start);
            match &header.box_type {
                b"ftyp" => saw_ftyp = true,
                b"moov" => {
                    let len = header.body_len().unwrap_or(remaining);
                    if len > remaining {
                        return Err(ContainerError::Malformed(format!(
                            "'moov' declares {len} bytes but only {remaining} remain"
                        )));
                    }
                    let mut body = Vec::new();
                    body.try_reserve_exact(len as usize).map_err(|_| {
                        ContainerError::Malformed(format!("'moov' of {len} bytes is too large"))
                    })?;
                    body.resize(len as usize, 0);
                    reader.read_exact(&mut body)?;
                    moov = Some(body);
                }
                _ => {}
            }
            match header.size {
                Some(size) => position += size,
                None => break,
            }
            if position < body_start {
                return Err(ContainerError::Malformed("box size went backwards".into()));
            }
            reader.seek(SeekFrom::Start(position))?;
        }

        if !saw_ftyp && moov.is_none() {
            return Err(ContainerError::Malformed("not an ISO base media file".into()));
        }
        let moov = moov.ok_or_else(|| ContainerError::Malformed("missing 'moov' box".into()))?;
        let (movie_timescale, movie_duration) = parse_mvhd(require_child(&moov, b"mvhd")?)?;

        let mut tracks = Vec::new();
        for (box_type, body) in child_boxes(&moov)? {
            if &box_type != b"trak" {
                continue;
            }
            if let Some(track) = parse_trak(body, movie_timescale, file_len)? {
                tracks.push(track);
            }
        }
        tracing::debug!(tracks = tracks.len(), "Parsed container");

        Ok(Self {
            reader,
            tracks,
            movie_timescale,
            movie_duration,
        })
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// First track of a kind, in file order.
    pub fn first_track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Movie duration from the movie header, falling back to the longest track.
    pub fn duration_secs(&self) -> f64 {
        let from_header = self.movie_duration as f64 / self.movie_timescale.max(1) as f64;
        let from_tracks = self
            .tracks
            .iter()
            .map(TrackInfo::duration_secs)
            .fold(0.0, f64::max);
        if from_header > 0.0 {
            from_header
        } else {
            from_tracks
        }
    }

    /// Read one sample payload.
    pub fn read_sample(&mut self, track_id: u32, index: usize) -> ContainerResult<Vec<u8>> {
        let entry = self
            .track(track_id)
            .ok_or_else(|| ContainerError::Track(format!("track {track_id} not found")))?
            .samples
            .get(index)
            .copied()
            .ok_or_else(|| {
                ContainerError::Track(format!("track {track_id} has no sample {index}"))
            })?;
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0u8; entry.size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }
}

fn field<const N: usize>(data: &[u8], at: usize, what: &str) -> ContainerResult<[u8; N]> {
    data.get(at..at + N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| ContainerError::Malformed(format!("truncated {what}")))
}

fn be_u16(data: &[u8], at: usize, what: &str) -> ContainerResult<u16> {
    Ok(BigEndian::read_u16(&field::<2>(data, at, what)?))
}

fn be_u32(data: &[u8], at: usize, what: &str) -> ContainerResult<u32> {
    Ok(BigEndian::read_u32(&field::<4>(data, at, what)?))
}

fn be_i32(data: &[u8], at: usize, what: &str) -> ContainerResult<i32> {
    Ok(BigEndian::read_i32(&field::<4>(data, at, what)?))
}

fn be_u64(data: &[u8], at: usize, what: &str) -> ContainerResult<u64> {
    Ok(BigEndian::read_u64(&field::<8>(data, at, what)?))
}

fn be_i64(data: &[u8], at: usize, what: &str) -> ContainerResult<i64> {
    Ok(BigEndian::read_i64(&field::<8>(data, at, what)?))
}

fn version(data: &[u8], what: &str) -> ContainerResult<u8> {
    data.first()
        .copied()
        .ok_or_else(|| ContainerError::Malformed(format!("empty {what}")))
}

fn parse_mvhd(body: &[u8]) -> ContainerResult<(u32, u64)> {
    match version(body, "mvhd")? {
        0 => Ok((be_u32(body, 12, "mvhd")?, be_u32(body, 16, "mvhd")? as u64)),
        1 => Ok((be_u32(body, 20, "mvhd")?, be_u64(body, 24, "mvhd")?)),
        v => Err(ContainerError::Unsupported(format!("mvhd version {v}"))),
    }
}

struct TrackHeader {
    track_id: u32,
    transform: AffineTransform,
    size: Size,
}

fn parse_tkhd(body: &[u8]) -> ContainerResult<TrackHeader> {
    let (track_id, rest) = match version(body, "tkhd")? {
        0 => (be_u32(body, 12, "tkhd")?, 4 + 20),
        1 => (be_u32(body, 20, "tkhd")?, 4 + 32),
        v => return Err(ContainerError::Unsupported(format!("tkhd version {v}"))),
    };
    // reserved(8) layer(2) alternate_group(2) volume(2) reserved(2)
    let matrix_at = rest + 16;
    let m = |i: usize| be_i32(body, matrix_at + i * 4, "tkhd matrix");
    let transform = AffineTransform::new(
        fixed_16_16_to_f64(m(0)?),
        fixed_16_16_to_f64(m(1)?),
        fixed_16_16_to_f64(m(3)?),
        fixed_16_16_to_f64(m(4)?),
        fixed_16_16_to_f64(m(6)?),
        fixed_16_16_to_f64(m(7)?),
    );
    let size_at = matrix_at + 36;
    let width = fixed_16_16_to_f64(be_i32(body, size_at, "tkhd")?);
    let height = fixed_16_16_to_f64(be_i32(body, size_at + 4, "tkhd")?);
    Ok(TrackHeader {
        track_id,
        transform,
        size: Size::new(width, height),
    })
}

/// Sum of leading empty edits, in movie ticks.
fn parse_elst(body: &[u8]) -> ContainerResult<u64> {
    let v = version(body, "elst")?;
    let count = be_u32(body, 4, "elst")? as usize;
    let entry_len = if v == 1 { 20 } else { 12 };
    let mut empty = 0u64;
    for i in 0..count {
        let at = 8 + i * entry_len;
        let (duration, media_time) = if v == 1 {
            (be_u64(body, at, "elst")?, be_i64(body, at + 8, "elst")?)
        } else {
            (be_u32(body, at, "elst")? as u64, be_i32(body, at + 4, "elst")? as i64)
        };
        if media_time != -1 {
            break;
        }
        empty += duration;
    }
    Ok(empty)
}

fn parse_mdhd(body: &[u8]) -> ContainerResult<u32> {
    match version(body, "mdhd")? {
        0 => be_u32(body, 12, "mdhd"),
        1 => be_u32(body, 20, "mdhd"),
        v => Err(ContainerError::Unsupported(format!("mdhd version {v}"))),
    }
}

struct SampleDescription {
    codec: String,
    width: u32,
    height: u32,
    audio: Option<AudioFormat>,
}

fn parse_stsd(body: &[u8], kind: TrackKind) -> ContainerResult<SampleDescription> {
    let entries = body
        .get(8..)
        .ok_or_else(|| ContainerError::Malformed("truncated stsd".into()))?;
    let (codec, entry) = child_boxes(entries)?
        .into_iter()
        .next()
        .ok_or_else(|| ContainerError::Malformed("stsd has no entries".into()))?;
    let codec = String::from_utf8_lossy(&codec).into_owned();

    match kind {
        TrackKind::Video => Ok(SampleDescription {
            codec,
            width: be_u16(entry, 24, "visual sample entry")? as u32,
            height: be_u16(entry, 26, "visual sample entry")? as u32,
            audio: None,
        }),
        TrackKind::Audio => {
            let channels = be_u16(entry, 16, "sound sample entry")?;
            let bits = be_u16(entry, 18, "sound sample entry")?;
            let sample_rate = be_u32(entry, 24, "sound sample entry")? >> 16;
            let audio = (bits == 16 && channels > 0 && sample_rate > 0).then_some(AudioFormat {
                sample_rate,
                channels,
            });
            Ok(SampleDescription {
                codec,
                width: 0,
                height: 0,
                audio,
            })
        }
    }
}

/// Entry count of a table box, checked against the bytes the box holds.
fn table_count(body: &[u8], at: usize, entry_len: usize, what: &str) -> ContainerResult<usize> {
    let count = be_u32(body, at, what)? as usize;
    let room = body.len().saturating_sub(at + 4) / entry_len;
    if count > room {
        return Err(ContainerError::Malformed(format!(
            "{what} declares {count} entries but holds {room}"
        )));
    }
    Ok(count)
}

fn parse_sample_table(stbl: &[u8], file_len: u64) -> ContainerResult<Vec<SampleEntry>> {
    let stts = require_child(stbl, b"stts")?;
    let stsc = require_child(stbl, b"stsc")?;
    let stsz = require_child(stbl, b"stsz")?;

    let uniform = be_u32(stsz, 4, "stsz")?;
    let sizes: Vec<u32> = if uniform != 0 {
        let count = be_u32(stsz, 8, "stsz")? as u64;
        // every sample needs at least one byte of payload in the file
        if count.saturating_mul(uniform as u64) > file_len {
            return Err(ContainerError::Malformed(format!(
                "stsz declares {count} samples of {uniform} bytes in a {file_len} byte file"
            )));
        }
        vec![uniform; count as usize]
    } else {
        let count = table_count(stsz, 8, 4, "stsz")?;
        (0..count)
            .map(|i| be_u32(stsz, 12 + i * 4, "stsz"))
            .collect::<ContainerResult<_>>()?
    };
    let count = sizes.len();

    let chunk_offsets: Vec<u64> = if let Some(stco) = find_child(stbl, b"stco")? {
        let n = table_count(stco, 4, 4, "stco")?;
        (0..n)
            .map(|i| be_u32(stco, 8 + i * 4, "stco").map(u64::from))
            .collect::<ContainerResult<_>>()?
    } else {
        let co64 = require_child(stbl, b"co64")?;
        let n = table_count(co64, 4, 8, "co64")?;
        (0..n)
            .map(|i| be_u64(co64, 8 + i * 8, "co64"))
            .collect::<ContainerResult<_>>()?
    };

    // (first_chunk, samples_per_chunk), 1-based chunks
    let stsc_count = table_count(stsc, 4, 12, "stsc")?;
    let runs: Vec<(u32, u32)> = (0..stsc_count)
        .map(|i| {
            Ok((
                be_u32(stsc, 8 + i * 12, "stsc")?,
                be_u32(stsc, 12 + i * 12, "stsc")?,
            ))
        })
        .collect::<ContainerResult<_>>()?;

    let mut offsets = Vec::with_capacity(count);
    for (chunk_idx, chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_no = chunk_idx as u32 + 1;
        let per_chunk = runs
            .iter()
            .take_while(|(first, _)| *first <= chunk_no)
            .last()
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let mut offset = *chunk_offset;
        for _ in 0..per_chunk {
            let Some(size) = sizes.get(offsets.len()) else {
                break;
            };
            let end = offset.saturating_add(*size as u64);
            if end > file_len {
                return Err(ContainerError::Malformed(format!(
                    "sample at {offset} runs past the end of the file"
                )));
            }
            offsets.push(offset);
            offset = end;
        }
    }
    if offsets.len() != count {
        return Err(ContainerError::Malformed(format!(
            "chunk map covers {} of {count} samples",
            offsets.len()
        )));
    }

    let stts_count = table_count(stts, 4, 8, "stts")?;
    let mut durations = Vec::with_capacity(count);
    for i in 0..stts_count {
        let run = be_u32(stts, 8 + i * 8, "stts")? as usize;
        let delta = be_u32(stts, 12 + i * 8, "stts")?;
        let take = run.min(count - durations.len());
        durations.extend(std::iter::repeat(delta).take(take));
    }
    if durations.len() < count {
        return Err(ContainerError::Malformed("stts shorter than stsz".into()));
    }

    let mut dts = 0u64;
    Ok((0..count)
        .map(|i| {
            let entry = SampleEntry {
                offset: offsets[i],
                size: sizes[i],
                dts,
                duration: durations[i],
            };
            dts += durations[i] as u64;
            entry
        })
        .collect())
}

fn parse_trak(
    trak: &[u8],
    movie_timescale: u32,
    file_len: u64,
) -> ContainerResult<Option<TrackInfo>> {
    let mdia = require_child(trak, b"mdia")?;
    let hdlr = require_child(mdia, b"hdlr")?;
    let kind = match &field::<4>(hdlr, 8, "hdlr")? {
        b"vide" => TrackKind::Video,
        b"soun" => TrackKind::Audio,
        _ => return Ok(None),
    };

    let header = parse_tkhd(require_child(trak, b"tkhd")?)?;
    let empty_edit = match find_child(trak, b"edts")? {
        Some(edts) => match find_child(edts, b"elst")? {
            Some(elst) => parse_elst(elst)?,
            None => 0,
        },
        None => 0,
    };
    let timescale = parse_mdhd(require_child(mdia, b"mdhd")?)?;
    if timescale == 0 {
        return Err(ContainerError::Malformed("media timescale is zero".into()));
    }

    let minf = require_child(mdia, b"minf")?;
    let stbl = require_child(minf, b"stbl")?;
    let description = parse_stsd(require_child(stbl, b"stsd")?, kind)?;
    let samples = parse_sample_table(stbl, file_len)?;

    let natural_size = if kind == TrackKind::Video && header.size.is_zero() {
        Size::from_pixels(description.width, description.height)
    } else {
        header.size
    };

    Ok(Some(TrackInfo {
        track_id: header.track_id,
        kind,
        codec: description.codec,
        timescale,
        start_ns: ticks_to_ns(empty_edit, movie_timescale.max(1)),
        transform: header.transform,
        natural_size,
        coded_width: description.width,
        coded_height: description.height,
        audio: description.audio,
        samples,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn garbage_is_malformed() {
        let bytes = Cursor::new(b"this is not a movie file at all".to_vec());
        assert!(ContainerReader::from_reader(bytes).is_err());
    }

    #[test]
    fn empty_input_is_malformed() {
        let result = ContainerReader::from_reader(Cursor::new(Vec::new()));
        assert!(matches!(result, Err(ContainerError::Malformed(_))));
    }

    fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn oversized_moov_is_malformed() {
        let mut bytes = boxed(b"ftyp", b"qt  \0\0\0\0");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"moov");
        bytes.extend_from_slice(&(1u64 << 62).to_be_bytes());
        assert_eq!(bytes.len(), 32);

        let result = ContainerReader::from_reader(Cursor::new(bytes));
        assert!(matches!(result, Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn sample_counts_must_fit_their_box() {
        let empty_table = [0u8; 8];
        let mut stsz = vec![0u8; 4];
        stsz.extend_from_slice(&0u32.to_be_bytes());
        stsz.extend_from_slice(&1_000_000u32.to_be_bytes());
        let mut stbl = boxed(b"stts", &empty_table);
        stbl.extend(boxed(b"stsc", &empty_table));
        stbl.extend(boxed(b"stsz", &stsz));
        stbl.extend(boxed(b"stco", &empty_table));
        let err = parse_sample_table(&stbl, 1 << 20).unwrap_err();
        assert!(err.to_string().contains("stsz declares 1000000 entries"));

        // uniform sizes claiming more payload than the file holds
        let mut stsz = vec![0u8; 4];
        stsz.extend_from_slice(&4096u32.to_be_bytes());
        stsz.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut stbl = boxed(b"stts", &empty_table);
        stbl.extend(boxed(b"stsc", &empty_table));
        stbl.extend(boxed(b"stsz", &stsz));
        stbl.extend(boxed(b"stco", &empty_table));
        assert!(matches!(
            parse_sample_table(&stbl, 1 << 20),
            Err(ContainerError::Malformed(_))
        ));
    }

    #[test]
    fn elst_sums_leading_empty_edits() {
        let mut body = vec![0, 0, 0, 0, 0, 0, 0, 2];
        body.extend_from_slice(&500u32.to_be_bytes());
        body.extend_from_slice(&(-1i32).to_be_bytes());
        body.extend_from_slice(&[0, 1, 0, 0]);
        body.extend_from_slice(&2000u32.to_be_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(&[0, 1, 0, 0]);
        assert_eq!(parse_elst(&body).unwrap(), 500);
    }
}
