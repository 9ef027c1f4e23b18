//! Progressive container writer.
//!
//! Layout: `ftyp`, a 64-bit `mdat` that grows as samples arrive, then `moov`
//! written by [`ContainerWriter::finish`]. Every sample is its own chunk, so
//! the sample tables map one-to-one onto the samples handed to
//! [`ContainerWriter::write_sample`].
//!
//! ```ignore
//! let mut writer = ContainerWriter::new(BufWriter::new(File::create(path)?))?;
//! writer.add_video_track(1, &video_format)?;
//! writer.add_audio_track(2, &audio_format)?;
//! writer.write_sample(1, 0, &rgb_bytes)?;
//! writer.finish()?;
//! ```

use std::io::{Seek, Write};

use byteorder::{BigEndian, WriteBytesExt};
use duet_media_model::geometry::AffineTransform;
use duet_media_model::sample::{AudioFormat, TrackKind, VideoFormat};

use crate::atoms::{
    begin_box, begin_full_box, begin_large_box, box_creation_time, encode_language, end_box,
    end_large_box, ns_to_ticks, rescale, write_fixed_16_16, write_fixed_2_30, write_fixed_8_8,
    write_zeros, MOVIE_TIMESCALE, VIDEO_TIMESCALE,
};
use crate::error::{ContainerError, ContainerResult};

/// Metadata for one sample already written to `mdat`.
#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    offset: u64,
    size: u32,
    /// Decode time in track ticks, on the session timeline.
    dts: u64,
    /// Duration in track ticks; patched when the next sample arrives.
    duration: u32,
}

#[derive(Debug, Clone, Copy)]
enum TrackSetup {
    Video(VideoFormat),
    Audio(AudioFormat),
}

#[derive(Debug)]
struct TrackState {
    track_id: u32,
    timescale: u32,
    setup: TrackSetup,
    samples: Vec<SampleInfo>,
}

impl TrackState {
    fn kind(&self) -> TrackKind {
        match self.setup {
            TrackSetup::Video(_) => TrackKind::Video,
            TrackSetup::Audio(_) => TrackKind::Audio,
        }
    }

    fn first_dts(&self) -> u64 {
        self.samples.first().map(|s| s.dts).unwrap_or(0)
    }

    fn media_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// Presentation end in movie ticks, including the leading empty edit.
    fn movie_end(&self) -> u64 {
        rescale(
            self.first_dts() + self.media_duration(),
            self.timescale,
            MOVIE_TIMESCALE,
        )
    }
}

/// Summary returned by [`ContainerWriter::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTrack {
    pub track_id: u32,
    pub kind: TrackKind,
    pub sample_count: usize,
    pub duration_secs: f64,
}

/// Writes raw video and PCM audio samples into an ISO base media file.
pub struct ContainerWriter<W: Write + Seek> {
    writer: W,
    tracks: Vec<TrackState>,
    mdat_pos: u64,
    finalized: bool,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Write the file header and open `mdat`.
    pub fn new(mut writer: W) -> ContainerResult<Self> {
        write_ftyp(&mut writer)?;
        let mdat_pos = begin_large_box(&mut writer, b"mdat")?;
        Ok(Self {
            writer,
            tracks: Vec::new(),
            mdat_pos,
            finalized: false,
        })
    }

    /// Declare a raw RGB24 video track.
    pub fn add_video_track(&mut self, track_id: u32, format: &VideoFormat) -> ContainerResult<()> {
        if format.width == 0 || format.height == 0 || format.width > u16::MAX as u32 || format.height > u16::MAX as u32 {
            return Err(ContainerError::Unsupported(format!(
                "video size {}x{}",
                format.width, format.height
            )));
        }
        self.add_track(track_id, VIDEO_TIMESCALE, TrackSetup::Video(*format))
    }

    /// Declare a 16-bit little-endian PCM audio track.
    pub fn add_audio_track(&mut self, track_id: u32, format: &AudioFormat) -> ContainerResult<()> {
        if format.channels == 0 || format.sample_rate == 0 || format.sample_rate > u16::MAX as u32 {
            return Err(ContainerError::Unsupported(format!(
                "audio format {} Hz x {} channels",
                format.sample_rate, format.channels
            )));
        }
        self.add_track(track_id, format.sample_rate, TrackSetup::Audio(*format))
    }

    fn add_track(&mut self, track_id: u32, timescale: u32, setup: TrackSetup) -> ContainerResult<()> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        if track_id == 0 || self.tracks.iter().any(|t| t.track_id == track_id) {
            return Err(ContainerError::Track(format!("track id {track_id} is invalid or taken")));
        }
        if self.tracks.iter().any(|t| !t.samples.is_empty()) {
            return Err(ContainerError::Track("tracks must be added before samples".into()));
        }
        self.tracks.push(TrackState {
            track_id,
            timescale,
            setup,
            samples: Vec::new(),
        });
        tracing::debug!(track_id, timescale, "Added container track");
        Ok(())
    }

    /// Append one sample at `timestamp_ns` on the session timeline.
    pub fn write_sample(&mut self, track_id: u32, timestamp_ns: u64, data: &[u8]) -> ContainerResult<()> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        let size = u32::try_from(data.len())
            .map_err(|_| ContainerError::Overflow(format!("sample of {} bytes", data.len())))?;

        let track = self.track_mut(track_id)?;
        let dts = ns_to_ticks(timestamp_ns, track.timescale);
        let default_duration = match track.setup {
            TrackSetup::Video(format) => (track.timescale / format.fps.max(1)).max(1),
            TrackSetup::Audio(format) => {
                let frame_bytes = 2 * format.channels as u32;
                (size / frame_bytes).max(1)
            }
        };
        if let Some(last) = track.samples.last() {
            if dts <= last.dts {
                return Err(ContainerError::NonMonotonic {
                    track: track_id,
                    previous: last.dts,
                    current: dts,
                });
            }
        }

        let offset = self.writer.stream_position()?;
        self.writer.write_all(data)?;

        let track = self.track_mut(track_id)?;
        if let Some(last) = track.samples.last_mut() {
            last.duration = u32::try_from(dts - last.dts)
                .map_err(|_| ContainerError::Overflow("sample gap exceeds 32 bits".into()))?;
        }
        track.samples.push(SampleInfo {
            offset,
            size,
            dts,
            duration: default_duration,
        });
        Ok(())
    }

    /// Samples written to a track so far.
    pub fn sample_count(&self, track_id: u32) -> ContainerResult<usize> {
        Ok(self.track(track_id)?.samples.len())
    }

    /// Close `mdat`, write `moov`, flush, and hand back the inner writer.
    pub fn finish(mut self) -> ContainerResult<(W, Vec<WrittenTrack>)> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        end_large_box(&mut self.writer, self.mdat_pos)?;
        write_moov(&mut self.writer, &self.tracks)?;
        self.writer.flush()?;
        self.finalized = true;

        let summary: Vec<WrittenTrack> = self
            .tracks
            .iter()
            .map(|t| WrittenTrack {
                track_id: t.track_id,
                kind: t.kind(),
                sample_count: t.samples.len(),
                duration_secs: t.movie_end() as f64 / MOVIE_TIMESCALE as f64,
            })
            .collect();
        tracing::debug!(tracks = summary.len(), "Container finalized");
        Ok((self.writer, summary))
    }

    fn track(&self, track_id: u32) -> ContainerResult<&TrackState> {
        self.tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .ok_or_else(|| ContainerError::Track(format!("track {track_id} not found")))
    }

    fn track_mut(&mut self, track_id: u32) -> ContainerResult<&mut TrackState> {
        self.tracks
            .iter_mut()
            .find(|t| t.track_id == track_id)
            .ok_or_else(|| ContainerError::Track(format!("track {track_id} not found")))
    }
}

fn write_ftyp<W: Write + Seek>(writer: &mut W) -> ContainerResult<()> {
    let pos = begin_box(writer, b"ftyp")?;
    writer.write_all(b"qt  ")?;
    writer.write_u32::<BigEndian>(0x0000_0200)?;
    writer.write_all(b"qt  ")?;
    writer.write_all(b"isom")?;
    end_box(writer, pos)
}

fn write_matrix<W: Write>(writer: &mut W, t: &AffineTransform) -> ContainerResult<()> {
    write_fixed_16_16(writer, t.a)?;
    write_fixed_16_16(writer, t.b)?;
    write_fixed_2_30(writer, 0.0)?;
    write_fixed_16_16(writer, t.c)?;
    write_fixed_16_16(writer, t.d)?;
    write_fixed_2_30(writer, 0.0)?;
    write_fixed_16_16(writer, t.tx)?;
    write_fixed_16_16(writer, t.ty)?;
    write_fixed_2_30(writer, 1.0)
}

fn write_moov<W: Write + Seek>(writer: &mut W, tracks: &[TrackState]) -> ContainerResult<()> {
    let pos = begin_box(writer, b"moov")?;
    let duration = tracks.iter().map(TrackState::movie_end).max().unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
    write_mvhd(writer, duration, next_track_id)?;
    for track in tracks {
        write_trak(writer, track)?;
    }
    end_box(writer, pos)
}

fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: u64, next_track_id: u32) -> ContainerResult<()> {
    let pos = begin_full_box(writer, b"mvhd", 0, 0)?;
    let now = box_creation_time();
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
    writer.write_u32::<BigEndian>(clamp_u32(duration))?;
    write_fixed_16_16(writer, 1.0)?; // rate
    write_fixed_8_8(writer, 1.0)?; // volume
    write_zeros(writer, 10)?;
    write_matrix(writer, &AffineTransform::IDENTITY)?;
    write_zeros(writer, 24)?; // pre_defined
    writer.write_u32::<BigEndian>(next_track_id)?;
    end_box(writer, pos)
}

fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    let pos = begin_box(writer, b"trak")?;
    write_tkhd(writer, track)?;
    if track.first_dts() > 0 {
        write_edts(writer, track)?;
    }
    write_mdia(writer, track)?;
    end_box(writer, pos)
}

fn write_tkhd<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    // track_enabled | track_in_movie
    let pos = begin_full_box(writer, b"tkhd", 0, 0x000003)?;
    let now = box_creation_time();
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(track.track_id)?;
    write_zeros(writer, 4)?;
    writer.write_u32::<BigEndian>(clamp_u32(track.movie_end()))?;
    write_zeros(writer, 8)?;
    writer.write_i16::<BigEndian>(0)?; // layer
    writer.write_i16::<BigEndian>(0)?; // alternate_group
    match track.setup {
        TrackSetup::Video(format) => {
            write_fixed_8_8(writer, 0.0)?;
            write_zeros(writer, 2)?;
            write_matrix(writer, &format.transform)?;
            write_fixed_16_16(writer, format.width as f64)?;
            write_fixed_16_16(writer, format.height as f64)?;
        }
        TrackSetup::Audio(_) => {
            write_fixed_8_8(writer, 1.0)?;
            write_zeros(writer, 2)?;
            write_matrix(writer, &AffineTransform::IDENTITY)?;
            write_zeros(writer, 8)?;
        }
    }
    end_box(writer, pos)
}

/// Empty edit covering the gap before the track's first sample, then the
/// whole media.
fn write_edts<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    let pos = begin_box(writer, b"edts")?;
    let elst = begin_full_box(writer, b"elst", 0, 0)?;
    writer.write_u32::<BigEndian>(2)?;

    let gap = rescale(track.first_dts(), track.timescale, MOVIE_TIMESCALE);
    writer.write_u32::<BigEndian>(clamp_u32(gap))?;
    writer.write_i32::<BigEndian>(-1)?;
    writer.write_i16::<BigEndian>(1)?;
    writer.write_i16::<BigEndian>(0)?;

    let media = rescale(track.media_duration(), track.timescale, MOVIE_TIMESCALE);
    writer.write_u32::<BigEndian>(clamp_u32(media))?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i16::<BigEndian>(1)?;
    writer.write_i16::<BigEndian>(0)?;

    end_box(writer, elst)?;
    end_box(writer, pos)
}

fn write_mdia<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    let pos = begin_box(writer, b"mdia")?;

    let mdhd = begin_full_box(writer, b"mdhd", 0, 0)?;
    let now = box_creation_time();
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(now)?;
    writer.write_u32::<BigEndian>(track.timescale)?;
    writer.write_u32::<BigEndian>(clamp_u32(track.media_duration()))?;
    writer.write_u16::<BigEndian>(encode_language("und"))?;
    writer.write_u16::<BigEndian>(0)?;
    end_box(writer, mdhd)?;

    let (handler, name): (&[u8; 4], &str) = match track.setup {
        TrackSetup::Video(_) => (b"vide", "VideoHandler"),
        TrackSetup::Audio(_) => (b"soun", "SoundHandler"),
    };
    let hdlr = begin_full_box(writer, b"hdlr", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_all(handler)?;
    write_zeros(writer, 12)?;
    writer.write_all(name.as_bytes())?;
    writer.write_u8(0)?;
    end_box(writer, hdlr)?;

    write_minf(writer, track)?;
    end_box(writer, pos)
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    let pos = begin_box(writer, b"minf")?;
    match track.setup {
        TrackSetup::Video(_) => {
            let vmhd = begin_full_box(writer, b"vmhd", 0, 1)?;
            write_zeros(writer, 8)?; // graphicsmode + opcolor
            end_box(writer, vmhd)?;
        }
        TrackSetup::Audio(_) => {
            let smhd = begin_full_box(writer, b"smhd", 0, 0)?;
            write_zeros(writer, 4)?; // balance + reserved
            end_box(writer, smhd)?;
        }
    }

    let dinf = begin_box(writer, b"dinf")?;
    let dref = begin_full_box(writer, b"dref", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?;
    let url = begin_full_box(writer, b"url ", 0, 1)?; // self-contained
    end_box(writer, url)?;
    end_box(writer, dref)?;
    end_box(writer, dinf)?;

    write_stbl(writer, track)?;
    end_box(writer, pos)
}

fn write_stbl<W: Write + Seek>(writer: &mut W, track: &TrackState) -> ContainerResult<()> {
    let pos = begin_box(writer, b"stbl")?;
    write_stsd(writer, &track.setup)?;

    // stts: run-length encoded durations
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for sample in &track.samples {
        match runs.last_mut() {
            Some((count, delta)) if *delta == sample.duration => *count += 1,
            _ => runs.push((1, sample.duration)),
        }
    }
    let stts = begin_full_box(writer, b"stts", 0, 0)?;
    writer.write_u32::<BigEndian>(runs.len() as u32)?;
    for (count, delta) in runs {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_u32::<BigEndian>(delta)?;
    }
    end_box(writer, stts)?;

    // stsc: one sample per chunk
    let stsc = begin_full_box(writer, b"stsc", 0, 0)?;
    if track.samples.is_empty() {
        writer.write_u32::<BigEndian>(0)?;
    } else {
        writer.write_u32::<BigEndian>(1)?;
        writer.write_u32::<BigEndian>(1)?;
        writer.write_u32::<BigEndian>(1)?;
        writer.write_u32::<BigEndian>(1)?;
    }
    end_box(writer, stsc)?;

    let stsz = begin_full_box(writer, b"stsz", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(track.samples.len() as u32)?;
    for sample in &track.samples {
        writer.write_u32::<BigEndian>(sample.size)?;
    }
    end_box(writer, stsz)?;

    if track.samples.iter().any(|s| s.offset > u32::MAX as u64) {
        let co64 = begin_full_box(writer, b"co64", 0, 0)?;
        writer.write_u32::<BigEndian>(track.samples.len() as u32)?;
        for sample in &track.samples {
            writer.write_u64::<BigEndian>(sample.offset)?;
        }
        end_box(writer, co64)?;
    } else {
        let stco = begin_full_box(writer, b"stco", 0, 0)?;
        writer.write_u32::<BigEndian>(track.samples.len() as u32)?;
        for sample in &track.samples {
            writer.write_u32::<BigEndian>(sample.offset as u32)?;
        }
        end_box(writer, stco)?;
    }

    end_box(writer, pos)
}

fn write_stsd<W: Write + Seek>(writer: &mut W, setup: &TrackSetup) -> ContainerResult<()> {
    let pos = begin_full_box(writer, b"stsd", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?;
    match setup {
        TrackSetup::Video(format) => {
            let entry = begin_box(writer, b"raw ")?;
            write_zeros(writer, 6)?;
            writer.write_u16::<BigEndian>(1)?; // data_reference_index
            write_zeros(writer, 16)?; // version, revision, vendor, quality
            writer.write_u16::<BigEndian>(format.width as u16)?;
            writer.write_u16::<BigEndian>(format.height as u16)?;
            write_fixed_16_16(writer, 72.0)?;
            write_fixed_16_16(writer, 72.0)?;
            writer.write_u32::<BigEndian>(0)?; // data size
            writer.write_u16::<BigEndian>(1)?; // frames per sample
            let name = b"RGB24";
            writer.write_u8(name.len() as u8)?;
            writer.write_all(name)?;
            write_zeros(writer, 31 - name.len())?;
            writer.write_u16::<BigEndian>(24)?; // depth
            writer.write_i16::<BigEndian>(-1)?; // color table id
            end_box(writer, entry)?;
        }
        TrackSetup::Audio(format) => {
            let entry = begin_box(writer, b"sowt")?;
            write_zeros(writer, 6)?;
            writer.write_u16::<BigEndian>(1)?; // data_reference_index
            writer.write_u16::<BigEndian>(0)?; // version
            writer.write_u16::<BigEndian>(0)?; // revision
            writer.write_u32::<BigEndian>(0)?; // vendor
            writer.write_u16::<BigEndian>(format.channels)?;
            writer.write_u16::<BigEndian>(16)?; // sample size
            writer.write_i16::<BigEndian>(0)?; // compression id
            writer.write_u16::<BigEndian>(0)?; // packet size
            writer.write_u32::<BigEndian>(format.sample_rate << 16)?;
            end_box(writer, entry)?;
        }
    }
    end_box(writer, pos)
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn video_format() -> VideoFormat {
        VideoFormat {
            width: 4,
            height: 2,
            fps: 30,
            transform: AffineTransform::IDENTITY,
        }
    }

    #[test]
    fn header_starts_with_ftyp_then_mdat() {
        let writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        let (cursor, tracks) = writer.finish().unwrap();
        assert!(tracks.is_empty());
        let buf = cursor.into_inner();
        assert_eq!(&buf[4..8], b"ftyp");
        assert_eq!(&buf[8..12], b"qt  ");
        assert_eq!(&buf[28..32], b"mdat");
    }

    #[test]
    fn rejects_duplicate_and_late_tracks() {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(1, &video_format()).unwrap();
        assert!(matches!(
            writer.add_video_track(1, &video_format()),
            Err(ContainerError::Track(_))
        ));
        writer.write_sample(1, 0, &[0; 24]).unwrap();
        let audio = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
        };
        assert!(writer.add_audio_track(2, &audio).is_err());
    }

    #[test]
    fn rejects_repeated_timestamps() {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(1, &video_format()).unwrap();
        writer.write_sample(1, 1_000_000, &[0; 24]).unwrap();
        let err = writer.write_sample(1, 1_000_000, &[0; 24]).unwrap_err();
        assert!(matches!(err, ContainerError::NonMonotonic { track: 1, .. }));
        assert_eq!(writer.sample_count(1).unwrap(), 1);
    }

    #[test]
    fn unknown_track_is_an_error() {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        assert!(matches!(
            writer.write_sample(9, 0, &[1]),
            Err(ContainerError::Track(_))
        ));
    }

    #[test]
    fn summary_reports_counts_and_duration() {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(1, &video_format()).unwrap();
        for i in 0..30u64 {
            writer.write_sample(1, i * 33_333_333, &[0; 24]).unwrap();
        }
        let (_, tracks) = writer.finish().unwrap();
        assert_eq!(tracks[0].sample_count, 30);
        assert!((tracks[0].duration_secs - 1.0).abs() < 0.002);
    }
}
