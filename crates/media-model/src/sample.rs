//! Timestamped media samples produced by capture sources.
//!
//! A [`MediaSample`] is immutable once created. Payloads live behind `Arc`
//! so re-timing a sample (see [`MediaSample::retimed`]) shares the buffer
//! instead of copying it.

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use duet_common::clock::NANOS_PER_SEC;
use duet_common::error::{DuetError, DuetResult};

use crate::frame::rgb_len;
use crate::geometry::AffineTransform;

/// Track id conventionally used for camera video.
pub const VIDEO_TRACK: u32 = 1;

/// Track id conventionally used for microphone audio.
pub const AUDIO_TRACK: u32 = 2;

/// Media type of a track or sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Raw video format: packed RGB24 frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate (used for the last frame's duration).
    pub fps: u32,
    /// Orientation written into the track header.
    pub transform: AffineTransform,
}

/// Raw audio format: interleaved signed 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One RGB24 video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    track: u32,
    timestamp_ns: u64,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl VideoFrame {
    /// Build a frame, validating the buffer length against the dimensions.
    pub fn new(
        track: u32,
        timestamp_ns: u64,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> DuetResult<Self> {
        let expected = rgb_len(width, height);
        if pixels.len() != expected {
            return Err(DuetError::invalid_state(format!(
                "RGB24 frame {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            track,
            timestamp_ns,
            width,
            height,
            pixels: pixels.into(),
        })
    }

    pub fn from_image(track: u32, timestamp_ns: u64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            track,
            timestamp_ns,
            width,
            height,
            pixels: image.into_raw().into(),
        }
    }

    pub fn track(&self) -> u32 {
        self.track
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy into an owned image buffer.
    pub fn to_image(&self) -> RgbImage {
        // Length is validated at construction.
        RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

/// A buffer of interleaved PCM frames.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    track: u32,
    timestamp_ns: u64,
    format: AudioFormat,
    pcm: Arc<[i16]>,
}

impl AudioBuffer {
    /// Build a buffer; `pcm.len()` must be a multiple of the channel count.
    pub fn new(track: u32, timestamp_ns: u64, format: AudioFormat, pcm: Vec<i16>) -> DuetResult<Self> {
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(DuetError::invalid_state("audio format needs channels and a sample rate"));
        }
        if pcm.len() % format.channels as usize != 0 {
            return Err(DuetError::invalid_state(format!(
                "{} PCM values do not divide into {} channels",
                pcm.len(),
                format.channels
            )));
        }
        Ok(Self {
            track,
            timestamp_ns,
            format,
            pcm: pcm.into(),
        })
    }

    pub fn track(&self) -> u32 {
        self.track
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn pcm(&self) -> &[i16] {
        &self.pcm
    }

    /// Number of PCM frames (one value per channel each).
    pub fn frames(&self) -> usize {
        self.pcm.len() / self.format.channels as usize
    }

    pub fn duration_ns(&self) -> u64 {
        self.frames() as u64 * NANOS_PER_SEC / self.format.sample_rate as u64
    }

    /// Little-endian byte encoding as stored in `sowt` tracks.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Decode little-endian 16-bit PCM bytes.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// A timestamped sample from a capture source.
#[derive(Debug, Clone)]
pub enum MediaSample {
    Video(VideoFrame),
    Audio(AudioBuffer),
}

impl MediaSample {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn track_id(&self) -> u32 {
        match self {
            Self::Video(frame) => frame.track,
            Self::Audio(buffer) => buffer.track,
        }
    }

    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Self::Video(frame) => frame.timestamp_ns,
            Self::Audio(buffer) => buffer.timestamp_ns,
        }
    }

    /// Payload size in bytes as it will be stored in a container.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Video(frame) => frame.pixels.len(),
            Self::Audio(buffer) => buffer.pcm.len() * 2,
        }
    }

    /// Same payload at a different timestamp.
    pub fn retimed(&self, timestamp_ns: u64) -> Self {
        match self {
            Self::Video(frame) => Self::Video(VideoFrame {
                timestamp_ns,
                ..frame.clone()
            }),
            Self::Audio(buffer) => Self::Audio(AudioBuffer {
                timestamp_ns,
                ..buffer.clone()
            }),
        }
    }
}

impl From<VideoFrame> for MediaSample {
    fn from(frame: VideoFrame) -> Self {
        Self::Video(frame)
    }
}

impl From<AudioBuffer> for MediaSample {
    fn from(buffer: AudioBuffer) -> Self {
        Self::Audio(buffer)
    }
}
