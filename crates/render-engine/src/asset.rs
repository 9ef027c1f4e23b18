//! Finalized media files opened for composition.
//!
//! A [`VideoAsset`] is the parsed metadata of one container file: tracks,
//! natural size, transform and duration. [`FrameReader`] pulls oriented
//! frames out of its first video track; [`VideoAsset::decode_mono_audio`]
//! flattens its first audio track onto a mono timeline at a given rate.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::RgbImage;

use duet_common::error::{DuetError, DuetResult};
use duet_container::{ContainerError, ContainerReader, TrackInfo};
use duet_media_model::frame::apply_transform;
use duet_media_model::geometry::{displayed_size, AffineTransform, Size};
use duet_media_model::pcm::{downmix_to_mono, LinearResampler};
use duet_media_model::sample::{pcm_from_le_bytes, TrackKind};

use crate::compositor::nearest_sample_index;

/// Metadata of one container file.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    path: PathBuf,
    tracks: Vec<TrackInfo>,
    duration_secs: f64,
}

impl VideoAsset {
    /// Parse a file's container structure. Any failure is `SourceUnreadable`.
    pub fn open(path: impl AsRef<Path>) -> DuetResult<Self> {
        let path = path.as_ref();
        let reader = open_reader(path)?;
        let asset = Self {
            path: path.to_path_buf(),
            tracks: reader.tracks().to_vec(),
            duration_secs: reader.duration_secs(),
        };
        tracing::debug!(
            path = %path.display(),
            tracks = asset.tracks.len(),
            duration_secs = asset.duration_secs,
            "Opened asset"
        );
        Ok(asset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// First video track in file order.
    pub fn video_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    /// First audio track in file order.
    pub fn audio_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.video_track().is_some()
    }

    /// Encoded size of the first video track, or [`Size::ZERO`].
    pub fn natural_size(&self) -> Size {
        match self.video_track() {
            Some(track) if !track.natural_size.is_zero() => track.natural_size,
            Some(track) => Size::from_pixels(track.coded_width, track.coded_height),
            None => Size::ZERO,
        }
    }

    /// Track transform of the first video track.
    pub fn transform(&self) -> AffineTransform {
        self.video_track()
            .map(|t| t.transform)
            .unwrap_or(AffineTransform::IDENTITY)
    }

    /// Natural size with the transform applied to its bounding box.
    pub fn displayed_size(&self) -> Size {
        displayed_size(self.natural_size(), &self.transform())
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn duration_ns(&self) -> u64 {
        (self.duration_secs * 1e9).round() as u64
    }

    /// Open a frame reader on the first video track.
    pub fn frames(&self, fill: [u8; 3]) -> DuetResult<FrameReader> {
        let track = self
            .video_track()
            .cloned()
            .ok_or_else(|| DuetError::NoVideoTrack {
                path: self.path.clone(),
            })?;
        if !track.is_raw_video() {
            return Err(DuetError::source_unreadable(
                &self.path,
                format!("video codec '{}' cannot be decoded", track.codec.trim()),
            ));
        }
        Ok(FrameReader {
            path: self.path.clone(),
            reader: open_reader(&self.path)?,
            track,
            fill,
            cached: None,
        })
    }

    /// First audio track as mono samples at `rate`, starting at t=0.
    ///
    /// A late-starting track is padded with leading silence. Returns `None`
    /// when there is no audio track or it is not 16-bit PCM.
    pub fn decode_mono_audio(&self, rate: u32) -> DuetResult<Option<Vec<f32>>> {
        let Some(track) = self.audio_track().cloned() else {
            return Ok(None);
        };
        let Some(format) = track.audio.filter(|_| track.is_pcm_audio()) else {
            tracing::warn!(
                path = %self.path.display(),
                codec = %track.codec,
                "Audio track is not PCM, ignoring it"
            );
            return Ok(None);
        };

        let mut reader = open_reader(&self.path)?;
        let mut resampler = LinearResampler::new(format.sample_rate, rate);
        let lead = (track.start_ns as u128 * rate as u128 / 1_000_000_000) as usize;
        let mut mono = vec![0.0f32; lead];
        for index in 0..track.samples.len() {
            let bytes = reader
                .read_sample(track.track_id, index)
                .map_err(|e| unreadable(&self.path, e))?;
            let pcm = pcm_from_le_bytes(&bytes);
            mono.extend(resampler.process(&downmix_to_mono(&pcm, format.channels)));
        }
        Ok(Some(mono))
    }
}

/// Sequential access to the oriented frames of one video track.
pub struct FrameReader {
    path: PathBuf,
    reader: ContainerReader<BufReader<File>>,
    track: TrackInfo,
    fill: [u8; 3],
    cached: Option<(usize, RgbImage)>,
}

impl FrameReader {
    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    /// The frame whose timestamp is nearest to `time_ns`, in displayed
    /// orientation.
    pub fn frame_at(&mut self, time_ns: u64) -> DuetResult<Option<&RgbImage>> {
        match nearest_sample_index(&self.track, time_ns) {
            Some(index) => self.frame(index).map(Some),
            None => Ok(None),
        }
    }

    /// Sample `index` in displayed orientation. Repeated requests for the
    /// same sample are served from cache.
    pub fn frame(&mut self, index: usize) -> DuetResult<&RgbImage> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == index);
        if !hit {
            let frame = self.decode(index)?;
            self.cached = Some((index, frame));
        }
        match &self.cached {
            Some((_, frame)) => Ok(frame),
            None => Err(DuetError::invalid_state("frame cache is empty")),
        }
    }

    fn decode(&mut self, index: usize) -> DuetResult<RgbImage> {
        let bytes = self
            .reader
            .read_sample(self.track.track_id, index)
            .map_err(|e| unreadable(&self.path, e))?;
        let frame = RgbImage::from_raw(self.track.coded_width, self.track.coded_height, bytes)
            .ok_or_else(|| {
                let (width, height) = (self.track.coded_width, self.track.coded_height);
                DuetError::source_unreadable(
                    &self.path,
                    format!("sample {index} does not hold a {width}x{height} RGB frame"),
                )
            })?;
        Ok(apply_transform(&frame, &self.track.transform, self.fill))
    }
}

fn open_reader(path: &Path) -> DuetResult<ContainerReader<BufReader<File>>> {
    ContainerReader::open(path).map_err(|e| unreadable(path, e))
}

fn unreadable(path: &Path, err: ContainerError) -> DuetError {
    DuetError::source_unreadable(path, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_unreadable() {
        let err = VideoAsset::open("/nonexistent/duet/asset.mov").unwrap_err();
        assert!(matches!(err, DuetError::SourceUnreadable { .. }));
    }
}
