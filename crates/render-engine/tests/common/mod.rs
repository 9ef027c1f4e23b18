//! Clip fixtures shared by the render-engine integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use duet_container::ContainerWriter;
use duet_media_model::geometry::AffineTransform;
use duet_media_model::sample::{AudioFormat, VideoFormat, AUDIO_TRACK, VIDEO_TRACK};

/// A synthetic recording: solid-colour frames and constant-level audio,
/// one audio chunk per video frame period.
#[derive(Debug, Clone, Copy)]
pub struct Clip {
    /// `None` writes an audio-only file.
    pub video: Option<(u32, u32)>,
    pub color: [u8; 3],
    pub transform: AffineTransform,
    pub fps: u32,
    pub frames: u32,
    pub audio: Option<AudioFormat>,
    pub level: i16,
}

impl Clip {
    pub fn video(width: u32, height: u32, fps: u32, frames: u32) -> Self {
        Self {
            video: Some((width, height)),
            color: [200, 30, 30],
            transform: AffineTransform::IDENTITY,
            fps,
            frames,
            audio: None,
            level: 1_000,
        }
    }

    pub fn audio_only(fps: u32, frames: u32, rate: u32) -> Self {
        Self {
            video: None,
            audio: Some(mono(rate)),
            ..Self::video(0, 0, fps, frames)
        }
    }

    pub fn color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn transform(mut self, transform: AffineTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_audio(mut self, rate: u32) -> Self {
        self.audio = Some(mono(rate));
        self
    }

    pub fn write(&self, path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = ContainerWriter::new(BufWriter::new(file)).unwrap();
        if let Some((width, height)) = self.video {
            writer
                .add_video_track(
                    VIDEO_TRACK,
                    &VideoFormat {
                        width,
                        height,
                        fps: self.fps,
                        transform: self.transform,
                    },
                )
                .unwrap();
        }
        if let Some(audio) = &self.audio {
            writer.add_audio_track(AUDIO_TRACK, audio).unwrap();
        }

        let frame_ns = 1_000_000_000 / self.fps as u64;
        let pixels = self.video.map(|(width, height)| {
            self.color
                .iter()
                .copied()
                .cycle()
                .take(width as usize * height as usize * 3)
                .collect::<Vec<u8>>()
        });
        let pcm = self.audio.map(|audio| {
            let frames = (audio.sample_rate / self.fps) as usize * audio.channels as usize;
            std::iter::repeat(self.level)
                .take(frames)
                .flat_map(i16::to_le_bytes)
                .collect::<Vec<u8>>()
        });

        for i in 0..self.frames as u64 {
            if let Some(pixels) = &pixels {
                writer.write_sample(VIDEO_TRACK, i * frame_ns, pixels).unwrap();
            }
            if let Some(pcm) = &pcm {
                writer.write_sample(AUDIO_TRACK, i * frame_ns, pcm).unwrap();
            }
        }
        let (out, _) = writer.finish().unwrap();
        out.into_inner().unwrap();
    }
}

pub fn mono(rate: u32) -> AudioFormat {
    AudioFormat {
        sample_rate: rate,
        channels: 1,
    }
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("duet_render_{name}_{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
