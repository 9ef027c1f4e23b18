//! Voice recorder: audio-only capture to its own file.
//!
//! Microphone input of any rate and channel count is downmixed and
//! resampled to a fixed speech profile (mono, 16-bit, 12 kHz by default)
//! and written through a [`MediaWriter`] with a single audio track.
//!
//! With [`FileNaming::Overwrite`] every recording lands on the same path and
//! replaces the previous one; callers that want to keep a take must move it
//! before the next start.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use duet_common::clock::NANOS_PER_SEC;
use duet_common::config::{FileNaming, VoiceRecorderConfig};
use duet_common::error::{DuetError, DuetResult};
use duet_common::paths::timestamped_path;
use duet_media_model::pcm::{downmix_to_mono, to_i16, LinearResampler};
use duet_media_model::sample::{AudioBuffer, AudioFormat, MediaSample, AUDIO_TRACK};

use crate::source::{SampleSink, SampleSource};
use crate::writer::{MediaWriter, WriterConfig};

const VOICE_BUFFER_DEPTH: usize = 64;

/// Converts device buffers into the speech format with continuous timestamps.
struct SpeechConverter {
    format: AudioFormat,
    resampler: Option<(u32, LinearResampler)>,
    base_ns: Option<u64>,
    emitted: u64,
}

impl SpeechConverter {
    fn new(format: AudioFormat) -> Self {
        Self {
            format,
            resampler: None,
            base_ns: None,
            emitted: 0,
        }
    }

    fn convert(&mut self, input: &AudioBuffer) -> Option<AudioBuffer> {
        let in_rate = input.format().sample_rate;
        let out_rate = self.format.sample_rate;
        let current = matches!(&self.resampler, Some((rate, _)) if *rate == in_rate);
        if !current {
            if self.resampler.is_some() {
                tracing::warn!(in_rate, "Microphone rate changed mid-recording");
            }
            self.resampler = Some((in_rate, LinearResampler::new(in_rate, out_rate)));
        }
        let (_, resampler) = self.resampler.as_mut()?;

        let mono = downmix_to_mono(input.pcm(), input.format().channels);
        let out = resampler.process(&mono);
        if out.is_empty() {
            return None;
        }

        let base = *self.base_ns.get_or_insert(input.timestamp_ns());
        let timestamp_ns = base + self.emitted * NANOS_PER_SEC / out_rate as u64;
        self.emitted += out.len() as u64;
        let pcm = out.into_iter().map(to_i16).collect();
        AudioBuffer::new(AUDIO_TRACK, timestamp_ns, self.format, pcm).ok()
    }
}

struct ActiveVoice {
    path: PathBuf,
    writer: Arc<MediaWriter>,
}

/// Records microphone audio to a file, one recording at a time.
pub struct AudioRecorder {
    source: Box<dyn SampleSource>,
    config: VoiceRecorderConfig,
    active: Option<ActiveVoice>,
    last_path: Option<PathBuf>,
}

impl AudioRecorder {
    pub fn new(source: Box<dyn SampleSource>, config: VoiceRecorderConfig) -> Self {
        Self {
            source,
            config,
            active: None,
            last_path: None,
        }
    }

    /// Output format: mono 16-bit PCM at the configured rate.
    pub fn speech_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.config.sample_rate,
            channels: 1,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// The fixed output path used with [`FileNaming::Overwrite`].
    pub fn fixed_path(&self) -> PathBuf {
        self.config.directory.join(&self.config.file_name)
    }

    fn next_path(&self) -> DuetResult<PathBuf> {
        match self.config.naming {
            FileNaming::Overwrite => {
                std::fs::create_dir_all(&self.config.directory)
                    .map_err(|e| DuetError::storage(e.to_string()))?;
                Ok(self.fixed_path())
            }
            FileNaming::Unique => {
                let name = Path::new(&self.config.file_name);
                let stem = name
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "recording".to_string());
                let extension = name
                    .extension()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "mov".to_string());
                timestamped_path(&self.config.directory, &stem, &extension)
                    .map_err(|e| DuetError::storage(e.to_string()))
            }
        }
    }

    /// Start recording the microphone.
    pub fn start_recording(&mut self) -> DuetResult<PathBuf> {
        if self.active.is_some() {
            return Err(DuetError::AlreadyRecording);
        }
        if self.source.format().audio.is_none() {
            return Err(DuetError::device_unavailable(format!(
                "{} has no microphone",
                self.source.name()
            )));
        }

        let path = self.next_path()?;
        let format = self.speech_format();
        let writer = Arc::new(MediaWriter::new(
            path.clone(),
            WriterConfig {
                video: None,
                audio: Some(format),
                max_buffered_samples: VOICE_BUFFER_DEPTH,
            },
        ));
        writer.start()?;

        let converter = Mutex::new(SpeechConverter::new(format));
        let sink_writer = Arc::clone(&writer);
        let sink: SampleSink = Arc::new(move |sample: MediaSample| {
            let MediaSample::Audio(buffer) = sample else {
                return;
            };
            let converted = match converter.lock() {
                Ok(mut converter) => converter.convert(&buffer),
                Err(_) => None,
            };
            let Some(converted) = converted else {
                return;
            };
            if let Err(err) = sink_writer.accept(converted.into()) {
                if err.is_fatal_to_session() {
                    sink_writer.abort(err);
                }
            }
        });

        if let Err(err) = self.source.start(sink) {
            writer.abort(err.clone());
            return Err(err);
        }

        tracing::info!(
            path = %path.display(),
            sample_rate = format.sample_rate,
            naming = ?self.config.naming,
            "Voice recording started"
        );
        self.last_path = Some(path.clone());
        self.active = Some(ActiveVoice { path: path.clone(), writer });
        Ok(path)
    }

    /// Stop recording, release the microphone and return the file.
    ///
    /// When nothing is recording this returns the previous recording's path
    /// (or the fixed path if there never was one) without error; the file
    /// there may be stale or missing.
    pub async fn finish_recording(&mut self) -> DuetResult<PathBuf> {
        let Some(active) = self.active.take() else {
            let path = self.last_path.clone().unwrap_or_else(|| self.fixed_path());
            tracing::debug!(path = %path.display(), "finish_recording while idle");
            return Ok(path);
        };

        if let Err(err) = self.source.stop() {
            tracing::warn!(error = %err, "Microphone did not stop cleanly");
        }
        let writer = Arc::clone(&active.writer);
        let file = tokio::task::spawn_blocking(move || writer.finalize())
            .await
            .unwrap_or_else(|e| Err(DuetError::storage(format!("finalize task failed: {e}"))))?;
        tracing::info!(
            path = %active.path.display(),
            duration_secs = file.duration_secs,
            "Voice recording finished"
        );
        Ok(file.path)
    }

    /// Give the source back, abandoning any active recording.
    pub fn into_source(mut self) -> Box<dyn SampleSource> {
        if let Some(active) = self.active.take() {
            let _ = self.source.stop();
            active.writer.abort(DuetError::Cancelled);
        }
        self.source
    }
}
