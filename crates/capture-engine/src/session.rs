//! Recording session management.
//!
//! [`CaptureSessionController`] owns one [`SampleSource`] and drives it into
//! a fresh [`MediaWriter`] per recording. Status changes are published on a
//! `watch` channel; each session ends with exactly one completion callback,
//! carrying either the finished file or the error that ended it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use duet_common::config::AppConfig;
use duet_common::error::{DuetError, DuetResult};
use duet_common::paths::timestamped_path;
use duet_media_model::sample::MediaSample;

use crate::source::{SampleSink, SampleSource};
use crate::writer::{Disposition, FinalizedFile, MediaWriter, WriterConfig};

/// Invoked once per session with the finished file or the failure.
pub type CompletionCallback = Arc<dyn Fn(DuetResult<RecordedFile>) + Send + Sync>;

/// Configuration for recording sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory new recordings are created in.
    pub output_dir: PathBuf,

    /// File name prefix before the timestamp.
    pub file_prefix: String,

    /// Writer interleave buffer depth.
    pub max_buffered_samples: usize,
}

impl SessionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            output_dir: config.recordings_dir.clone(),
            file_prefix: config.recording.file_prefix.clone(),
            max_buffered_samples: config.recording.max_buffered_samples,
        }
    }
}

/// Observable controller status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordingStatus {
    Idle,
    Recording { path: PathBuf },
    Finalizing,
    Finished { path: PathBuf },
    Failed { message: String },
}

/// A completed recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedFile {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Samples delivered but not written (after stop, malformed, or
    /// captured before the session origin).
    pub dropped_samples: u64,
}

impl RecordedFile {
    fn from_finalized(file: FinalizedFile, dropped_samples: u64) -> Self {
        Self {
            path: file.path,
            duration_secs: file.duration_secs,
            video_samples: file.video_samples,
            audio_samples: file.audio_samples,
            dropped_samples,
        }
    }
}

/// Exactly-once completion for one session.
struct Completion {
    fired: AtomicBool,
    callback: Option<CompletionCallback>,
    status: Arc<watch::Sender<RecordingStatus>>,
}

impl Completion {
    /// Deliver the outcome unless it was already delivered.
    fn complete(&self, outcome: DuetResult<RecordedFile>) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.status.send_replace(match &outcome {
            Ok(file) => RecordingStatus::Finished {
                path: file.path.clone(),
            },
            Err(err) => RecordingStatus::Failed {
                message: err.to_string(),
            },
        });
        if let Some(callback) = &self.callback {
            callback(outcome);
        }
        true
    }

    fn is_done(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

struct ActiveSession {
    path: PathBuf,
    writer: Arc<MediaWriter>,
    completion: Arc<Completion>,
    dropped: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
}

/// Orchestrates SampleSource → MediaWriter for one recording at a time.
pub struct CaptureSessionController {
    source: Box<dyn SampleSource>,
    config: SessionConfig,
    status: Arc<watch::Sender<RecordingStatus>>,
    on_complete: Option<CompletionCallback>,
    active: Option<ActiveSession>,
}

impl CaptureSessionController {
    /// Take exclusive ownership of a source.
    pub fn new(source: Box<dyn SampleSource>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(RecordingStatus::Idle);
        Self {
            source,
            config,
            status: Arc::new(status),
            on_complete: None,
            active: None,
        }
    }

    /// Register the per-session completion callback.
    pub fn on_complete(&mut self, callback: impl Fn(DuetResult<RecordedFile>) + Send + Sync + 'static) {
        self.on_complete = Some(Arc::new(callback));
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<RecordingStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> RecordingStatus {
        self.status.borrow().clone()
    }

    /// Whether a session is active and has not failed.
    pub fn is_recording(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| !a.completion.is_done())
            .unwrap_or(false)
    }

    /// Output path of the active session.
    pub fn current_path(&self) -> Option<&PathBuf> {
        self.active.as_ref().map(|a| &a.path)
    }

    pub fn source(&self) -> &dyn SampleSource {
        self.source.as_ref()
    }

    /// Give the source back, abandoning any active session.
    pub fn into_source(mut self) -> Box<dyn SampleSource> {
        if let Some(active) = self.active.take() {
            active.stopping.store(true, Ordering::SeqCst);
            let _ = self.source.stop();
            active.writer.abort(DuetError::Cancelled);
            active.completion.complete(Err(DuetError::Cancelled));
        }
        self.source
    }

    /// Start a new recording into a fresh time-stamped file.
    pub async fn start_recording(&mut self) -> DuetResult<PathBuf> {
        self.reap_failed_session();
        if let Some(active) = &self.active {
            tracing::warn!(path = %active.path.display(), "Recording already in progress");
            return Err(DuetError::AlreadyRecording);
        }

        let format = self.source.format();
        if format.video.is_none() && format.audio.is_none() {
            return Err(DuetError::device_unavailable(format!(
                "{} delivers no tracks",
                self.source.name()
            )));
        }

        let path = timestamped_path(&self.config.output_dir, &self.config.file_prefix, "mov")
            .map_err(|e| DuetError::storage(e.to_string()))?;
        let writer = Arc::new(MediaWriter::new(
            path.clone(),
            WriterConfig {
                video: format.video,
                audio: format.audio,
                max_buffered_samples: self.config.max_buffered_samples,
            },
        ));
        writer.start()?;

        let completion = Arc::new(Completion {
            fired: AtomicBool::new(false),
            callback: self.on_complete.clone(),
            status: Arc::clone(&self.status),
        });
        let dropped = Arc::new(AtomicU64::new(0));
        let stopping = Arc::new(AtomicBool::new(false));
        let sink = session_sink(
            Arc::clone(&writer),
            Arc::clone(&completion),
            Arc::clone(&dropped),
            Arc::clone(&stopping),
        );

        if let Err(err) = self.source.start(sink) {
            tracing::error!(source = self.source.name(), error = %err, "Failed to start source");
            writer.abort(err.clone());
            return Err(err);
        }

        tracing::info!(source = self.source.name(), path = %path.display(), "Recording started");
        self.status.send_replace(RecordingStatus::Recording { path: path.clone() });
        self.active = Some(ActiveSession {
            path: path.clone(),
            writer,
            completion,
            dropped,
            stopping,
        });
        Ok(path)
    }

    /// Stop the active recording and finalize its file.
    ///
    /// Returns `Ok(None)` when nothing is recording. Otherwise the completion
    /// callback has fired by the time this returns, and the result is the
    /// same value it received.
    pub async fn stop_recording(&mut self) -> DuetResult<Option<RecordedFile>> {
        let Some(active) = self.active.take() else {
            tracing::debug!("stop_recording with no active session");
            return Ok(None);
        };

        active.stopping.store(true, Ordering::SeqCst);
        if !active.completion.is_done() {
            self.status.send_replace(RecordingStatus::Finalizing);
        }
        if let Err(err) = self.source.stop() {
            tracing::warn!(error = %err, "Source did not stop cleanly");
        }

        let writer = Arc::clone(&active.writer);
        let finalized = tokio::task::spawn_blocking(move || writer.finalize())
            .await
            .unwrap_or_else(|e| Err(DuetError::storage(format!("finalize task failed: {e}"))));

        let dropped = active.dropped.load(Ordering::SeqCst);
        let outcome = finalized.map(|file| RecordedFile::from_finalized(file, dropped));
        if dropped > 0 {
            tracing::info!(dropped, "Samples dropped during session");
        }
        active.completion.complete(outcome.clone());
        outcome.map(Some)
    }

    /// Clear a session that already failed so a new one can start.
    fn reap_failed_session(&mut self) {
        let failed = self
            .active
            .as_ref()
            .map(|a| a.completion.is_done())
            .unwrap_or(false);
        if failed {
            if let Some(active) = self.active.take() {
                active.stopping.store(true, Ordering::SeqCst);
                let _ = self.source.stop();
                tracing::debug!(path = %active.path.display(), "Reaped failed session");
            }
        }
    }
}

/// Build the sink that forwards device samples to the writer.
fn session_sink(
    writer: Arc<MediaWriter>,
    completion: Arc<Completion>,
    dropped: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
) -> SampleSink {
    Arc::new(move |sample: MediaSample| {
        if stopping.load(Ordering::SeqCst) {
            dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match writer.accept(sample) {
            Ok(Disposition::Queued) => {}
            Ok(Disposition::BeforeOrigin) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if !err.is_fatal_to_session() => {
                tracing::debug!(error = %err, "Sample rejected");
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                if !completion.is_done() {
                    writer.abort(err.clone());
                    completion.complete(Err(err));
                }
            }
        }
    })
}
