//! Media writer: turns a live sample stream into a finished container file.
//!
//! [`MediaWriter::accept`] validates, re-bases and enqueues a sample and
//! returns immediately; a dedicated `media-writer` thread interleaves the
//! queued samples by timestamp and writes them. [`MediaWriter::finalize`]
//! drains the queue, writes the index and waits for the thread; it is the
//! only call that blocks.
//!
//! ```text
//! Idle --start--> Recording --finalize--> Finalizing --> Closed
//!                     \                        \
//!                      `--fatal error/abort-----`--> Failed (file deleted)
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;

use serde::Serialize;

use duet_common::clock::{DriftMeasurement, SessionTimebase};
use duet_common::error::{DuetError, DuetResult};
use duet_common::paths::remove_partial;
use duet_container::atoms::{ns_to_ticks, VIDEO_TIMESCALE};
use duet_container::{ContainerError, ContainerWriter};
use duet_media_model::sample::{
    AudioFormat, MediaSample, TrackKind, VideoFormat, AUDIO_TRACK, VIDEO_TRACK,
};

/// Drift between the last video and audio timestamps worth a warning.
const DRIFT_WARN_MS: f64 = 100.0;

/// Tracks the writer creates and how far it may buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterConfig {
    pub video: Option<VideoFormat>,
    pub audio: Option<AudioFormat>,
    /// Samples held back while waiting for the slower track.
    pub max_buffered_samples: usize,
}

/// Writer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterState {
    Idle,
    Recording,
    Finalizing,
    Closed,
    Failed,
}

/// What `accept` did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Queued,
    /// Captured before the session origin on a track with nothing written yet.
    BeforeOrigin,
}

/// A finished, readable container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub video_samples: u64,
    pub audio_samples: u64,
}

enum WriterCommand {
    Sample(MediaSample),
    Finalize,
    Abort,
}

#[derive(Debug, Default, Clone, Copy)]
struct TrackProgress {
    last_ns: Option<u64>,
    accepted: u64,
}

struct WriterInner {
    state: WriterState,
    timebase: SessionTimebase,
    tracks: HashMap<u32, TrackProgress>,
    commands: Option<Sender<WriterCommand>>,
    worker: Option<JoinHandle<DuetResult<FinalizedFile>>>,
    /// Why the session failed, if it did.
    error: Option<DuetError>,
    outcome: Option<DuetResult<FinalizedFile>>,
}

/// Muxes one recording session into a file. Shareable across threads.
pub struct MediaWriter {
    path: PathBuf,
    config: WriterConfig,
    inner: Mutex<WriterInner>,
    finalize_lock: Mutex<()>,
    worker_failure: Arc<OnceLock<DuetError>>,
}

impl MediaWriter {
    pub fn new(path: impl Into<PathBuf>, config: WriterConfig) -> Self {
        Self {
            path: path.into(),
            config,
            inner: Mutex::new(WriterInner {
                state: WriterState::Idle,
                timebase: SessionTimebase::new(),
                tracks: HashMap::new(),
                commands: None,
                worker: None,
                error: None,
                outcome: None,
            }),
            finalize_lock: Mutex::new(()),
            worker_failure: Arc::new(OnceLock::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn state(&self) -> WriterState {
        self.lock().state
    }

    /// Samples accepted so far on a track.
    pub fn accepted(&self, track: u32) -> u64 {
        self.lock().tracks.get(&track).map(|t| t.accepted).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the file, declare the tracks and start the writer thread.
    pub fn start(&self) -> DuetResult<()> {
        let mut inner = self.lock();
        if inner.state != WriterState::Idle {
            return Err(DuetError::invalid_state(format!(
                "writer cannot start from {:?}",
                inner.state
            )));
        }
        if self.config.video.is_none() && self.config.audio.is_none() {
            return Err(DuetError::invalid_state("writer needs at least one track"));
        }

        let file = File::create(&self.path).map_err(|e| {
            DuetError::storage(format!("cannot create {}: {e}", self.path.display()))
        })?;
        let mut track_ids = Vec::new();
        let container = ContainerWriter::new(BufWriter::new(file)).and_then(|mut container| {
            if let Some(video) = &self.config.video {
                container.add_video_track(VIDEO_TRACK, video)?;
                track_ids.push(VIDEO_TRACK);
            }
            if let Some(audio) = &self.config.audio {
                container.add_audio_track(AUDIO_TRACK, audio)?;
                track_ids.push(AUDIO_TRACK);
            }
            Ok(container)
        });
        let container = container.map_err(|e| {
            remove_partial(&self.path);
            storage_error(e)
        })?;

        let (tx, rx) = mpsc::channel();
        let worker = WriterWorker {
            path: self.path.clone(),
            container: Some(container),
            interleaver: Interleaver::new(track_ids, self.config.max_buffered_samples),
            failure: Arc::clone(&self.worker_failure),
        };
        let handle = std::thread::Builder::new()
            .name("media-writer".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| {
                remove_partial(&self.path);
                DuetError::storage(format!("failed to spawn writer thread: {e}"))
            })?;

        inner.commands = Some(tx);
        inner.worker = Some(handle);
        inner.state = WriterState::Recording;
        tracing::info!(path = %self.path.display(), "Media writer started");
        Ok(())
    }

    /// Validate, re-base and enqueue one sample. Never blocks on I/O.
    ///
    /// Returns `InvalidState` outside `Recording` or for a sample that does
    /// not match the configured tracks; the session carries on. A timestamp
    /// that does not advance on its track, or an earlier write failure,
    /// fails the session and is returned as the error.
    pub fn accept(&self, sample: MediaSample) -> DuetResult<Disposition> {
        let mut inner = self.lock();
        match inner.state {
            WriterState::Recording => {}
            WriterState::Failed => {
                return Err(inner
                    .error
                    .clone()
                    .unwrap_or_else(|| DuetError::invalid_state("writer has failed")))
            }
            state => {
                return Err(DuetError::invalid_state(format!(
                    "cannot accept samples while {state:?}"
                )))
            }
        }
        if let Some(err) = self.worker_failure.get() {
            let err = err.clone();
            fail_locked(&mut inner, err.clone());
            return Err(err);
        }

        let timescale = self.validate(&sample)?;
        let track = sample.track_id();
        let source_ns = sample.timestamp_ns();
        let previous = inner.tracks.get(&track).and_then(|t| t.last_ns);
        // a track that already wrote a sample cannot go back past the origin
        if previous.is_none() && inner.timebase.precedes_origin(source_ns) {
            tracing::debug!(track, source_ns, "Dropping sample captured before origin");
            return Ok(Disposition::BeforeOrigin);
        }

        let rebased = inner.timebase.rebase(source_ns);
        if let Some(previous) = previous {
            if ns_to_ticks(rebased, timescale) <= ns_to_ticks(previous, timescale) {
                let err = DuetError::NonMonotonicSample {
                    track,
                    previous_ns: previous,
                    timestamp_ns: rebased,
                };
                tracing::error!(track, previous, rebased, "Non-monotonic sample, failing session");
                fail_locked(&mut inner, err.clone());
                return Err(err);
            }
        }
        let progress = inner.tracks.entry(track).or_default();
        progress.last_ns = Some(rebased);
        progress.accepted += 1;

        let sent = inner
            .commands
            .as_ref()
            .map(|tx| tx.send(WriterCommand::Sample(sample.retimed(rebased))).is_ok())
            .unwrap_or(false);
        if !sent {
            let err = self
                .worker_failure
                .get()
                .cloned()
                .unwrap_or_else(|| DuetError::storage("writer thread exited"));
            fail_locked(&mut inner, err.clone());
            return Err(err);
        }
        Ok(Disposition::Queued)
    }

    /// Check a sample against the configured tracks; returns its timescale.
    fn validate(&self, sample: &MediaSample) -> DuetResult<u32> {
        match sample {
            MediaSample::Video(frame) => {
                let format = self
                    .config
                    .video
                    .ok_or_else(|| DuetError::invalid_state("writer has no video track"))?;
                if frame.track() != VIDEO_TRACK {
                    return Err(DuetError::invalid_state(format!(
                        "video sample on track {}",
                        frame.track()
                    )));
                }
                if frame.width() != format.width || frame.height() != format.height {
                    return Err(DuetError::invalid_state(format!(
                        "frame is {}x{}, track is {}x{}",
                        frame.width(),
                        frame.height(),
                        format.width,
                        format.height
                    )));
                }
                Ok(VIDEO_TIMESCALE)
            }
            MediaSample::Audio(buffer) => {
                let format = self
                    .config
                    .audio
                    .ok_or_else(|| DuetError::invalid_state("writer has no audio track"))?;
                if buffer.track() != AUDIO_TRACK {
                    return Err(DuetError::invalid_state(format!(
                        "audio sample on track {}",
                        buffer.track()
                    )));
                }
                if buffer.format() != format {
                    return Err(DuetError::invalid_state(format!(
                        "audio is {:?}, track is {:?}",
                        buffer.format(),
                        format
                    )));
                }
                if buffer.frames() == 0 {
                    return Err(DuetError::invalid_state("empty audio buffer"));
                }
                Ok(format.sample_rate)
            }
        }
    }

    /// Flush, write the index and close the file. Idempotent: later calls
    /// return the first call's outcome.
    pub fn finalize(&self) -> DuetResult<FinalizedFile> {
        let _serial = self
            .finalize_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let worker = {
            let mut inner = self.lock();
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            match inner.state {
                WriterState::Idle => {
                    return Err(DuetError::invalid_state("writer was never started"));
                }
                WriterState::Recording => {
                    inner.state = WriterState::Finalizing;
                    if let Some(tx) = inner.commands.take() {
                        let _ = tx.send(WriterCommand::Finalize);
                    }
                }
                _ => {}
            }
            inner.worker.take()
        };

        let result = match worker {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(DuetError::storage("writer thread panicked"))),
            None => Err(DuetError::invalid_state("writer thread already collected")),
        };

        let mut inner = self.lock();
        let outcome = match inner.error.clone() {
            Some(err) => Err(err),
            None => result,
        };
        match &outcome {
            Ok(file) => {
                inner.state = WriterState::Closed;
                log_drift(&inner.tracks);
                tracing::info!(
                    path = %file.path.display(),
                    duration_secs = file.duration_secs,
                    video_samples = file.video_samples,
                    audio_samples = file.audio_samples,
                    "Recording finalized"
                );
            }
            Err(err) => {
                inner.state = WriterState::Failed;
                inner.error.get_or_insert_with(|| err.clone());
                tracing::warn!(error = %err, "Recording failed");
            }
        }
        inner.outcome = Some(outcome.clone());
        outcome
    }

    /// Tear the session down: stop writing and delete the file.
    pub fn abort(&self, error: DuetError) {
        {
            let mut inner = self.lock();
            if inner.outcome.is_some() {
                return;
            }
            if matches!(inner.state, WriterState::Idle | WriterState::Recording) {
                tracing::warn!(error = %error, "Aborting recording");
                fail_locked(&mut inner, error);
            }
        }
        let _ = self.finalize();
    }
}

impl Drop for MediaWriter {
    fn drop(&mut self) {
        let unfinished = {
            let inner = self.lock();
            inner.outcome.is_none() && inner.state != WriterState::Idle
        };
        if unfinished {
            self.abort(DuetError::Cancelled);
        }
    }
}

fn fail_locked(inner: &mut WriterInner, error: DuetError) {
    inner.state = WriterState::Failed;
    inner.error.get_or_insert(error);
    if let Some(tx) = inner.commands.take() {
        let _ = tx.send(WriterCommand::Abort);
    }
}

fn log_drift(tracks: &HashMap<u32, TrackProgress>) {
    let video = tracks.get(&VIDEO_TRACK).and_then(|t| t.last_ns);
    let audio = tracks.get(&AUDIO_TRACK).and_then(|t| t.last_ns);
    if let (Some(reference_ns), Some(measured_ns)) = (video, audio) {
        let drift = DriftMeasurement {
            reference_ns,
            measured_ns,
        };
        if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
            tracing::warn!(drift_ms = drift.drift_ms(), "Audio/video end drift");
        } else {
            tracing::debug!(drift_ms = drift.drift_ms(), "Audio/video end drift");
        }
    }
}

fn storage_error(err: ContainerError) -> DuetError {
    match err {
        ContainerError::Io(e) => DuetError::storage(e.to_string()),
        other => DuetError::storage(other.to_string()),
    }
}

/// A queued sample ordered by (timestamp, arrival).
struct Pending {
    timestamp_ns: u64,
    seq: u64,
    sample: MediaSample,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_ns == other.timestamp_ns && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp_ns, self.seq).cmp(&(other.timestamp_ns, other.seq))
    }
}

/// K-way interleave of per-track ordered streams.
///
/// A sample is released once every track has delivered something at or
/// past its timestamp, so output never goes backwards across tracks. When a
/// track stalls, the buffer limit forces the oldest sample out.
struct Interleaver {
    heap: BinaryHeap<Reverse<Pending>>,
    watermarks: HashMap<u32, u64>,
    tracks: Vec<u32>,
    limit: usize,
    seq: u64,
}

impl Interleaver {
    fn new(tracks: Vec<u32>, limit: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            watermarks: HashMap::new(),
            tracks,
            limit: limit.max(1),
            seq: 0,
        }
    }

    fn push(&mut self, sample: MediaSample) {
        let timestamp_ns = sample.timestamp_ns();
        self.watermarks.insert(sample.track_id(), timestamp_ns);
        self.heap.push(Reverse(Pending {
            timestamp_ns,
            seq: self.seq,
            sample,
        }));
        self.seq += 1;
    }

    fn low_watermark(&self) -> Option<u64> {
        self.tracks
            .iter()
            .map(|t| self.watermarks.get(t).copied())
            .collect::<Option<Vec<u64>>>()
            .and_then(|marks| marks.into_iter().min())
    }

    /// Next sample that can be written without breaking order.
    fn pop_ready(&mut self) -> Option<MediaSample> {
        let head = self.heap.peek()?.0.timestamp_ns;
        let ready = self.low_watermark().map(|low| head <= low).unwrap_or(false)
            || self.heap.len() > self.limit;
        if ready {
            self.heap.pop().map(|Reverse(p)| p.sample)
        } else {
            None
        }
    }

    fn pop_any(&mut self) -> Option<MediaSample> {
        self.heap.pop().map(|Reverse(p)| p.sample)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

struct WriterWorker {
    path: PathBuf,
    container: Option<ContainerWriter<BufWriter<File>>>,
    interleaver: Interleaver,
    failure: Arc<OnceLock<DuetError>>,
}

impl WriterWorker {
    fn run(mut self, commands: Receiver<WriterCommand>) -> DuetResult<FinalizedFile> {
        let mut finalize = false;
        for command in commands.iter() {
            match command {
                WriterCommand::Sample(sample) => {
                    if self.container.is_none() {
                        continue;
                    }
                    self.interleaver.push(sample);
                    while let Some(ready) = self.interleaver.pop_ready() {
                        if let Err(err) = self.write(&ready) {
                            self.fail(err);
                            break;
                        }
                    }
                }
                WriterCommand::Finalize => {
                    finalize = true;
                    break;
                }
                WriterCommand::Abort => break,
            }
        }

        if let Some(err) = self.failure.get() {
            return Err(err.clone());
        }
        if !finalize {
            self.discard();
            return Err(DuetError::Cancelled);
        }

        tracing::debug!(pending = self.interleaver.len(), "Draining writer queue");
        while let Some(sample) = self.interleaver.pop_any() {
            if let Err(err) = self.write(&sample) {
                self.fail(err.clone());
                return Err(err);
            }
        }
        match self.finish() {
            Ok(file) => Ok(file),
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn write(&mut self, sample: &MediaSample) -> DuetResult<()> {
        let container = self
            .container
            .as_mut()
            .ok_or_else(|| DuetError::invalid_state("container already closed"))?;
        let result = match sample {
            MediaSample::Video(frame) => {
                container.write_sample(frame.track(), frame.timestamp_ns(), frame.pixels())
            }
            MediaSample::Audio(buffer) => {
                container.write_sample(buffer.track(), buffer.timestamp_ns(), &buffer.to_le_bytes())
            }
        };
        result.map_err(storage_error)
    }

    fn finish(&mut self) -> DuetResult<FinalizedFile> {
        let container = self
            .container
            .take()
            .ok_or_else(|| DuetError::invalid_state("container already closed"))?;
        let (buffered, tracks) = container.finish().map_err(storage_error)?;
        let file = buffered
            .into_inner()
            .map_err(|e| DuetError::storage(format!("flush failed: {}", e.error())))?;
        file.sync_all()
            .map_err(|e| DuetError::storage(format!("sync failed: {e}")))?;
        // the file must still be reachable where callers will look for it
        std::fs::metadata(&self.path).map_err(|e| {
            DuetError::storage(format!("{} is no longer readable: {e}", self.path.display()))
        })?;

        let count = |kind: TrackKind| -> u64 {
            tracks
                .iter()
                .filter(|t| t.kind == kind)
                .map(|t| t.sample_count as u64)
                .sum()
        };
        Ok(FinalizedFile {
            path: self.path.clone(),
            duration_secs: tracks.iter().map(|t| t.duration_secs).fold(0.0, f64::max),
            video_samples: count(TrackKind::Video),
            audio_samples: count(TrackKind::Audio),
        })
    }

    fn fail(&mut self, err: DuetError) {
        tracing::error!(error = %err, path = %self.path.display(), "Writer failed");
        let _ = self.failure.set(err);
        self.discard();
    }

    fn discard(&mut self) {
        self.container.take();
        remove_partial(&self.path);
    }
}
