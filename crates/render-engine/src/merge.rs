//! Grid compositor: merges two finalized recordings into one file.
//!
//! A merge runs on the blocking pool (or a dedicated thread outside a tokio
//! runtime) and resolves exactly once, through a [`MergeHandle`] or a
//! completion callback, with the output path or the error that ended it.
//! On any failure, including cancellation, the partial output is deleted.
//!
//! ```text
//! first.mov ──┐                ┌── nearest frame ──┐
//!             ├── probe/layout ┤                   ├── compose ── write ── merged.mov
//! second.mov ─┘                └── mono audio ─ mix┘
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::oneshot;

use duet_common::config::{AudioMixPolicy, CompositorConfig, NoVideoPolicy};
use duet_common::error::{DuetError, DuetResult};
use duet_common::paths::{remove_partial, timestamped_path};
use duet_container::{ContainerError, ContainerWriter};
use duet_media_model::geometry::{AffineTransform, Size};
use duet_media_model::sample::{AudioFormat, VideoFormat, AUDIO_TRACK, VIDEO_TRACK};

use crate::asset::{FrameReader, VideoAsset};
use crate::compositor::{compose_frame, compute_compositions, FrameComposition};
use crate::geometry::VideoGeometryResolver;
use crate::job::CompositionJob;
use crate::layout::GridLayout;
use crate::mixer::{audio_frame_count, mix_tracks, pcm_chunks};

/// Progress callback for merges.
pub type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;

/// Merge progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MergeProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Current stage.
    pub stage: MergeStage,
}

/// Stages of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
}

/// Composites two recordings into a two-cell grid.
pub struct GridCompositor {
    config: CompositorConfig,
    resolver: Arc<VideoGeometryResolver>,
    progress: Option<ProgressCallback>,
}

impl GridCompositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            config,
            resolver: Arc::new(VideoGeometryResolver::new()),
            progress: None,
        }
    }

    /// Share a geometry cache with other components.
    pub fn with_resolver(mut self, resolver: Arc<VideoGeometryResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Report progress for every merge started afterwards.
    pub fn on_progress(&mut self, callback: impl Fn(MergeProgress) + Send + Sync + 'static) {
        self.progress = Some(Arc::new(callback));
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<VideoGeometryResolver> {
        &self.resolver
    }

    /// Merge into a fresh time-stamped file in the configured output
    /// directory.
    pub fn merge(
        &self,
        first: impl Into<PathBuf>,
        second: impl Into<PathBuf>,
        canvas_width: u32,
        canvas_height: u32,
    ) -> MergeHandle {
        let request = MergeRequest {
            inputs: [first.into(), second.into()],
            canvas: (canvas_width, canvas_height),
            output: None,
        };
        self.start_with_handle(request)
    }

    /// Merge into an explicit output path.
    pub fn merge_to(
        &self,
        first: impl Into<PathBuf>,
        second: impl Into<PathBuf>,
        canvas_width: u32,
        canvas_height: u32,
        output: impl Into<PathBuf>,
    ) -> MergeHandle {
        let request = MergeRequest {
            inputs: [first.into(), second.into()],
            canvas: (canvas_width, canvas_height),
            output: Some(output.into()),
        };
        self.start_with_handle(request)
    }

    /// Merge and invoke `on_complete` once with the outcome, on the worker
    /// thread.
    pub fn merge_then(
        &self,
        first: impl Into<PathBuf>,
        second: impl Into<PathBuf>,
        canvas_width: u32,
        canvas_height: u32,
        on_complete: impl FnOnce(DuetResult<PathBuf>) + Send + 'static,
    ) -> CancelHandle {
        let request = MergeRequest {
            inputs: [first.into(), second.into()],
            canvas: (canvas_width, canvas_height),
            output: None,
        };
        let cancel = Arc::new(AtomicBool::new(false));
        self.start(request, Arc::clone(&cancel), Box::new(on_complete));
        CancelHandle { cancel }
    }

    fn start_with_handle(&self, request: MergeRequest) -> MergeHandle {
        let (tx, rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        self.start(
            request,
            Arc::clone(&cancel),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        MergeHandle {
            cancel,
            rx: Some(rx),
        }
    }

    fn start(&self, request: MergeRequest, cancel: Arc<AtomicBool>, deliver: Deliver) {
        let context = RenderContext {
            config: self.config.clone(),
            resolver: Arc::clone(&self.resolver),
            progress: self.progress.clone(),
            cancel,
        };
        let task = move || {
            let outcome = run_request(request, &context);
            deliver(outcome);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(task);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("grid-compositor".to_string())
                    .spawn(task);
                if let Err(err) = spawned {
                    tracing::error!(error = %err, "Failed to spawn compositor thread");
                }
            }
        }
    }
}

type Deliver = Box<dyn FnOnce(DuetResult<PathBuf>) + Send>;

/// Pending result of a merge.
///
/// Dropping the handle before the merge resolves cancels it.
pub struct MergeHandle {
    cancel: Arc<AtomicBool>,
    rx: Option<oneshot::Receiver<DuetResult<PathBuf>>>,
}

impl MergeHandle {
    /// Ask the merge to stop. It resolves with `Cancelled` unless it has
    /// already finished.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// A handle that can cancel the merge while this one is being awaited.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> DuetResult<PathBuf> {
        let outcome = match self.rx.as_mut() {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(DuetError::encoding("merge task ended unexpectedly"))),
            None => Err(DuetError::invalid_state("merge result already taken")),
        };
        self.rx = None;
        outcome
    }

    /// Block the current thread until the outcome arrives. Must not be
    /// called from async code.
    pub fn wait_blocking(mut self) -> DuetResult<PathBuf> {
        match self.rx.take() {
            Some(rx) => rx
                .blocking_recv()
                .unwrap_or_else(|_| Err(DuetError::encoding("merge task ended unexpectedly"))),
            None => Err(DuetError::invalid_state("merge result already taken")),
        }
    }
}

impl Drop for MergeHandle {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.cancel();
        }
    }
}

/// Cancels a merge started with [`GridCompositor::merge_then`].
#[derive(Clone)]
pub struct CancelHandle {
    cancel: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

struct MergeRequest {
    inputs: [PathBuf; 2],
    canvas: (u32, u32),
    output: Option<PathBuf>,
}

struct RenderContext {
    config: CompositorConfig,
    resolver: Arc<VideoGeometryResolver>,
    progress: Option<ProgressCallback>,
    cancel: Arc<AtomicBool>,
}

impl RenderContext {
    fn report(&self, frames_rendered: u64, total_frames: u64, stage: MergeStage) {
        if let Some(callback) = &self.progress {
            let progress = match stage {
                MergeStage::Preparing => 0.0,
                MergeStage::Complete => 1.0,
                _ if total_frames == 0 => 0.0,
                _ => frames_rendered as f64 / total_frames as f64,
            };
            callback(MergeProgress {
                progress,
                frames_rendered,
                total_frames,
                stage,
            });
        }
    }

    fn check_cancelled(&self) -> DuetResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(DuetError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything needed to write the output, gathered before it is created.
struct PreparedMerge {
    layout: GridLayout,
    readers: [Option<FrameReader>; 2],
    plan: Vec<FrameComposition>,
    audio: Option<Vec<f32>>,
    duration_ns: u64,
}

fn run_request(request: MergeRequest, context: &RenderContext) -> DuetResult<PathBuf> {
    let [first, second] = request.inputs;
    let (width, height) = request.canvas;
    // a reserved output belongs to this job from the start; a caller's path
    // only once this job has created it
    let (mut job, mut owns_output) = match request.output {
        Some(output) => (CompositionJob::new(first, second, width, height, output)?, false),
        None => {
            let output = timestamped_path(&context.config.output_dir, "merged", "mov")
                .map_err(|e| DuetError::storage(e.to_string()))?;
            match CompositionJob::new(first, second, width, height, &output) {
                Ok(job) => (job, true),
                Err(err) => {
                    remove_partial(&output);
                    return Err(err);
                }
            }
        }
    };
    job.begin()?;

    let started = Instant::now();
    tracing::info!(
        first = %job.inputs()[0].display(),
        second = %job.inputs()[1].display(),
        output = %job.output().display(),
        width,
        height,
        "Starting merge"
    );

    let outcome = prepare(&job, context)
        .and_then(|prepared| write_output(&job, context, prepared, &mut owns_output));
    if outcome.is_err() && owns_output {
        remove_partial(job.output());
    }
    match outcome {
        Ok(()) => {
            let path = job.complete()?;
            tracing::info!(
                output = %path.display(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Merge finished"
            );
            Ok(path)
        }
        Err(err) => {
            tracing::warn!(output = %job.output().display(), error = %err, "Merge failed");
            Err(job.fail(err))
        }
    }
}

fn prepare(job: &CompositionJob, context: &RenderContext) -> DuetResult<PreparedMerge> {
    context.report(0, 0, MergeStage::Preparing);
    let config = &context.config;
    let [first, second] = job.inputs();
    let assets = [VideoAsset::open(first)?, VideoAsset::open(second)?];

    let mut sizes = [Size::ZERO; 2];
    for (asset, size) in assets.iter().zip(sizes.iter_mut()) {
        if !asset.has_video() {
            match config.no_video {
                NoVideoPolicy::Fail => {
                    return Err(DuetError::NoVideoTrack {
                        path: asset.path().to_path_buf(),
                    })
                }
                NoVideoPolicy::BlankCell => {
                    tracing::warn!(path = %asset.path().display(), "Input has no video, leaving its cell blank");
                    continue;
                }
            }
        }
        *size = context.resolver.resolve(asset.path())?;
    }

    let duration_ns = assets[0].duration_ns().min(assets[1].duration_ns());
    if duration_ns == 0 {
        return Err(DuetError::encoding("inputs share no duration to render"));
    }

    let (width, height) = job.canvas();
    let layout = GridLayout::choose(width, height, sizes[0], sizes[1]);
    tracing::debug!(
        arrangement = ?layout.arrangement,
        coverage = layout.coverage,
        duration_ns,
        "Planned grid"
    );

    let readers = [
        open_frames(&assets[0], config.background)?,
        open_frames(&assets[1], config.background)?,
    ];
    let plan = compute_compositions(
        [
            readers[0].as_ref().map(FrameReader::track),
            readers[1].as_ref().map(FrameReader::track),
        ],
        config.fps,
        duration_ns,
    );

    let audio = mixed_audio(&assets, config, duration_ns)?;
    Ok(PreparedMerge {
        layout,
        readers,
        plan,
        audio,
        duration_ns,
    })
}

fn open_frames(asset: &VideoAsset, background: [u8; 3]) -> DuetResult<Option<FrameReader>> {
    if asset.has_video() {
        asset.frames(background).map(Some)
    } else {
        Ok(None)
    }
}

fn mixed_audio(
    assets: &[VideoAsset; 2],
    config: &CompositorConfig,
    duration_ns: u64,
) -> DuetResult<Option<Vec<f32>>> {
    let (use_first, use_second) = match config.audio {
        AudioMixPolicy::Mix => (true, true),
        AudioMixPolicy::First => (true, false),
        AudioMixPolicy::Second => (false, true),
        AudioMixPolicy::None => (false, false),
    };
    let rate = config.audio_sample_rate;
    let first = if use_first {
        assets[0].decode_mono_audio(rate)?
    } else {
        None
    };
    let second = if use_second {
        assets[1].decode_mono_audio(rate)?
    } else {
        None
    };
    Ok(mix_tracks(
        first.as_deref(),
        second.as_deref(),
        config.audio,
        audio_frame_count(duration_ns, rate),
    ))
}

fn write_output(
    job: &CompositionJob,
    context: &RenderContext,
    prepared: PreparedMerge,
    created: &mut bool,
) -> DuetResult<()> {
    let config = &context.config;
    let PreparedMerge {
        layout,
        readers,
        plan,
        audio,
        duration_ns,
    } = prepared;
    let [mut first, mut second] = readers;
    context.check_cancelled()?;

    let file = File::create(job.output()).map_err(|e| {
        DuetError::encoding(format!("cannot create {}: {e}", job.output().display()))
    })?;
    *created = true;
    let mut container = ContainerWriter::new(BufWriter::new(file)).map_err(encoding_error)?;
    container
        .add_video_track(
            VIDEO_TRACK,
            &VideoFormat {
                width: layout.canvas_width,
                height: layout.canvas_height,
                fps: config.fps,
                transform: AffineTransform::IDENTITY,
            },
        )
        .map_err(encoding_error)?;
    let rate = config.audio_sample_rate;
    if audio.is_some() {
        container
            .add_audio_track(
                AUDIO_TRACK,
                &AudioFormat {
                    sample_rate: rate,
                    channels: 1,
                },
            )
            .map_err(encoding_error)?;
    }

    let chunk_frames = config.audio_chunk_frames as usize;
    let mut chunks = audio
        .as_deref()
        .map(|samples| pcm_chunks(samples, chunk_frames))
        .into_iter()
        .flatten()
        .peekable();
    let chunk_time = |start: usize| (start as u128 * 1_000_000_000 / rate as u128) as u64;

    let total_frames = plan.len() as u64;
    for composition in &plan {
        context.check_cancelled()?;
        while let Some((start, pcm)) = chunks.next_if(|(start, _)| chunk_time(*start) <= composition.time_ns) {
            container
                .write_sample(AUDIO_TRACK, chunk_time(start), &pcm_bytes(&pcm))
                .map_err(encoding_error)?;
        }

        let top = match (first.as_mut(), composition.sources[0]) {
            (Some(reader), Some(index)) => Some(reader.frame(index)?),
            _ => None,
        };
        let bottom = match (second.as_mut(), composition.sources[1]) {
            (Some(reader), Some(index)) => Some(reader.frame(index)?),
            _ => None,
        };
        let frame = compose_frame(&layout, [top, bottom], config.background);
        container
            .write_sample(VIDEO_TRACK, composition.time_ns, frame.as_raw())
            .map_err(encoding_error)?;
        context.report(composition.frame_index + 1, total_frames, MergeStage::Rendering);
    }
    for (start, pcm) in chunks {
        context.check_cancelled()?;
        container
            .write_sample(AUDIO_TRACK, chunk_time(start), &pcm_bytes(&pcm))
            .map_err(encoding_error)?;
    }

    context.report(total_frames, total_frames, MergeStage::Finalizing);
    let (writer, tracks) = container.finish().map_err(encoding_error)?;
    let file = writer
        .into_inner()
        .map_err(|e| DuetError::encoding(e.error().to_string()))?;
    file.sync_all().map_err(|e| DuetError::encoding(e.to_string()))?;

    for track in &tracks {
        tracing::debug!(
            track = track.track_id,
            samples = track.sample_count,
            duration_secs = track.duration_secs,
            "Merged track written"
        );
    }
    tracing::debug!(expected_secs = duration_ns as f64 / 1e9, "Merge output closed");
    context.report(total_frames, total_frames, MergeStage::Complete);
    Ok(())
}

fn pcm_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Any failure writing the merged file, disk exhaustion included.
fn encoding_error(err: ContainerError) -> DuetError {
    DuetError::encoding(err.to_string())
}
