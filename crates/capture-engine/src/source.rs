//! Sample sources.
//!
//! A [`SampleSource`] owns a capture device and pushes timestamped samples
//! into a [`SampleSink`] from its own delivery thread. The sink must return
//! quickly; the media writer only enqueues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use image::{Rgb, RgbImage};

use duet_common::clock::{RecordingClock, NANOS_PER_SEC};
use duet_common::error::{DuetError, DuetResult};
use duet_media_model::frame::solid_frame;
use duet_media_model::sample::{
    AudioBuffer, AudioFormat, MediaSample, VideoFormat, VideoFrame, AUDIO_TRACK, VIDEO_TRACK,
};

/// Callback receiving samples on the device's delivery thread.
pub type SampleSink = Arc<dyn Fn(MediaSample) + Send + Sync>;

/// Tracks a source produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceFormat {
    pub video: Option<VideoFormat>,
    pub audio: Option<AudioFormat>,
}

/// A live capture device.
///
/// Implementations deliver samples push-style from their own thread once
/// started. Timestamps are on the device's monotonic clock and must
/// increase per track.
pub trait SampleSource: Send {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Tracks and formats this device delivers.
    fn format(&self) -> SourceFormat;

    /// Acquire the device and start delivering into `sink`.
    fn start(&mut self, sink: SampleSink) -> DuetResult<()>;

    /// Stop delivery and release the device. After this returns no new
    /// delivery starts, though one already in flight may still complete.
    fn stop(&mut self) -> DuetResult<()>;

    fn is_running(&self) -> bool;
}

/// Picture drawn by the synthetic camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Colour bars with a white marker sweeping across them.
    ColorBars,
    /// One flat colour.
    Solid([u8; 3]),
}

const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

/// Render the pattern for frame `index`.
pub fn pattern_frame(width: u32, height: u32, pattern: TestPattern, index: u64) -> RgbImage {
    match pattern {
        TestPattern::Solid(rgb) => solid_frame(width, height, rgb),
        TestPattern::ColorBars => {
            let marker = if width > 0 { (index * 4 % width as u64) as u32 } else { 0 };
            RgbImage::from_fn(width, height, |x, _| {
                if x == marker {
                    Rgb([255, 255, 255])
                } else {
                    let bar = (x as usize * BARS.len()) / width.max(1) as usize;
                    Rgb(BARS[bar.min(BARS.len() - 1)])
                }
            })
        }
    }
}

/// Deterministic camera/microphone signal, one tick per video frame.
///
/// Each tick yields the video frame for that tick (if video is enabled)
/// followed by the audio covering the same interval (if audio is enabled).
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    format: SourceFormat,
    pattern: TestPattern,
    tone_hz: f64,
    tick: u64,
    audio_frames: u64,
}

impl SyntheticGenerator {
    pub fn new(format: SourceFormat, pattern: TestPattern) -> Self {
        Self {
            format,
            pattern,
            tone_hz: 440.0,
            tick: 0,
            audio_frames: 0,
        }
    }

    /// Set the test tone frequency.
    pub fn with_tone(mut self, hz: f64) -> Self {
        self.tone_hz = hz;
        self
    }

    /// Ticks per second: the video frame rate, or 50 for audio-only.
    pub fn ticks_per_sec(&self) -> u32 {
        self.format.video.map(|v| v.fps.max(1)).unwrap_or(50)
    }

    pub fn tick_interval_ns(&self) -> u64 {
        NANOS_PER_SEC / self.ticks_per_sec() as u64
    }

    /// Source timestamp of a tick.
    pub fn tick_time_ns(&self, tick: u64) -> u64 {
        tick * NANOS_PER_SEC / self.ticks_per_sec() as u64
    }

    pub fn ticks_emitted(&self) -> u64 {
        self.tick
    }

    /// Produce the samples for the next tick.
    pub fn next_tick(&mut self) -> Vec<MediaSample> {
        let mut samples = Vec::with_capacity(2);
        let tick = self.tick;

        if let Some(video) = self.format.video {
            let frame = pattern_frame(video.width, video.height, self.pattern, tick);
            samples.push(VideoFrame::from_image(VIDEO_TRACK, self.tick_time_ns(tick), frame).into());
        }

        if let Some(audio) = self.format.audio {
            let rate = audio.sample_rate as u64;
            let target = (tick + 1) * rate / self.ticks_per_sec() as u64;
            let frames = target.saturating_sub(self.audio_frames);
            if frames > 0 {
                let timestamp_ns = self.audio_frames * NANOS_PER_SEC / rate;
                let mut pcm = Vec::with_capacity(frames as usize * audio.channels as usize);
                for n in self.audio_frames..target {
                    let t = n as f64 / rate as f64;
                    let value = (t * self.tone_hz * std::f64::consts::TAU).sin() * 0.3 * 32_767.0;
                    for _ in 0..audio.channels {
                        pcm.push(value as i16);
                    }
                }
                self.audio_frames = target;
                // Channel count divides the buffer by construction.
                if let Ok(buffer) = AudioBuffer::new(AUDIO_TRACK, timestamp_ns, audio, pcm) {
                    samples.push(buffer.into());
                }
            }
        }

        self.tick += 1;
        samples
    }
}

/// A camera and microphone simulated in software, paced in real time.
pub struct SyntheticSource {
    name: String,
    generator: SyntheticGenerator,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl SyntheticSource {
    pub fn new(format: SourceFormat, pattern: TestPattern) -> Self {
        Self {
            name: "synthetic".to_string(),
            generator: SyntheticGenerator::new(format, pattern),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl SampleSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> SourceFormat {
        self.generator.format
    }

    fn start(&mut self, sink: SampleSink) -> DuetResult<()> {
        if self.is_running() {
            return Err(DuetError::device_unavailable(format!(
                "{} is already streaming",
                self.name
            )));
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let mut generator = self.generator.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-capture", self.name))
            .spawn(move || {
                let clock = RecordingClock::start();
                while running.load(Ordering::SeqCst) {
                    let due = generator.tick_time_ns(generator.ticks_emitted());
                    let now = clock.elapsed_ns();
                    if due > now {
                        std::thread::sleep(Duration::from_nanos(due - now));
                    }
                    for sample in generator.next_tick() {
                        sink(sample);
                    }
                }
                generator.ticks_emitted()
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                DuetError::device_unavailable(format!("failed to spawn capture thread: {e}"))
            })?;

        self.thread = Some(handle);
        tracing::info!(source = %self.name, "Synthetic source started");
        Ok(())
    }

    fn stop(&mut self) -> DuetResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(ticks) => tracing::info!(source = %self.name, ticks, "Synthetic source stopped"),
                Err(_) => tracing::warn!(source = %self.name, "Capture thread panicked"),
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct PushShared {
    sink: Mutex<Option<SampleSink>>,
    disconnected: AtomicBool,
}

/// A source fed by its host: a platform capture callback, or a test.
///
/// The paired [`PushHandle`] delivers samples on whatever thread calls it.
pub struct PushSource {
    name: String,
    format: SourceFormat,
    shared: Arc<PushShared>,
}

/// Feeding end of a [`PushSource`].
#[derive(Clone)]
pub struct PushHandle {
    shared: Arc<PushShared>,
}

impl PushSource {
    pub fn new(name: impl Into<String>, format: SourceFormat) -> (Self, PushHandle) {
        let shared = Arc::new(PushShared {
            sink: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        });
        let source = Self {
            name: name.into(),
            format,
            shared: Arc::clone(&shared),
        };
        (source, PushHandle { shared })
    }
}

impl SampleSource for PushSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> SourceFormat {
        self.format
    }

    fn start(&mut self, sink: SampleSink) -> DuetResult<()> {
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(DuetError::device_unavailable(format!("{} is disconnected", self.name)));
        }
        let mut slot = self
            .shared
            .sink
            .lock()
            .map_err(|_| DuetError::invalid_state("push source lock poisoned"))?;
        if slot.is_some() {
            return Err(DuetError::device_unavailable(format!(
                "{} is already streaming",
                self.name
            )));
        }
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&mut self) -> DuetResult<()> {
        if let Ok(mut slot) = self.shared.sink.lock() {
            slot.take();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared
            .sink
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl PushHandle {
    /// Deliver a sample. Returns `false` when the source is not running.
    pub fn push(&self, sample: impl Into<MediaSample>) -> bool {
        let sink = match self.shared.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        match sink {
            Some(sink) => {
                sink(sample.into());
                true
            }
            None => false,
        }
    }

    /// Simulate the device going away: delivery stops and later starts fail.
    pub fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.sink.lock() {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_media_model::geometry::AffineTransform;
    use duet_media_model::sample::TrackKind;

    fn av_format() -> SourceFormat {
        SourceFormat {
            video: Some(VideoFormat {
                width: 14,
                height: 2,
                fps: 25,
                transform: AffineTransform::IDENTITY,
            }),
            audio: Some(AudioFormat {
                sample_rate: 8_000,
                channels: 2,
            }),
        }
    }

    #[test]
    fn generator_covers_audio_without_gaps() {
        let mut generator = SyntheticGenerator::new(av_format(), TestPattern::ColorBars);
        let mut audio_end_ns = 0;
        for tick in 0..25 {
            let samples = generator.next_tick();
            assert_eq!(samples.len(), 2);
            assert_eq!(samples[0].kind(), TrackKind::Video);
            assert_eq!(samples[0].timestamp_ns(), tick * 40_000_000);
            match &samples[1] {
                MediaSample::Audio(buffer) => {
                    assert_eq!(buffer.timestamp_ns(), audio_end_ns);
                    assert_eq!(buffer.frames(), 320);
                    audio_end_ns += buffer.duration_ns();
                }
                other => panic!("expected audio, got {:?}", other.kind()),
            }
        }
        assert_eq!(audio_end_ns, NANOS_PER_SEC);
    }

    #[test]
    fn color_bars_marker_moves() {
        let first = pattern_frame(14, 2, TestPattern::ColorBars, 0);
        let second = pattern_frame(14, 2, TestPattern::ColorBars, 1);
        assert_eq!(first.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(second.get_pixel(4, 1).0, [255, 255, 255]);
        assert_eq!(second.get_pixel(0, 0).0, BARS[0]);
    }

    #[test]
    fn push_source_delivers_only_while_started() {
        let (mut source, handle) = PushSource::new("test", av_format());
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let frame = VideoFrame::new(VIDEO_TRACK, 0, 1, 1, vec![0, 0, 0]).unwrap();

        assert!(!handle.push(frame.clone()));
        source
            .start(Arc::new(move |_: MediaSample| *counter.lock().unwrap() += 1))
            .unwrap();
        assert!(source.is_running());
        assert!(handle.push(frame.clone()));
        source.stop().unwrap();
        assert!(!handle.push(frame));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn disconnected_push_source_is_unavailable() {
        let (mut source, handle) = PushSource::new("cam", av_format());
        handle.disconnect();
        let err = source.start(Arc::new(|_: MediaSample| {})).unwrap_err();
        assert!(matches!(err, DuetError::DeviceUnavailable { .. }));
    }

    #[test]
    fn synthetic_source_streams_until_stopped() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut source = SyntheticSource::new(av_format(), TestPattern::Solid([1, 2, 3]));
        source
            .start(Arc::new(move |sample: MediaSample| {
                let _ = tx.send(sample.kind());
            }))
            .unwrap();
        assert!(source.start(Arc::new(|_: MediaSample| {})).is_err());
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, TrackKind::Video);
        source.stop().unwrap();
        assert!(!source.is_running());
    }
}
