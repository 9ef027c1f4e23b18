//! CaptureSessionController driven through a PushSource.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use duet_capture_engine::{
    CaptureSessionController, PushHandle, PushSource, RecordedFile, RecordingStatus,
    SampleSink, SampleSource, SessionConfig, SourceFormat,
};
use duet_common::error::{DuetError, DuetResult};
use duet_container::ContainerReader;
use duet_media_model::geometry::AffineTransform;
use duet_media_model::sample::{
    AudioBuffer, AudioFormat, VideoFormat, VideoFrame, AUDIO_TRACK, VIDEO_TRACK,
};

const FRAME_NS: u64 = 40_000_000;

fn test_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("duet_session_{name}_{}", std::process::id()))
}

fn camera_format() -> SourceFormat {
    SourceFormat {
        video: Some(VideoFormat {
            width: 4,
            height: 2,
            fps: 25,
            transform: AffineTransform::IDENTITY,
        }),
        audio: Some(AudioFormat {
            sample_rate: 8_000,
            channels: 1,
        }),
    }
}

fn frame(ts: u64) -> VideoFrame {
    VideoFrame::new(VIDEO_TRACK, ts, 4, 2, vec![50; 24]).unwrap()
}

fn chunk(ts: u64) -> AudioBuffer {
    let format = AudioFormat {
        sample_rate: 8_000,
        channels: 1,
    };
    AudioBuffer::new(AUDIO_TRACK, ts, format, vec![0; 320]).unwrap()
}

type Outcomes = Arc<Mutex<Vec<DuetResult<RecordedFile>>>>;

fn controller(dir: &Path) -> (CaptureSessionController, PushHandle, Outcomes) {
    let (source, handle) = PushSource::new("test-camera", camera_format());
    let (controller, outcomes) = controller_for(Box::new(source), dir);
    (controller, handle, outcomes)
}

fn controller_for(
    source: Box<dyn SampleSource>,
    dir: &Path,
) -> (CaptureSessionController, Outcomes) {
    let mut controller = CaptureSessionController::new(
        source,
        SessionConfig {
            output_dir: dir.to_path_buf(),
            file_prefix: "take".to_string(),
            max_buffered_samples: 16,
        },
    );
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    controller.on_complete(move |outcome| sink.lock().unwrap().push(outcome));
    (controller, outcomes)
}

/// A device that hands over one last buffered frame while it is stopping.
struct FlushOnStop {
    inner: PushSource,
    sink: Option<SampleSink>,
    last_frame_ns: u64,
}

impl SampleSource for FlushOnStop {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn format(&self) -> SourceFormat {
        self.inner.format()
    }

    fn start(&mut self, sink: SampleSink) -> DuetResult<()> {
        self.sink = Some(Arc::clone(&sink));
        self.inner.start(sink)
    }

    fn stop(&mut self) -> DuetResult<()> {
        self.inner.stop()?;
        if let Some(sink) = self.sink.take() {
            sink(frame(self.last_frame_ns).into());
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

fn mov_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "mov"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn record_and_stop_produces_file_and_single_callback() {
    let dir = test_dir("basic");
    let (mut controller, handle, outcomes) = controller(&dir);
    let status = controller.subscribe();

    let path = controller.start_recording().await.unwrap();
    assert!(controller.is_recording());
    assert_eq!(controller.current_path(), Some(&path));
    assert_eq!(*status.borrow(), RecordingStatus::Recording { path: path.clone() });

    let base = 2_000_000_000;
    assert!(handle.push(frame(base)));
    // Audio captured before the first accepted sample.
    assert!(handle.push(chunk(base - FRAME_NS)));
    assert!(handle.push(chunk(base)));
    for i in 1..10u64 {
        assert!(handle.push(frame(base + i * FRAME_NS)));
        assert!(handle.push(chunk(base + i * FRAME_NS)));
    }

    let file = controller.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.path, path);
    assert_eq!(file.video_samples, 10);
    assert_eq!(file.audio_samples, 10);
    assert_eq!(file.dropped_samples, 1);
    assert!((file.duration_secs - 0.4).abs() < 0.001);
    assert!(!controller.is_recording());
    assert_eq!(controller.status(), RecordingStatus::Finished { path: path.clone() });

    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].as_ref().unwrap(), &file);
    }

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.track(VIDEO_TRACK).unwrap().samples.len(), 10);

    // The source is released: nothing more reaches the file.
    assert!(!handle.push(frame(base + 20 * FRAME_NS)));
    assert!(controller.stop_recording().await.unwrap().is_none());
    assert_eq!(outcomes.lock().unwrap().len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn second_start_is_rejected_and_session_continues() {
    let dir = test_dir("already");
    let (mut controller, handle, outcomes) = controller(&dir);

    let path = controller.start_recording().await.unwrap();
    handle.push(frame(0));
    assert!(matches!(
        controller.start_recording().await,
        Err(DuetError::AlreadyRecording)
    ));
    assert!(controller.is_recording());
    assert_eq!(controller.current_path(), Some(&path));

    handle.push(frame(FRAME_NS));
    let file = controller.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.video_samples, 2);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
    assert_eq!(mov_files(&dir), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn non_monotonic_sample_fails_session() {
    let dir = test_dir("failure");
    let (mut controller, handle, outcomes) = controller(&dir);

    let path = controller.start_recording().await.unwrap();
    handle.push(frame(0));
    handle.push(frame(2 * FRAME_NS));
    handle.push(frame(FRAME_NS));

    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0],
            Err(DuetError::NonMonotonicSample {
                track: VIDEO_TRACK,
                ..
            })
        ));
    }
    assert!(!controller.is_recording());
    assert!(matches!(controller.status(), RecordingStatus::Failed { .. }));
    assert!(!path.exists());

    // Stopping reports the same failure without a second callback.
    assert!(matches!(
        controller.stop_recording().await,
        Err(DuetError::NonMonotonicSample { .. })
    ));
    assert_eq!(outcomes.lock().unwrap().len(), 1);

    // The controller recovers for the next session.
    controller.start_recording().await.unwrap();
    handle.push(frame(5 * FRAME_NS));
    let file = controller.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.video_samples, 1);
    assert_eq!(outcomes.lock().unwrap().len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn failed_session_is_reaped_by_next_start() {
    let dir = test_dir("reap");
    let (mut controller, handle, outcomes) = controller(&dir);

    controller.start_recording().await.unwrap();
    handle.push(chunk(FRAME_NS));
    handle.push(chunk(FRAME_NS));
    assert!(!controller.is_recording());

    let path = controller.start_recording().await.unwrap();
    assert!(handle.push(chunk(0)));
    let file = controller.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.path, path);
    assert_eq!(file.audio_samples, 1);
    assert_eq!(outcomes.lock().unwrap().len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn disconnected_device_is_unavailable() {
    let dir = test_dir("disconnected");
    let (mut controller, handle, outcomes) = controller(&dir);
    handle.disconnect();

    assert!(matches!(
        controller.start_recording().await,
        Err(DuetError::DeviceUnavailable { .. })
    ));
    assert!(!controller.is_recording());
    assert_eq!(controller.status(), RecordingStatus::Idle);
    assert_eq!(mov_files(&dir), 0);
    assert!(outcomes.lock().unwrap().is_empty());

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn source_without_tracks_is_unavailable() {
    let dir = test_dir("empty");
    let (source, _handle) = PushSource::new(
        "nothing",
        SourceFormat {
            video: None,
            audio: None,
        },
    );
    let mut controller = CaptureSessionController::new(
        Box::new(source),
        SessionConfig {
            output_dir: dir.clone(),
            file_prefix: "take".to_string(),
            max_buffered_samples: 16,
        },
    );
    assert!(matches!(
        controller.start_recording().await,
        Err(DuetError::DeviceUnavailable { .. })
    ));
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn handing_back_the_source_cancels_the_session() {
    let dir = test_dir("cancel");
    let (mut controller, handle, outcomes) = controller(&dir);

    let path = controller.start_recording().await.unwrap();
    handle.push(frame(0));
    let source = controller.into_source();
    assert!(!source.is_running());
    assert!(!path.exists());

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(DuetError::Cancelled)));
    drop(outcomes);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn samples_delivered_while_stopping_are_dropped() {
    let dir = test_dir("stopping");
    let (inner, handle) = PushSource::new("flushing-camera", camera_format());
    let source = FlushOnStop {
        inner,
        sink: None,
        last_frame_ns: 10 * FRAME_NS,
    };
    let (mut controller, outcomes) = controller_for(Box::new(source), &dir);

    let path = controller.start_recording().await.unwrap();
    for i in 0..3u64 {
        assert!(handle.push(frame(i * FRAME_NS)));
    }
    let file = controller.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.video_samples, 3);
    assert_eq!(file.dropped_samples, 1);
    assert_eq!(outcomes.lock().unwrap().len(), 1);

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.track(VIDEO_TRACK).unwrap().samples.len(), 3);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn device_thread_racing_stop_never_corrupts_the_file() {
    let dir = test_dir("racing_stop");
    let (mut controller, handle, outcomes) = controller(&dir);
    let path = controller.start_recording().await.unwrap();

    let device = std::thread::spawn(move || {
        let mut delivered = 0u64;
        for i in 0..100_000u64 {
            if !handle.push(frame(i * FRAME_NS)) {
                break;
            }
            delivered += 1;
        }
        delivered
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let file = controller.stop_recording().await.unwrap().unwrap();
    let delivered = device.join().unwrap();

    assert!(file.video_samples <= delivered);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(
        reader.track(VIDEO_TRACK).unwrap().samples.len() as u64,
        file.video_samples
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn storage_lost_mid_session_fails_with_one_callback() {
    let dir = test_dir("storage_lost");
    let (mut controller, handle, outcomes) = controller(&dir);
    let status = controller.subscribe();

    let path = controller.start_recording().await.unwrap();
    handle.push(frame(0));
    handle.push(chunk(0));
    std::fs::remove_dir_all(&dir).unwrap();
    handle.push(frame(FRAME_NS));

    assert!(matches!(
        controller.stop_recording().await,
        Err(DuetError::StorageFailure { .. })
    ));
    assert!(matches!(*status.borrow(), RecordingStatus::Failed { .. }));
    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(DuetError::StorageFailure { .. })));
    }
    assert!(!path.exists());
    assert!(!controller.is_recording());

    std::fs::remove_dir_all(&dir).ok();
}
