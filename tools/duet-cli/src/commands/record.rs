//! Record the synthetic camera.

use std::path::PathBuf;
use std::time::Duration;

use duet_capture_engine::{
    CaptureSessionController, RecordedFile, RecordingStatus, SessionConfig, SourceFormat,
    SyntheticSource, TestPattern,
};
use duet_common::config::AppConfig;

use super::{parse_pattern, CameraArgs};

pub async fn run(
    config: &AppConfig,
    output: Option<PathBuf>,
    secs: f64,
    camera: CameraArgs,
) -> anyhow::Result<()> {
    let format = camera.source_format(config);
    let pattern = parse_pattern(&camera.pattern)?;
    let mut session = SessionConfig::from_app_config(config);
    if let Some(output) = output {
        session.output_dir = output;
    }

    if let Some(video) = format.video {
        println!(
            "Recording synthetic camera: {}x{} @ {}fps",
            video.width, video.height, video.fps
        );
    }
    println!("  Audio: {}", format.audio.is_some());
    println!("  Output dir: {}", session.output_dir.display());
    println!();

    let file = record_clip(session, format, pattern, secs).await?;
    print_recorded(&file);
    Ok(())
}

/// Run one capture session for `secs` (or until Ctrl+C) and return the file.
pub async fn record_clip(
    session: SessionConfig,
    format: SourceFormat,
    pattern: TestPattern,
    secs: f64,
) -> anyhow::Result<RecordedFile> {
    anyhow::ensure!(secs > 0.0, "recording length must be positive");
    let source = SyntheticSource::new(format, pattern).with_name("synthetic-camera");
    let mut controller = CaptureSessionController::new(Box::new(source), session);
    controller.on_complete(|outcome| match outcome {
        Ok(file) => tracing::info!(path = %file.path.display(), "Session complete"),
        Err(e) => tracing::error!(error = %e, "Session failed"),
    });
    let mut status = controller.subscribe();

    let path = controller.start_recording().await?;
    println!("Recording to {} (Ctrl+C stops early)...", path.display());

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
        _ = tokio::signal::ctrl_c() => println!("Stopping early"),
        _ = status.wait_for(|s| matches!(s, RecordingStatus::Failed { .. })) => {}
    }

    let file = controller
        .stop_recording()
        .await?
        .ok_or_else(|| anyhow::anyhow!("No recording was active"))?;
    Ok(file)
}

pub fn print_recorded(file: &RecordedFile) {
    println!("Recording saved to: {}", file.path.display());
    println!("  Duration: {:.2}s", file.duration_secs);
    println!("  Video samples: {}", file.video_samples);
    println!("  Audio samples: {}", file.audio_samples);
    if file.dropped_samples > 0 {
        println!("  Dropped samples: {}", file.dropped_samples);
    }
}
