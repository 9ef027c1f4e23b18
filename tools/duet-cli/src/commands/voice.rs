//! Record the synthetic microphone through the voice recorder.

use std::path::PathBuf;
use std::time::Duration;

use duet_capture_engine::{AudioRecorder, SourceFormat, SyntheticSource, TestPattern};
use duet_common::config::{AppConfig, FileNaming};
use duet_media_model::sample::AudioFormat;
use duet_render_engine::VideoAsset;

/// Typical built-in microphone format, converted down by the recorder.
const MIC_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 48_000,
    channels: 2,
};

pub async fn run(
    config: &AppConfig,
    secs: f64,
    output: Option<PathBuf>,
    unique: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(secs > 0.0, "recording length must be positive");
    let mut voice = config.voice.clone();
    if let Some(output) = output {
        voice.directory = output;
    }
    if unique {
        voice.naming = FileNaming::Unique;
    }

    let microphone = SyntheticSource::new(
        SourceFormat {
            video: None,
            audio: Some(MIC_FORMAT),
        },
        TestPattern::ColorBars,
    )
    .with_name("synthetic-mic");
    let mut recorder = AudioRecorder::new(Box::new(microphone), voice);
    let format = recorder.speech_format();

    let path = recorder.start_recording()?;
    println!(
        "Recording voice to {} ({} Hz mono, Ctrl+C stops early)...",
        path.display(),
        format.sample_rate
    );
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
        _ = tokio::signal::ctrl_c() => println!("Stopping early"),
    }

    let path = recorder.finish_recording().await?;
    let asset = VideoAsset::open(&path)?;
    println!("Voice recording saved to: {}", path.display());
    println!("  Duration: {:.2}s", asset.duration_secs());
    Ok(())
}
