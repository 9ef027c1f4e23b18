//! Save one displayed frame as PNG.

use std::path::PathBuf;

use duet_common::clock::RecordingClock;
use duet_common::config::AppConfig;
use duet_render_engine::VideoAsset;

pub fn run(config: &AppConfig, path: PathBuf, output: PathBuf, at_secs: f64) -> anyhow::Result<()> {
    anyhow::ensure!(at_secs >= 0.0, "timestamp must not be negative");
    let asset = VideoAsset::open(&path)?;
    let mut frames = asset.frames(config.compositor.background)?;
    let time_ns = RecordingClock::secs_to_ns(at_secs);

    let frame = frames
        .frame_at(time_ns)?
        .ok_or_else(|| anyhow::anyhow!("{} has no video frames", path.display()))?;
    frame.save(&output)?;
    println!(
        "Saved {}x{} frame at {:.3}s to {}",
        frame.width(),
        frame.height(),
        at_secs,
        output.display()
    );
    Ok(())
}
