//! Show tracks and geometry of a recording.

use std::path::PathBuf;

use serde_json::json;

use duet_media_model::sample::TrackKind;
use duet_render_engine::VideoAsset;

pub fn run(path: PathBuf, as_json: bool) -> anyhow::Result<()> {
    let asset = VideoAsset::open(&path)?;
    let natural = asset.natural_size();
    let displayed = asset.displayed_size();

    if as_json {
        let tracks: Vec<_> = asset
            .tracks()
            .iter()
            .map(|t| {
                json!({
                    "track_id": t.track_id,
                    "kind": t.kind,
                    "codec": t.codec,
                    "timescale": t.timescale,
                    "samples": t.samples.len(),
                    "start_secs": t.start_ns as f64 / 1e9,
                    "duration_secs": t.duration_secs(),
                    "audio": t.audio,
                })
            })
            .collect();
        let info = json!({
            "path": path,
            "duration_secs": asset.duration_secs(),
            "natural_size": natural,
            "displayed_size": displayed,
            "transform": asset.transform(),
            "tracks": tracks,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", path.display());
    println!("  Duration: {:.3}s", asset.duration_secs());
    if asset.has_video() {
        println!("  Natural size: {}x{}", natural.width, natural.height);
        println!("  Displayed size: {}x{}", displayed.width, displayed.height);
        if !asset.transform().is_identity() {
            println!("  Transform: {:?}", asset.transform());
        }
    } else {
        println!("  No video track");
    }
    println!();

    println!("Tracks:");
    for t in asset.tracks() {
        match t.kind {
            TrackKind::Video => println!(
                "  #{} video '{}': {}x{}, {} frames, {:.2}fps, {:.3}s",
                t.track_id,
                t.codec,
                t.coded_width,
                t.coded_height,
                t.samples.len(),
                t.nominal_fps(),
                t.duration_secs()
            ),
            TrackKind::Audio => {
                let (rate, channels) = t.audio.map(|a| (a.sample_rate, a.channels)).unwrap_or((0, 0));
                println!(
                    "  #{} audio '{}': {} Hz x{}, {} samples, {:.3}s",
                    t.track_id,
                    t.codec,
                    rate,
                    channels,
                    t.samples.len(),
                    t.duration_secs()
                );
            }
        }
        if t.start_ns > 0 {
            println!("      starts at {:.3}s", t.start_ns as f64 / 1e9);
        }
    }
    Ok(())
}
