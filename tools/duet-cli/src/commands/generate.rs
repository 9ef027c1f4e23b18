//! Write a synthetic reference clip.

use std::path::PathBuf;

use duet_capture_engine::{MediaWriter, SourceFormat, SyntheticGenerator, WriterConfig};
use duet_common::config::AppConfig;
use duet_media_model::geometry::{AffineTransform, Rect, Size};
use duet_media_model::sample::{AudioFormat, VideoFormat};

use super::parse_pattern;

/// Track transform that rotates the picture by `degrees` and moves it back
/// into the positive quadrant.
pub fn display_transform(width: u32, height: u32, degrees: u32) -> AffineTransform {
    if degrees % 360 == 0 {
        return AffineTransform::IDENTITY;
    }
    let rotation = AffineTransform::rotation(degrees as f64);
    let bounds = rotation.apply_to_rect(&Rect::from_size(Size::from_pixels(width, height)));
    rotation.concat(&AffineTransform::translation(-bounds.x, -bounds.y))
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &AppConfig,
    output: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    secs: f64,
    rotation: u32,
    pattern: &str,
    audio: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(width > 0 && height > 0, "clip size must be non-zero");
    anyhow::ensure!(fps > 0, "fps must be greater than zero");
    anyhow::ensure!(rotation % 90 == 0, "rotation must be a multiple of 90 degrees");
    anyhow::ensure!(secs > 0.0, "clip length must be positive");

    let pattern = parse_pattern(pattern)?;
    let format = SourceFormat {
        video: Some(VideoFormat {
            width,
            height,
            fps,
            transform: display_transform(width, height, rotation),
        }),
        audio: audio.then_some(AudioFormat {
            sample_rate: config.recording.audio_sample_rate,
            channels: config.recording.audio_channels,
        }),
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = MediaWriter::new(
        output.clone(),
        WriterConfig {
            video: format.video,
            audio: format.audio,
            max_buffered_samples: config.recording.max_buffered_samples,
        },
    );
    writer.start()?;

    let mut generator = SyntheticGenerator::new(format, pattern);
    let ticks = (secs * fps as f64).round().max(1.0) as u64;
    for _ in 0..ticks {
        for sample in generator.next_tick() {
            writer.accept(sample)?;
        }
    }
    let file = writer.finalize()?;

    println!("Generated {}", file.path.display());
    println!("  Encoded: {width}x{height} @ {fps}fps, rotation {rotation}°");
    println!("  Duration: {:.2}s", file.duration_secs);
    println!(
        "  Samples: {} video, {} audio",
        file.video_samples, file.audio_samples
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_media_model::geometry::displayed_size;

    #[test]
    fn quarter_turn_lands_in_positive_quadrant() {
        let transform = display_transform(1080, 1920, 90);
        let natural = Size::from_pixels(1080, 1920);
        assert_eq!(displayed_size(natural, &transform), Size::new(1920.0, 1080.0));
        let bounds = transform.apply_to_rect(&Rect::from_size(natural));
        assert_eq!((bounds.x, bounds.y), (0.0, 0.0));
        assert!(display_transform(4, 2, 360).is_identity());
    }
}
