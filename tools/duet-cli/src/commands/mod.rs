pub mod generate;
pub mod info;
pub mod merge;
pub mod record;
pub mod session;
pub mod snapshot;
pub mod voice;

use clap::Args;

use duet_capture_engine::{SourceFormat, TestPattern};
use duet_common::config::{AppConfig, AudioMixPolicy, CompositorConfig, NoVideoPolicy};
use duet_media_model::geometry::AffineTransform;
use duet_media_model::sample::{AudioFormat, VideoFormat};

/// Synthetic camera settings; unset values come from the config file.
#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// Camera width
    #[arg(long)]
    pub width: Option<u32>,

    /// Camera height
    #[arg(long)]
    pub height: Option<u32>,

    /// Camera frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Picture: bars, red, green, blue, or R,G,B
    #[arg(long, default_value = "bars")]
    pub pattern: String,

    /// Record video only
    #[arg(long)]
    pub no_audio: bool,
}

impl CameraArgs {
    pub fn source_format(&self, config: &AppConfig) -> SourceFormat {
        let defaults = &config.recording;
        SourceFormat {
            video: Some(VideoFormat {
                width: self.width.unwrap_or(defaults.width),
                height: self.height.unwrap_or(defaults.height),
                fps: self.fps.unwrap_or(defaults.fps),
                transform: AffineTransform::IDENTITY,
            }),
            audio: (!self.no_audio).then_some(AudioFormat {
                sample_rate: defaults.audio_sample_rate,
                channels: defaults.audio_channels,
            }),
        }
    }
}

/// Merge canvas and compositor overrides.
#[derive(Args, Debug, Clone)]
pub struct CanvasArgs {
    /// Output canvas width
    #[arg(long, default_value = "720")]
    pub canvas_width: u32,

    /// Output canvas height
    #[arg(long, default_value = "1280")]
    pub canvas_height: u32,

    /// Output frame rate
    #[arg(long)]
    pub merge_fps: Option<u32>,

    /// Output audio: mix, first, second, none
    #[arg(long)]
    pub audio: Option<String>,

    /// Leave a blank cell for inputs without video instead of failing
    #[arg(long)]
    pub blank_missing_video: bool,
}

impl CanvasArgs {
    pub fn compositor_config(&self, config: &AppConfig) -> anyhow::Result<CompositorConfig> {
        let mut compositor = config.compositor.clone();
        if let Some(fps) = self.merge_fps {
            anyhow::ensure!(fps > 0, "merge fps must be greater than zero");
            compositor.fps = fps;
        }
        if let Some(audio) = &self.audio {
            compositor.audio = parse_audio_policy(audio)?;
        }
        if self.blank_missing_video {
            compositor.no_video = NoVideoPolicy::BlankCell;
        }
        Ok(compositor)
    }
}

pub fn parse_audio_policy(value: &str) -> anyhow::Result<AudioMixPolicy> {
    match value {
        "mix" => Ok(AudioMixPolicy::Mix),
        "first" => Ok(AudioMixPolicy::First),
        "second" => Ok(AudioMixPolicy::Second),
        "none" => Ok(AudioMixPolicy::None),
        _ => Err(anyhow::anyhow!(
            "Unknown audio policy: {value}. Use: mix, first, second, none"
        )),
    }
}

pub fn parse_pattern(value: &str) -> anyhow::Result<TestPattern> {
    let pattern = match value {
        "bars" => TestPattern::ColorBars,
        "red" => TestPattern::Solid([220, 40, 40]),
        "green" => TestPattern::Solid([40, 200, 60]),
        "blue" => TestPattern::Solid([40, 60, 220]),
        other => {
            let channels: Vec<u8> = other
                .split(',')
                .map(|c| c.trim().parse::<u8>())
                .collect::<Result<_, _>>()
                .map_err(|_| anyhow::anyhow!("Unknown pattern: {other}. Use: bars, red, green, blue, R,G,B"))?;
            let rgb: [u8; 3] = channels
                .try_into()
                .map_err(|_| anyhow::anyhow!("Colour pattern needs exactly three channels: {other}"))?;
            TestPattern::Solid(rgb)
        }
    };
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_parse() {
        assert_eq!(parse_pattern("bars").unwrap(), TestPattern::ColorBars);
        assert_eq!(parse_pattern("1, 2,3").unwrap(), TestPattern::Solid([1, 2, 3]));
        assert!(parse_pattern("1,2").is_err());
        assert!(parse_pattern("plaid").is_err());
    }

    #[test]
    fn canvas_overrides_apply() {
        let args = CanvasArgs {
            canvas_width: 720,
            canvas_height: 1280,
            merge_fps: Some(24),
            audio: Some("second".to_string()),
            blank_missing_video: true,
        };
        let compositor = args.compositor_config(&AppConfig::default()).unwrap();
        assert_eq!(compositor.fps, 24);
        assert_eq!(compositor.audio, AudioMixPolicy::Second);
        assert_eq!(compositor.no_video, NoVideoPolicy::BlankCell);
    }
}
