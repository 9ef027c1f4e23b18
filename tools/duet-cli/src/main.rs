//! Duet CLI: record, generate, merge, and inspect recordings.
//!
//! Usage:
//!   duet record [OPTIONS]              Record the synthetic camera
//!   duet generate <OUTPUT> [OPTIONS]   Write a synthetic reference clip
//!   duet merge <FIRST> <SECOND>        Composite two recordings into a grid
//!   duet session <REFERENCE>           Record, merge with a reference, import
//!   duet voice [OPTIONS]               Record the synthetic microphone
//!   duet info <PATH>                   Show tracks and geometry of a file
//!   duet snapshot <PATH> <OUTPUT>      Save one frame as PNG

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use duet_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "duet",
    about = "Record alongside a reference video and merge the two into one grid",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the synthetic camera for a fixed time
    Record {
        /// Output directory (defaults to the configured recordings dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Recording length in seconds
        #[arg(long, default_value = "3.0")]
        secs: f64,

        #[command(flatten)]
        camera: commands::CameraArgs,
    },

    /// Write a synthetic reference clip
    Generate {
        /// Output file path
        output: PathBuf,

        /// Encoded width
        #[arg(long, default_value = "360")]
        width: u32,

        /// Encoded height
        #[arg(long, default_value = "640")]
        height: u32,

        /// Frame rate
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Clip length in seconds
        #[arg(long, default_value = "5.0")]
        secs: f64,

        /// Display rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value = "0")]
        rotation: u32,

        /// Picture: bars, red, green, blue, or R,G,B
        #[arg(long, default_value = "bars")]
        pattern: String,

        /// Omit the audio track
        #[arg(long)]
        no_audio: bool,
    },

    /// Composite two recordings into one grid video
    Merge {
        /// First input (top or left cell)
        first: PathBuf,

        /// Second input (bottom or right cell)
        second: PathBuf,

        /// Output file path (defaults to a time-stamped file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        canvas: commands::CanvasArgs,

        /// Copy the result into this library directory
        #[arg(long)]
        library: Option<PathBuf>,
    },

    /// Record against a reference clip, merge, and import the result
    Session {
        /// Reference video shown in the first cell
        reference: PathBuf,

        /// Recording length in seconds
        #[arg(long, default_value = "3.0")]
        secs: f64,

        /// Library directory receiving the merged video
        #[arg(long)]
        library: PathBuf,

        #[command(flatten)]
        camera: commands::CameraArgs,

        #[command(flatten)]
        canvas: commands::CanvasArgs,
    },

    /// Record the synthetic microphone as a voice track
    Voice {
        /// Recording length in seconds
        #[arg(long, default_value = "2.0")]
        secs: f64,

        /// Output directory (defaults to the configured voice dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a fresh time-stamped file instead of overwriting
        #[arg(long)]
        unique: bool,
    },

    /// Show tracks, sizes, and duration of a recording
    Info {
        /// Path to the file
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Save the frame nearest a timestamp as PNG
    Snapshot {
        /// Path to the recording
        path: PathBuf,

        /// PNG output path
        output: PathBuf,

        /// Timestamp in seconds
        #[arg(long, default_value = "0.0")]
        at: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    duet_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            output,
            secs,
            camera,
        } => commands::record::run(&config, output, secs, camera).await,
        Commands::Generate {
            output,
            width,
            height,
            fps,
            secs,
            rotation,
            pattern,
            no_audio,
        } => commands::generate::run(
            &config, output, width, height, fps, secs, rotation, &pattern, !no_audio,
        ),
        Commands::Merge {
            first,
            second,
            output,
            canvas,
            library,
        } => commands::merge::run(&config, first, second, output, canvas, library).await,
        Commands::Session {
            reference,
            secs,
            library,
            camera,
            canvas,
        } => commands::session::run(&config, reference, secs, library, camera, canvas).await,
        Commands::Voice {
            secs,
            output,
            unique,
        } => commands::voice::run(&config, secs, output, unique).await,
        Commands::Info { path, json } => commands::info::run(path, json),
        Commands::Snapshot { path, output, at } => commands::snapshot::run(&config, path, output, at),
    }
}
