//! Record against a reference clip, merge the two, and import the result.

use std::path::PathBuf;

use duet_capture_engine::SessionConfig;
use duet_common::config::AppConfig;
use duet_common::paths::remove_partial;
use duet_render_engine::{DirectoryLibrary, MediaLibrary, VideoGeometryResolver};

use super::merge::merge_files;
use super::record::{print_recorded, record_clip};
use super::{parse_pattern, CameraArgs, CanvasArgs};

pub async fn run(
    config: &AppConfig,
    reference: PathBuf,
    secs: f64,
    library: PathBuf,
    camera: CameraArgs,
    canvas: CanvasArgs,
) -> anyhow::Result<()> {
    // Fail on an unusable reference before the camera starts.
    let reference_size = VideoGeometryResolver::new().resolve(&reference)?;
    println!(
        "Reference: {} ({}x{} displayed)",
        reference.display(),
        reference_size.width,
        reference_size.height
    );

    let compositor = canvas.compositor_config(config)?;
    let recording = record_clip(
        SessionConfig::from_app_config(config),
        camera.source_format(config),
        parse_pattern(&camera.pattern)?,
        secs,
    )
    .await?;
    print_recorded(&recording);
    println!();

    let merged = merge_files(
        compositor,
        &reference,
        &recording.path,
        (canvas.canvas_width, canvas.canvas_height),
        None,
    )
    .await?;

    let library = DirectoryLibrary::new(library);
    let stored = library.import(&merged).await?;
    remove_partial(&merged);
    tracing::info!(recording = %recording.path.display(), stored = %stored.display(), "Session handed off");
    println!("Imported into {} library: {}", library.name(), stored.display());
    Ok(())
}
