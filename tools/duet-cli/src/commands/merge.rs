//! Composite two recordings into one grid video.

use std::io::Write;
use std::path::{Path, PathBuf};

use duet_common::config::{AppConfig, CompositorConfig};
use duet_render_engine::{DirectoryLibrary, GridCompositor, MediaLibrary, MergeProgress, MergeStage};

use super::CanvasArgs;

pub async fn run(
    config: &AppConfig,
    first: PathBuf,
    second: PathBuf,
    output: Option<PathBuf>,
    canvas: CanvasArgs,
    library: Option<PathBuf>,
) -> anyhow::Result<()> {
    let compositor = canvas.compositor_config(config)?;
    println!("Merging:");
    println!("  First: {}", first.display());
    println!("  Second: {}", second.display());
    println!(
        "  Canvas: {}x{} @ {}fps",
        canvas.canvas_width, canvas.canvas_height, compositor.fps
    );

    let merged = merge_files(
        compositor,
        &first,
        &second,
        (canvas.canvas_width, canvas.canvas_height),
        output,
    )
    .await?;
    println!("Merge complete: {}", merged.display());

    if let Some(root) = library {
        let library = DirectoryLibrary::new(root);
        let stored = library.import(&merged).await?;
        println!("Imported into {} library: {}", library.name(), stored.display());
    }
    Ok(())
}

/// Run one merge with a progress line; Ctrl+C cancels it.
pub async fn merge_files(
    config: CompositorConfig,
    first: &Path,
    second: &Path,
    (width, height): (u32, u32),
    output: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    let mut compositor = GridCompositor::new(config);
    compositor.on_progress(print_progress);

    let handle = match output {
        Some(output) => compositor.merge_to(first, second, width, height, output),
        None => compositor.merge(first, second, width, height),
    };
    let cancel = handle.cancel_handle();
    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling merge...");
            cancel.cancel();
            wait.await
        }
    };
    println!();
    Ok(outcome?)
}

fn print_progress(p: MergeProgress) {
    match p.stage {
        MergeStage::Preparing => print!("\r  Preparing...  "),
        MergeStage::Rendering => print!(
            "\r  Progress: {:.1}% ({}/{} frames)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
        ),
        MergeStage::Finalizing => print!("\r  Finalizing...                    "),
        MergeStage::Complete => print!("\r  Done.                            "),
    }
    let _ = std::io::stdout().flush();
}
