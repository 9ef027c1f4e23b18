//! Frame compositor: picks source frames for each output frame and draws
//! them into the grid.

use image::imageops::{self, FilterType};
use image::RgbImage;

use duet_container::TrackInfo;
use duet_media_model::frame::solid_frame;

use crate::layout::GridLayout;

/// A single output frame's composition instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComposition {
    /// Output frame number.
    pub frame_index: u64,

    /// Presentation time on the output timeline.
    pub time_ns: u64,

    /// Sample index drawn into each cell, `None` for a blank cell.
    pub sources: [Option<usize>; 2],
}

/// Number of output frames covering `duration_ns` at `fps`.
pub fn output_frame_count(duration_ns: u64, fps: u32) -> u64 {
    let fps = fps.max(1) as u128;
    ((duration_ns as u128 * fps).div_ceil(1_000_000_000)) as u64
}

/// Presentation time of output frame `index`.
pub fn frame_time_ns(index: u64, fps: u32) -> u64 {
    (index as u128 * 1_000_000_000 / fps.max(1) as u128) as u64
}

/// Compute the composition for each output frame.
///
/// Each cell shows the source sample nearest in time to the output frame.
pub fn compute_compositions(
    tracks: [Option<&TrackInfo>; 2],
    fps: u32,
    duration_ns: u64,
) -> Vec<FrameComposition> {
    let total_frames = output_frame_count(duration_ns, fps);
    (0..total_frames)
        .map(|frame_index| {
            let time_ns = frame_time_ns(frame_index, fps);
            FrameComposition {
                frame_index,
                time_ns,
                sources: tracks.map(|t| t.and_then(|t| nearest_sample_index(t, time_ns))),
            }
        })
        .collect()
}

/// Index of the sample whose presentation time is closest to `time_ns`.
/// Ties go to the earlier sample.
pub fn nearest_sample_index(track: &TrackInfo, time_ns: u64) -> Option<usize> {
    let before = track.sample_index_at(time_ns)?;
    let Some(after_time) = track.sample_time_ns(before + 1) else {
        return Some(before);
    };
    let before_time = track.sample_time_ns(before).unwrap_or(0);
    if time_ns <= before_time {
        return Some(before);
    }
    if after_time - time_ns < time_ns - before_time {
        Some(before + 1)
    } else {
        Some(before)
    }
}

/// Draw one output frame: background, then each oriented source frame
/// scaled into its content rectangle.
pub fn compose_frame(layout: &GridLayout, cells: [Option<&RgbImage>; 2], background: [u8; 3]) -> RgbImage {
    let mut canvas = solid_frame(layout.canvas_width, layout.canvas_height, background);
    for (placement, frame) in layout.cells.iter().zip(cells) {
        let Some(frame) = frame else {
            continue;
        };
        let content = placement.content;
        if content.is_empty() || frame.width() == 0 || frame.height() == 0 {
            continue;
        }
        if frame.width() == content.width && frame.height() == content.height {
            imageops::replace(&mut canvas, frame, content.x as i64, content.y as i64);
        } else {
            let scaled = imageops::resize(frame, content.width, content.height, FilterType::Triangle);
            imageops::replace(&mut canvas, &scaled, content.x as i64, content.y as i64);
        }
    }
    canvas
}
