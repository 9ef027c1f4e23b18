//! Duet Media Model
//!
//! Defines the core media contracts shared by capture and render:
//! - **Samples:** timestamped RGB24 video frames and PCM audio buffers
//! - **Formats:** raw video/audio track descriptions
//! - **Geometry:** sizes, rectangles, and the affine transforms that turn a
//!   track's natural size into its displayed size
//! - **Frames:** RGB image helpers (re-orientation, region colour)
//! - **PCM:** downmixing and linear resampling

pub mod frame;
pub mod geometry;
pub mod pcm;
pub mod sample;

pub use geometry::*;
pub use sample::*;
