//! Duet Render Engine
//!
//! Offline composition of two finalized recordings into one two-cell grid
//! video, plus the probing and geometry they depend on.
//!
//! # Pipeline Architecture
//!
//! ```text
//! reference.mov ──┐
//!                 ├── VideoAsset probe ── VideoGeometryResolver (displayed size)
//! recording.mov ──┘                                │
//!                                                  ├── GridLayout (stacked / side by side)
//!                                                  │
//!                      nearest frame per cell ─────┼── orient ── scale ── letterbox
//!                                                  │
//!                      mono downmix + resample ────┼── mix
//!                                                  ▼
//!                                            merged.mov ── MediaLibrary
//! ```

pub mod asset;
pub mod compositor;
pub mod geometry;
pub mod job;
pub mod layout;
pub mod library;
pub mod merge;
pub mod mixer;

pub use asset::{FrameReader, VideoAsset};
pub use geometry::VideoGeometryResolver;
pub use job::{CompositionJob, JobState};
pub use layout::{GridArrangement, GridLayout};
pub use library::{DirectoryLibrary, MediaLibrary};
pub use merge::*;
