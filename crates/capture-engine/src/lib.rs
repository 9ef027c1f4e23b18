//! Duet Capture Engine
//!
//! Records a live sample stream into a container file. The capture engine
//! owns the device-facing side of Duet: sources push timestamped samples,
//! the media writer muxes them on its own thread, and the session
//! controller ties the two together per recording.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │           CaptureSessionController               │
//! │  ┌──────────────┐  accept()   ┌───────────────┐  │
//! │  │ SampleSource │ ──────────▶ │  MediaWriter  │  │
//! │  │ (device thr) │             │ (writer thr)  │  │
//! │  └──────────────┘             └───────┬───────┘  │
//! │                                       ▼          │
//! │                          capture-YYYYmmdd-….mov  │
//! └──────────────────────────────────────────────────┘
//!
//! AudioRecorder: SampleSource ─▶ downmix/resample ─▶ MediaWriter ─▶ recording.mov
//! ```

pub mod audio;
pub mod session;
pub mod source;
pub mod writer;

pub use audio::AudioRecorder;
pub use session::*;
pub use source::*;
pub use writer::{Disposition, FinalizedFile, MediaWriter, WriterConfig, WriterState};
