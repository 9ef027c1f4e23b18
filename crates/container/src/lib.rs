//! Duet Container
//!
//! Reads and writes QuickTime-style ISO base media files holding raw RGB24
//! video and 16-bit PCM audio. Files are written progressively: samples land
//! in `mdat` as they arrive and `moov` is written once on [`ContainerWriter::finish`].

pub mod atoms;
pub mod error;
pub mod reader;
pub mod writer;

pub use error::{ContainerError, ContainerResult};
pub use reader::{ContainerReader, SampleEntry, TrackInfo};
pub use writer::{ContainerWriter, WrittenTrack};
