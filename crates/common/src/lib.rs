//! Duet Common Utilities
//!
//! Shared infrastructure for all Duet crates:
//! - Error taxonomy and result alias
//! - Clock, timebase and drift utilities for stream synchronization
//! - Tracing/logging initialization
//! - Configuration loading
//! - Output path allocation

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use clock::*;
pub use config::*;
pub use error::*;
