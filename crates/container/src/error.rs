//! Container error types.

use thiserror::Error;

/// Errors raised while writing or reading a container file.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// I/O error on the underlying file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not follow the box structure we expect.
    #[error("Malformed container: {0}")]
    Malformed(String),

    /// A sample description or box version we cannot handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Unknown or duplicate track id.
    #[error("Track error: {0}")]
    Track(String),

    /// Sample timestamps must strictly increase per track.
    #[error("Track {track}: timestamp {current} does not follow {previous}")]
    NonMonotonic {
        track: u32,
        previous: u64,
        current: u64,
    },

    /// Writing after `finish()`.
    #[error("Container already finalized")]
    Finalized,

    /// A box or sample exceeds the 32-bit size fields.
    #[error("Size overflow: {0}")]
    Overflow(String),
}

/// Convenience Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;
