//! Error taxonomy shared across Duet crates.
//!
//! Every failure that crosses a component boundary (MediaWriter,
//! CaptureSessionController, GridCompositor, AudioRecorder) is expressed as a
//! [`DuetError`]. Low-level I/O and container errors are translated into one
//! of these variants before they reach a caller.

use std::path::PathBuf;
use std::sync::Arc;

/// Top-level error type for Duet operations.
///
/// `Clone` so that a cached outcome (for example a finalized recording) can be
/// handed out more than once.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DuetError {
    #[error("Capture device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("A recording session is already active")]
    AlreadyRecording,

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Non-monotonic sample on track {track}: {timestamp_ns}ns after {previous_ns}ns")]
    NonMonotonicSample {
        track: u32,
        previous_ns: u64,
        timestamp_ns: u64,
    },

    #[error("Source unreadable: {path}: {message}")]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("No video track in {path}")]
    NoVideoTrack { path: PathBuf },

    #[error("Encoding failed: {message}")]
    EncodingFailed { message: String },

    #[error("Storage failure: {message}")]
    StorageFailure { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(Arc<std::io::Error>),

    #[error(transparent)]
    Json(Arc<serde_json::Error>),
}

/// Result type alias using DuetError.
pub type DuetResult<T> = Result<T, DuetError>;

impl From<std::io::Error> for DuetError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for DuetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

impl DuetError {
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn source_unreadable(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error ends the active recording session.
    ///
    /// `InvalidState` is a caller error and leaves the session untouched;
    /// everything else aborts it.
    pub fn is_fatal_to_session(&self) -> bool {
        !matches!(self, Self::InvalidState { .. } | Self::AlreadyRecording)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_and_stay_cloneable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let err: DuetError = io.into();
        let copy = err.clone();
        assert!(matches!(copy, DuetError::Io(_)));
        assert!(copy.to_string().contains("read-only volume"));
    }

    #[test]
    fn non_monotonic_display_names_track_and_times() {
        let err = DuetError::NonMonotonicSample {
            track: 2,
            previous_ns: 40,
            timestamp_ns: 10,
        };
        assert_eq!(
            err.to_string(),
            "Non-monotonic sample on track 2: 10ns after 40ns"
        );
    }

    #[test]
    fn invalid_state_is_not_fatal() {
        assert!(!DuetError::invalid_state("not recording").is_fatal_to_session());
        assert!(!DuetError::AlreadyRecording.is_fatal_to_session());
        assert!(DuetError::storage("disk full").is_fatal_to_session());
        assert!(DuetError::NonMonotonicSample {
            track: 1,
            previous_ns: 2,
            timestamp_ns: 1
        }
        .is_fatal_to_session());
    }
}
