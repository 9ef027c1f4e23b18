//! Clock and timing utilities for stream synchronization.
//!
//! Capture devices stamp samples on their own monotonic clock. A recording
//! session re-bases those stamps so that the first accepted sample (across
//! all tracks) sits at zero. This module provides:
//! - A monotonic recording clock with a wall-clock epoch
//! - The session timebase used for re-basing
//! - Drift measurement between two streams

use std::time::Instant;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,
    epoch_wall: chrono::DateTime<chrono::Utc>,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now(),
        }
    }

    /// Get nanoseconds elapsed since the epoch.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Get seconds elapsed since the epoch.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at the epoch (RFC 3339).
    pub fn epoch_wall(&self) -> String {
        self.epoch_wall.to_rfc3339()
    }

    /// Convert an elapsed nanosecond value to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / NANOS_PER_SEC as f64
    }

    /// Convert seconds to nanoseconds.
    pub fn secs_to_ns(secs: f64) -> u64 {
        (secs * NANOS_PER_SEC as f64) as u64
    }
}

/// Re-bases source-clock timestamps onto a session timeline starting at zero.
///
/// The first timestamp offered defines the origin. Timestamps that precede
/// the origin (a second track whose first sample was captured slightly
/// earlier) have no place on the timeline: check them with
/// [`precedes_origin`](Self::precedes_origin) and drop them before calling
/// [`rebase`](Self::rebase), which saturates at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTimebase {
    origin_ns: Option<u64>,
}

impl SessionTimebase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source timestamp of the session origin, once known.
    pub fn origin_ns(&self) -> Option<u64> {
        self.origin_ns
    }

    /// Whether a source timestamp falls before an established origin.
    pub fn precedes_origin(&self, source_ns: u64) -> bool {
        self.origin_ns.is_some_and(|origin| source_ns < origin)
    }

    /// Map a source timestamp onto the session timeline.
    pub fn rebase(&mut self, source_ns: u64) -> u64 {
        let origin = *self.origin_ns.get_or_insert(source_ns);
        source_ns.saturating_sub(origin)
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (ns).
    pub reference_ns: u64,
    /// Timestamp in the measured stream (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
