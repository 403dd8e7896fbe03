//! Clock and timing utilities for media timestamps.
//!
//! Every Clipframe stream is normalized to a single microsecond timescale
//! on read, and written back out with the same timescale. This module
//! provides:
//! - Timescale conversion between container ticks and microseconds
//! - Audio/video drift measurement
//! - A render clock used for ETA reporting

use std::time::Instant;

/// Normalized timescale used for every track Clipframe reads or writes.
pub const MEDIA_TIMESCALE: u32 = 1_000_000;

/// Convert a container tick count to microseconds.
///
/// `pts_us = 1_000_000 * ticks / timescale`, computed in 128-bit space so
/// large 64-bit tick counts at odd timescales cannot overflow.
pub fn ticks_to_us(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (ticks as i128 * MEDIA_TIMESCALE as i128 / timescale as i128) as i64
}

/// Convert microseconds back into ticks of the given timescale.
pub fn us_to_ticks(us: i64, timescale: u32) -> i64 {
    (us as i128 * timescale as i128 / MEDIA_TIMESCALE as i128) as i64
}

/// Microseconds to seconds.
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / MEDIA_TIMESCALE as f64
}

/// Seconds to microseconds (rounded to nearest).
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * MEDIA_TIMESCALE as f64).round() as i64
}

/// A wall/monotonic clock pair anchored at the start of a render run.
#[derive(Debug, Clone)]
pub struct RenderClock {
    /// The instant the run started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RenderClock {
    /// Create a new render clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the run started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at run start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Estimated seconds remaining given a completed fraction in `[0, 1]`.
    pub fn eta_secs(&self, fraction: f64) -> f64 {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= f64::EPSILON {
            return 0.0;
        }
        self.elapsed_secs() * (1.0 - fraction) / fraction
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (us).
    pub reference_us: i64,
    /// Timestamp in the measured stream (us).
    pub measured_us: i64,
}

impl DriftMeasurement {
    /// Drift in microseconds (positive = measured is ahead).
    pub fn drift_us(&self) -> i64 {
        self.measured_us - self.reference_us
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_us() as f64 / 1_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
