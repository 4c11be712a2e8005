//! Sample Clock — conversions between sample indices and wall time
//!
//! The whole simulator runs off one ADC sample index; the wire protocol
//! talks in microseconds since the simulation epoch. This module owns the
//! conversions so that rounding happens in exactly one place.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-rate sample clock.
///
/// Stateless: the current sample index lives with the scheduler; this type
/// only carries the rate and converts between domains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleClock {
    /// Sample rate in samples/s.
    sample_rate: f64,
}

impl SampleClock {
    /// Create a clock for the given sample rate.
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    /// Sample rate in samples/s.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Seconds since the epoch for a sample index.
    #[inline]
    pub fn to_seconds(&self, samples: i64) -> f64 {
        samples as f64 / self.sample_rate
    }

    /// Microseconds since the epoch for a sample index, rounded.
    #[inline]
    pub fn to_micros(&self, samples: i64) -> u64 {
        (samples as f64 / self.sample_rate * 1e6).round().max(0.0) as u64
    }

    /// Sample index for a microsecond timestamp, rounded.
    #[inline]
    pub fn from_micros(&self, micros: u64) -> i64 {
        (micros as f64 * 1e-6 * self.sample_rate).round() as i64
    }

    /// Sample count covering `secs` seconds, rounded.
    #[inline]
    pub fn from_seconds(&self, secs: f64) -> i64 {
        (secs * self.sample_rate).round() as i64
    }

    /// Wall-clock duration from the epoch to a sample index.
    #[inline]
    pub fn duration_to(&self, samples: i64) -> Duration {
        Duration::from_secs_f64((samples.max(0)) as f64 / self.sample_rate)
    }
}
