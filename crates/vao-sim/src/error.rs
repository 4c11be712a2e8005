//! Simulation error types

use thiserror::Error;

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by the simulation and its protocol daemons.
///
/// Only configuration errors abort a call; everything recoverable at
/// runtime (bad commands, dropped packets, vanished peers) is logged and
/// swallowed where it happens.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulation is already running")]
    AlreadyRunning,

    #[error("nodes cannot be added while the simulation is running")]
    NodeWhileRunning,

    #[error("DAC rate {orate} Sa/s is not an integer multiple of ADC rate {irate} Sa/s")]
    RateMismatch { irate: f64, orate: f64 },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("propagation model failure: {0}")]
    Propagation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("simulation is closed")]
    Closed,
}
