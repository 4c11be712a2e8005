//! # vao-core
//!
//! Core primitives for the Virtual Acoustic Ocean simulator: the
//! per-hydrophone signal tape, sample-clock conversions, data-plane
//! framing, the JSON control-plane message types, parameter values,
//! ambient-noise sources, and logging setup.
//!
//! The simulation itself (nodes, scheduler, transmit pipeline, protocol
//! daemons) lives in the `vao-sim` crate on top of these pieces.

pub mod frame;
pub mod logging;
pub mod noise;
pub mod params;
pub mod protocol;
pub mod tape;
pub mod timing;
pub mod units;

pub use frame::DataFrame;
pub use noise::{NoiseSource, RedGaussianNoise};
pub use params::ParamValue;
pub use tape::SignalTape;
pub use timing::SampleClock;
