//! Propagation Adapter — the seam to the underwater channel model
//!
//! The simulator treats propagation as an opaque service: given
//! transmitter positions, receiver positions, and a sample rate, the model
//! hands back a [`Channel`] operator. Applying the channel to a
//! column-per-channel source matrix yields one received column per
//! receiver, with the propagation delay embedded relative to the
//! transmission instant (row `r` of the output lands at absolute sample
//! `t_start + r` once the transmit pipeline places it on a tape).
//!
//! The scene is quasi-static: positions are taken at the transmission
//! instant and no Doppler is modelled, which lets a static simulation
//! memoize channels by `(tx_positions, rx_positions, fs)`.
//!
//! A simple isovelocity direct-path model is bundled so the simulator is
//! usable and testable without an external model; richer physics plugs in
//! through the same traits.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::Arc;

/// A point in the simulation frame: metres, z negative downward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Create a position from coordinates in metres.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position in metres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl From<(f64, f64, f64)> for Position {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Position::new(x, y, z)
    }
}

/// A channel operator produced by a propagation model.
pub trait Channel: Send + Sync {
    /// Apply the channel to a source matrix (one column per transmit
    /// element, equal lengths) and return one column per receiver.
    ///
    /// Output columns are delay-aligned to the transmission instant: row
    /// `r` is the pressure `r` samples after the source started.
    fn transfer(&self, x: &[Vec<f32>]) -> SimResult<Vec<Vec<f32>>>;
}

/// An underwater propagation model.
pub trait PropagationModel: Send + Sync {
    /// Build a channel from `tx` elements to `rx` elements at sample rate
    /// `fs`.
    fn channel(
        &self,
        tx: &[Position],
        rx: &[Position],
        fs: f64,
    ) -> SimResult<Arc<dyn Channel>>;
}

/// Memoization key for static scenes: bit-exact position coordinates plus
/// the sample rate. `f64::to_bits` gives the stable serialization hashing
/// needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChannelKey(Vec<u64>);

impl ChannelKey {
    pub(crate) fn new(tx: &[Position], rx: &[Position], fs: f64) -> Self {
        let mut bits = Vec::with_capacity(3 * (tx.len() + rx.len()) + 2);
        bits.push(tx.len() as u64);
        for p in tx.iter().chain(rx.iter()) {
            bits.push(p.x.to_bits());
            bits.push(p.y.to_bits());
            bits.push(p.z.to_bits());
        }
        bits.push(fs.to_bits());
        Self(bits)
    }
}

/// Direct-path isovelocity model: a single ray per (tx, rx) pair with
/// geometric delay and spherical spreading loss.
#[derive(Debug, Clone, Copy)]
pub struct IsovelocityModel {
    /// Sound speed in m/s.
    sound_speed: f64,
}

impl IsovelocityModel {
    /// Create a model with the given sound speed in m/s.
    pub fn new(sound_speed: f64) -> Self {
        Self { sound_speed }
    }

    /// Sound speed in m/s.
    pub fn sound_speed(&self) -> f64 {
        self.sound_speed
    }
}

impl Default for IsovelocityModel {
    fn default() -> Self {
        Self::new(1540.0)
    }
}

impl PropagationModel for IsovelocityModel {
    fn channel(
        &self,
        tx: &[Position],
        rx: &[Position],
        fs: f64,
    ) -> SimResult<Arc<dyn Channel>> {
        if fs <= 0.0 {
            return Err(SimError::Propagation(format!("bad sample rate {fs}")));
        }
        let paths = rx
            .iter()
            .map(|r| {
                tx.iter()
                    .map(|t| {
                        let d = t.distance_to(r);
                        Path {
                            delay: (d / self.sound_speed * fs).round() as usize,
                            // Spherical spreading, clamped at the 1 m reference.
                            gain: (1.0 / d.max(1.0)) as f32,
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(Arc::new(IsovelocityChannel {
            ntx: tx.len(),
            paths,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Path {
    delay: usize,
    gain: f32,
}

/// Channel operator for [`IsovelocityModel`]: `paths[rx][tx]`.
struct IsovelocityChannel {
    ntx: usize,
    paths: Vec<Vec<Path>>,
}

impl Channel for IsovelocityChannel {
    fn transfer(&self, x: &[Vec<f32>]) -> SimResult<Vec<Vec<f32>>> {
        if x.len() != self.ntx {
            return Err(SimError::Propagation(format!(
                "channel built for {} sources, got {}",
                self.ntx,
                x.len()
            )));
        }
        let out = self
            .paths
            .iter()
            .map(|paths| {
                let len = paths
                    .iter()
                    .zip(x)
                    .map(|(p, col)| p.delay + col.len())
                    .max()
                    .unwrap_or(0);
                let mut y = vec![0.0f32; len];
                for (p, col) in paths.iter().zip(x) {
                    for (i, &s) in col.iter().enumerate() {
                        y[p.delay + i] += s * p.gain;
                    }
                }
                y
            })
            .collect();
        Ok(out)
    }
}
