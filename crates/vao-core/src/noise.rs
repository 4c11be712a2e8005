//! Noise Sources — stationary ambient-noise generators
//!
//! The streaming loop asks the noise model for a fresh block per
//! hydrophone per tick, so sources are stateful generators rather than
//! precomputed buffers. Amplitudes are µPa-scaled: the caller applies the
//! ADC reference sensitivity when mixing noise into an outgoing block.
//!
//! The default ocean model is red Gaussian noise (-20 dB/decade spectral
//! slope), matching the low-frequency shipping-dominated ambient spectrum.
//! Any other process can be plugged in through [`NoiseSource`].
//!
//! ## Example
//!
//! ```rust
//! use vao_core::noise::{NoiseSource, RedGaussianNoise};
//!
//! let mut noise = RedGaussianNoise::with_seed(1e6, 42);
//! let block = noise.sample(256, 96_000.0);
//! assert_eq!(block.len(), 256);
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// A stationary random-sample generator.
pub trait NoiseSource: Send {
    /// Produce `n` samples of the process at sample rate `fs`.
    fn sample(&mut self, n: usize, fs: f64) -> Vec<f32>;
}

/// Pole of the leaky integrator shaping the red spectrum. Close to unity:
/// the -20 dB/decade slope holds above a sub-hertz corner at audio rates.
const RED_POLE: f64 = 0.995;

/// Red Gaussian noise: white Gaussian noise through a one-pole leaky
/// integrator, scaled so the output RMS equals `amplitude`.
///
/// The leaky pole keeps the process stationary, unlike a plain cumulative
/// sum which drifts without bound.
#[derive(Debug)]
pub struct RedGaussianNoise {
    amplitude: f64,
    rng: StdRng,
    state: f64,
}

impl RedGaussianNoise {
    /// Create with the given RMS amplitude (µPa-scaled).
    pub fn new(amplitude: f64) -> Self {
        Self {
            amplitude,
            rng: StdRng::from_entropy(),
            state: 0.0,
        }
    }

    /// Create with a fixed seed, for reproducible runs.
    pub fn with_seed(amplitude: f64, seed: u64) -> Self {
        Self {
            amplitude,
            rng: StdRng::seed_from_u64(seed),
            state: 0.0,
        }
    }

    /// RMS amplitude of the process.
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }
}

impl NoiseSource for RedGaussianNoise {
    fn sample(&mut self, n: usize, _fs: f64) -> Vec<f32> {
        // x[k] = a·x[k-1] + sqrt(1-a²)·w[k] has unit variance for unit w.
        let gain = (1.0 - RED_POLE * RED_POLE).sqrt();
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n)
            .map(|_| {
                self.state = RED_POLE * self.state + gain * normal.sample(&mut self.rng);
                (self.state * self.amplitude) as f32
            })
            .collect()
    }
}

/// White Gaussian noise with a fixed RMS amplitude.
#[derive(Debug)]
pub struct WhiteGaussianNoise {
    amplitude: f64,
    rng: StdRng,
}

impl WhiteGaussianNoise {
    /// Create with the given RMS amplitude (µPa-scaled).
    pub fn new(amplitude: f64) -> Self {
        Self {
            amplitude,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create with a fixed seed, for reproducible runs.
    pub fn with_seed(amplitude: f64, seed: u64) -> Self {
        Self {
            amplitude,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl NoiseSource for WhiteGaussianNoise {
    fn sample(&mut self, n: usize, _fs: f64) -> Vec<f32> {
        let normal = Normal::new(0.0, self.amplitude).unwrap();
        (0..n)
            .map(|_| normal.sample(&mut self.rng) as f32)
            .collect()
    }
}

/// A silent source, for simulations that want a noise-free ocean.
#[derive(Debug, Default)]
pub struct NoNoise;

impl NoiseSource for NoNoise {
    fn sample(&mut self, n: usize, _fs: f64) -> Vec<f32> {
        vec![0.0; n]
    }
}
