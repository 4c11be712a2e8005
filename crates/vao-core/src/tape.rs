//! Signal Tape — Time-indexed accumulator of future receptions
//!
//! Each hydrophone owns one tape. Transmissions land on the tape as
//! `Reception`s (a start sample index plus a burst of samples); the
//! streaming loop reads fixed windows off the tape and purges whatever can
//! no longer be needed, which bounds memory to the in-flight arrivals.
//!
//! Contributions are additive and may arrive in any order: a later
//! transmission can have an earlier arrival time than one already on the
//! tape (shorter path), and a reception may straddle the current read
//! cursor. Clamping to ±1 happens at read time only, so overlapping
//! receptions sum at full precision before the ADC limit is applied.
//!
//! ## Example
//!
//! ```rust
//! use vao_core::tape::SignalTape;
//!
//! let mut tape = SignalTape::new();
//! tape.append(10, vec![0.25; 4]);
//! tape.append(12, vec![0.25; 4]);
//!
//! let x = tape.read(8, 8, true);
//! assert_eq!(x[0], 0.0);  // nothing before sample 10
//! assert_eq!(x[2], 0.25); // first reception only
//! assert_eq!(x[4], 0.5);  // both overlap at sample 12
//! ```

/// One contribution to a hydrophone: samples spanning
/// `[t_start, t_start + x.len())` in ADC sample indices.
#[derive(Debug, Clone)]
struct Reception {
    t_start: i64,
    x: Vec<f32>,
}

impl Reception {
    /// Index of the last sample covered by this reception.
    #[inline]
    fn last_index(&self) -> i64 {
        self.t_start + self.x.len() as i64 - 1
    }
}

/// Additive, purgeable buffer of future receptions for one hydrophone.
///
/// Not internally synchronized: callers that share a tape between the
/// transmit path and the streaming loop must wrap it in a lock.
#[derive(Debug, Default)]
pub struct SignalTape {
    receptions: Vec<Reception>,
}

impl SignalTape {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contribution starting at sample index `t_start`.
    ///
    /// Any start index is allowed, including ones before or straddling the
    /// current read cursor. Empty contributions are dropped.
    pub fn append(&mut self, t_start: i64, x: Vec<f32>) {
        if x.is_empty() {
            return;
        }
        self.receptions.push(Reception { t_start, x });
    }

    /// Read `n` samples starting at `t_start`: the sum of all overlapping
    /// receptions, clamped to [-1.0, +1.0].
    ///
    /// With `purge` set, receptions that end before `t_start + n` are
    /// dropped afterwards; they can never intersect a later window of a
    /// monotonically advancing reader.
    pub fn read(&mut self, t_start: i64, n: usize, purge: bool) -> Vec<f32> {
        let t_end = t_start + n as i64;
        let mut out = vec![0.0f32; n];
        for r in &self.receptions {
            let lo = r.t_start.max(t_start);
            let hi = (r.t_start + r.x.len() as i64).min(t_end);
            for t in lo..hi {
                out[(t - t_start) as usize] += r.x[(t - r.t_start) as usize];
            }
        }
        for s in &mut out {
            *s = s.clamp(-1.0, 1.0);
        }
        if purge {
            self.receptions.retain(|r| r.last_index() >= t_end);
        }
        out
    }

    /// Drop receptions that lie entirely before `t_keep_from`.
    pub fn purge(&mut self, t_keep_from: i64) {
        self.receptions.retain(|r| r.last_index() >= t_keep_from);
    }

    /// Number of receptions currently retained.
    pub fn depth(&self) -> usize {
        self.receptions.len()
    }

    /// True when no receptions are retained.
    pub fn is_empty(&self) -> bool {
        self.receptions.is_empty()
    }
}
