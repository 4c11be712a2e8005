//! Node — one simulated acoustic modem
//!
//! A node is a data aggregate: a position, hydrophone offsets (the first
//! `ochannels` of which are transmit-capable), gains, a mute flag, the ADC
//! block sequence counter, and one signal tape per hydrophone. Its
//! behaviour lives elsewhere — the scheduler reads its tapes, the transmit
//! pipeline appends to other nodes' tapes, and its protocol daemon reads
//! and writes its parameters.

use crate::propagation::Position;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use vao_core::tape::SignalTape;

/// Default DAC burst buffer capacity in samples.
pub const DEFAULT_OBUFSIZE: usize = 1_920_000;

/// Configuration for a node added to the simulation.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hydrophone offsets relative to the node position; one tape each.
    /// The first `ochannels` offsets are also transmit elements.
    pub relpos: Vec<Position>,
    /// Number of transmit-capable channels.
    pub ochannels: usize,
    /// ADC gain in dB.
    pub igain: f64,
    /// DAC gain in dB.
    pub ogain: f64,
    /// DAC mute: a muted node transmits nothing.
    pub mute: bool,
    /// DAC burst buffer capacity in samples.
    pub obufsize: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            relpos: vec![Position::new(0.0, 0.0, 0.0)],
            ochannels: 1,
            igain: 0.0,
            ogain: 0.0,
            mute: false,
            obufsize: DEFAULT_OBUFSIZE,
        }
    }
}

/// Mutable node controls, adjusted over the control plane.
#[derive(Debug, Clone)]
struct NodeCtl {
    igain: f64,
    ogain: f64,
    mute: bool,
    obufsize: usize,
}

/// One simulated modem.
#[derive(Debug)]
pub struct Node {
    pos: Position,
    relpos: Vec<Position>,
    ochannels: usize,
    ctl: Mutex<NodeCtl>,
    seqno: AtomicU64,
    tapes: Vec<Mutex<SignalTape>>,
}

impl Node {
    pub(crate) fn new(pos: Position, config: NodeConfig) -> Self {
        let tapes = config
            .relpos
            .iter()
            .map(|_| Mutex::new(SignalTape::new()))
            .collect();
        Self {
            pos,
            relpos: config.relpos,
            ochannels: config.ochannels,
            ctl: Mutex::new(NodeCtl {
                igain: config.igain,
                ogain: config.ogain,
                mute: config.mute,
                obufsize: config.obufsize,
            }),
            seqno: AtomicU64::new(0),
            tapes,
        }
    }

    /// Node position in the simulation frame.
    pub fn position(&self) -> Position {
        self.pos
    }

    /// Hydrophone offsets relative to the node position.
    pub fn relpos(&self) -> &[Position] {
        &self.relpos
    }

    /// Number of hydrophones (= number of tapes).
    pub fn hydrophones(&self) -> usize {
        self.relpos.len()
    }

    /// Number of transmit-capable channels.
    pub fn ochannels(&self) -> usize {
        self.ochannels
    }

    /// The tape for hydrophone `ch`.
    pub(crate) fn tape(&self, ch: usize) -> &Mutex<SignalTape> {
        &self.tapes[ch]
    }

    /// Receptions currently retained across all tapes.
    pub fn tape_depth(&self) -> usize {
        self.tapes.iter().map(|t| t.lock().unwrap().depth()).sum()
    }

    pub fn igain(&self) -> f64 {
        self.ctl.lock().unwrap().igain
    }

    pub fn set_igain(&self, db: f64) {
        self.ctl.lock().unwrap().igain = db;
    }

    pub fn ogain(&self) -> f64 {
        self.ctl.lock().unwrap().ogain
    }

    pub fn set_ogain(&self, db: f64) {
        self.ctl.lock().unwrap().ogain = db;
    }

    pub fn mute(&self) -> bool {
        self.ctl.lock().unwrap().mute
    }

    pub fn set_mute(&self, mute: bool) {
        self.ctl.lock().unwrap().mute = mute;
    }

    pub fn obufsize(&self) -> usize {
        self.ctl.lock().unwrap().obufsize
    }

    pub fn set_obufsize(&self, samples: usize) {
        self.ctl.lock().unwrap().obufsize = samples;
    }

    /// Sequence number the next ADC block will carry.
    pub fn seqno(&self) -> u64 {
        self.seqno.load(Ordering::SeqCst)
    }

    /// Claim the next block sequence number (wrapping).
    pub(crate) fn next_seqno(&self) -> u64 {
        self.seqno.fetch_add(1, Ordering::SeqCst)
    }

    /// Reset the sequence counter; any `iseqno` write means this.
    pub fn reset_seqno(&self) {
        self.seqno.store(0, Ordering::SeqCst);
    }
}
