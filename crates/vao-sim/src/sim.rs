//! Simulation Orchestrator — lifecycle, real-time scheduler, timers
//!
//! The simulation owns the nodes, the propagation model, the noise model,
//! and the clock. `run` binds every node's daemon and starts a dedicated
//! scheduler thread that paces the simulated ADC clock against wall time:
//!
//! ```text
//! ┌ scheduler tick ───────────────────────────────────────────────┐
//! │ sleep until t0 + t/irate                                      │
//! │ for each node: read tapes (purge) + noise → daemon.stream(..) │
//! │ t += iblksize                                                 │
//! │ fire timers with t_fire ≤ t                                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the loop falls behind it catches up without dropping frames; `t0`
//! stays anchored, so missed wall time is never reclaimed by shrinking
//! later sleeps.

use crate::daemon::{NodeClient, ProtocolDaemon, ProtocolSpec};
use crate::error::{SimError, SimResult};
use crate::node::{Node, NodeConfig};
use crate::propagation::{Channel, ChannelKey, Position, PropagationModel};
use crate::transmit;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::info;
use vao_core::frame;
use vao_core::noise::{NoiseSource, RedGaussianNoise};
use vao_core::params::ParamValue;
use vao_core::timing::SampleClock;
use vao_core::units::db2amp;

/// Frame-size cap: 353 f32 samples plus the 16-byte header keep a typical
/// UDP data packet under ~1430 bytes.
const MAX_FRAME_SAMPLES: usize = 353;

/// Upper bound on the automatic ADC block size.
const MAX_AUTO_IBLKSIZE: usize = 256;

/// Default ambient-noise level, dB re µPa.
const DEFAULT_NOISE_LEVEL_DB: f64 = 120.0;

/// Simulation configuration. Zero means "derive the default" for the
/// rates and the block size.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Nominal carrier frequency in Hz.
    pub frequency: f64,
    /// ADC rate in Sa/s; 0 derives 4 × frequency.
    pub irate: f64,
    /// DAC rate in Sa/s; 0 derives 8 × frequency. Must end up an integer
    /// multiple of the ADC rate.
    pub orate: f64,
    /// ADC block size in samples per channel; 0 picks one automatically.
    pub iblksize: usize,
    /// Transmit reference level, dB re µPa @ 1 m.
    pub txref: f64,
    /// ADC reference sensitivity, dB re 1/µPa.
    pub rxref: f64,
    /// Transmit processing headroom in seconds.
    pub txdelay: f64,
}

impl SimConfig {
    /// Configuration for a given carrier frequency, everything else
    /// derived.
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            ..Default::default()
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frequency: 24_000.0,
            irate: 0.0,
            orate: 0.0,
            iblksize: 0,
            txref: 185.0,
            rxref: -190.0,
            txdelay: 0.5,
        }
    }
}

/// One node plus its protocol daemon.
pub(crate) struct NodeSlot {
    pub(crate) node: Node,
    pub(crate) daemon: Box<dyn ProtocolDaemon>,
}

/// Scheduler state: the simulated sample index against its wall epoch.
pub(crate) struct SimTask {
    pub(crate) running: AtomicBool,
    pub(crate) t: AtomicI64,
    pub(crate) epoch: Mutex<Option<Instant>>,
}

/// A time-keyed callback, fired once by the scheduler.
pub(crate) struct Timer {
    t_fire: i64,
    callback: Box<dyn FnOnce(i64) + Send>,
}

pub(crate) struct SimCore {
    model: Box<dyn PropagationModel>,
    pub(crate) clock: SampleClock,
    pub(crate) irate: f64,
    pub(crate) orate: f64,
    pub(crate) txref: f64,
    pub(crate) rxref: f64,
    pub(crate) txdelay: f64,
    iblksize_cfg: usize,
    pub(crate) iblksize: AtomicUsize,
    noise: Mutex<Box<dyn NoiseSource>>,
    pub(crate) nodes: Mutex<Vec<Arc<NodeSlot>>>,
    timers: Mutex<Vec<Timer>>,
    pub(crate) task: SimTask,
    channels: Mutex<HashMap<ChannelKey, Arc<dyn Channel>>>,
}

impl SimCore {
    /// Current simulated sample index.
    pub(crate) fn now(&self) -> i64 {
        self.task.t.load(Ordering::SeqCst)
    }

    /// Channel from the model, memoized for the static scene.
    pub(crate) fn channel_for(
        &self,
        tx: &[Position],
        rx: &[Position],
    ) -> SimResult<Arc<dyn Channel>> {
        let key = ChannelKey::new(tx, rx, self.irate);
        if let Some(ch) = self.channels.lock().unwrap().get(&key) {
            return Ok(ch.clone());
        }
        let ch = self.model.channel(tx, rx, self.irate)?;
        self.channels.lock().unwrap().insert(key, ch.clone());
        Ok(ch)
    }

    /// Queue a callback at sample `t_fire`, keeping ascending order.
    /// Insertion after equal keys preserves scheduling order at one
    /// instant (ostart before ostop).
    pub(crate) fn schedule(&self, t_fire: i64, callback: Box<dyn FnOnce(i64) + Send>) {
        let mut timers = self.timers.lock().unwrap();
        let at = timers.partition_point(|e| e.t_fire <= t_fire);
        timers.insert(at, Timer { t_fire, callback });
    }

    fn pop_due_timer(&self, t: i64) -> Option<Timer> {
        let mut timers = self.timers.lock().unwrap();
        if timers.first().map_or(false, |e| e.t_fire <= t) {
            Some(timers.remove(0))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn timer_fire_times(&self) -> Vec<i64> {
        self.timers.lock().unwrap().iter().map(|e| e.t_fire).collect()
    }
}

/// The simulation: propagation model, nodes, clock, lifecycle.
pub struct Simulation {
    pub(crate) core: Arc<SimCore>,
    scheduler: Option<JoinHandle<()>>,
}

impl Simulation {
    /// Create a simulation over the given propagation model.
    pub fn new(model: impl PropagationModel + 'static, config: SimConfig) -> Self {
        let irate = if config.irate > 0.0 {
            config.irate
        } else {
            4.0 * config.frequency
        };
        let orate = if config.orate > 0.0 {
            config.orate
        } else {
            8.0 * config.frequency
        };
        Self {
            core: Arc::new(SimCore {
                model: Box::new(model),
                clock: SampleClock::new(irate),
                irate,
                orate,
                txref: config.txref,
                rxref: config.rxref,
                txdelay: config.txdelay,
                iblksize_cfg: config.iblksize,
                iblksize: AtomicUsize::new(config.iblksize),
                noise: Mutex::new(Box::new(RedGaussianNoise::new(db2amp(
                    DEFAULT_NOISE_LEVEL_DB,
                )))),
                nodes: Mutex::new(Vec::new()),
                timers: Mutex::new(Vec::new()),
                task: SimTask {
                    running: AtomicBool::new(false),
                    t: AtomicI64::new(0),
                    epoch: Mutex::new(None),
                },
                channels: Mutex::new(HashMap::new()),
            }),
            scheduler: None,
        }
    }

    /// Replace the ambient-noise model.
    pub fn set_noise(&self, noise: Box<dyn NoiseSource>) {
        *self.core.noise.lock().unwrap() = noise;
    }

    /// Add a node at `pos` with the given protocol daemon. Only allowed
    /// while the simulation is stopped; returns the node index.
    pub fn add_node(
        &self,
        pos: impl Into<Position>,
        config: NodeConfig,
        proto: impl ProtocolSpec,
    ) -> SimResult<usize> {
        if self.core.task.running.load(Ordering::SeqCst) {
            return Err(SimError::NodeWhileRunning);
        }
        if config.relpos.is_empty() {
            return Err(SimError::Config("a node needs at least one hydrophone".into()));
        }
        if config.ochannels > config.relpos.len() {
            return Err(SimError::Config(format!(
                "{} transmit channels but only {} hydrophone positions",
                config.ochannels,
                config.relpos.len()
            )));
        }
        let mut nodes = self.core.nodes.lock().unwrap();
        let index = nodes.len();
        let client: Arc<dyn NodeClient> = Arc::new(SimNodeClient {
            core: Arc::downgrade(&self.core),
            index,
        });
        let node = Node::new(pos.into(), config);
        let daemon = proto.build(client);
        nodes.push(Arc::new(NodeSlot { node, daemon }));
        Ok(index)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.core.nodes.lock().unwrap().len()
    }

    /// Receptions retained on a node's tapes (diagnostics).
    pub fn tape_depth(&self, node: usize) -> usize {
        self.core.nodes.lock().unwrap()[node].node.tape_depth()
    }

    /// Current simulated time in ADC samples.
    pub fn time(&self) -> i64 {
        self.core.now()
    }

    /// Effective ADC block size (resolved at `run` when configured as 0).
    pub fn iblksize(&self) -> usize {
        self.core.iblksize.load(Ordering::SeqCst)
    }

    /// True while the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.core.task.running.load(Ordering::SeqCst)
    }

    /// Validate the configuration, bind every daemon, and start the
    /// real-time scheduler.
    pub fn run(&mut self) -> SimResult<()> {
        let core = &self.core;
        if core.task.running.load(Ordering::SeqCst) {
            return Err(SimError::AlreadyRunning);
        }
        if core.irate <= 0.0 || core.orate <= 0.0 {
            return Err(SimError::Config("sample rates must be positive".into()));
        }
        let ratio = core.orate / core.irate;
        if ratio < 1.0 - 1e-9 || (ratio - ratio.round()).abs() > 1e-9 {
            return Err(SimError::RateMismatch {
                irate: core.irate,
                orate: core.orate,
            });
        }

        let nodes: Vec<Arc<NodeSlot>> = core.nodes.lock().unwrap().clone();
        let blk = if core.iblksize_cfg == 0 {
            let maxch = nodes
                .iter()
                .map(|s| s.node.hydrophones())
                .max()
                .unwrap_or(1);
            (MAX_FRAME_SAMPLES / maxch).clamp(1, MAX_AUTO_IBLKSIZE)
        } else {
            core.iblksize_cfg
        };
        core.iblksize.store(blk, Ordering::SeqCst);

        for (i, slot) in nodes.iter().enumerate() {
            if let Err(err) = slot.daemon.run() {
                for bound in &nodes[..i] {
                    bound.daemon.close();
                }
                return Err(err);
            }
        }

        core.task.t.store(0, Ordering::SeqCst);
        *core.task.epoch.lock().unwrap() = Some(Instant::now());
        core.task.running.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        self.scheduler = Some(
            thread::Builder::new()
                .name("vao-scheduler".into())
                .spawn(move || scheduler_loop(core))?,
        );
        info!(
            irate = self.core.irate,
            orate = self.core.orate,
            iblksize = blk,
            nodes = nodes.len(),
            "simulation running"
        );
        Ok(())
    }

    /// Stop the scheduler, tear down every daemon, and drop all nodes and
    /// timers. Idempotent.
    pub fn close(&mut self) {
        let core = &self.core;
        core.task.running.store(false, Ordering::SeqCst);
        *core.task.epoch.lock().unwrap() = None;
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
        core.task.t.store(0, Ordering::SeqCst);
        core.timers.lock().unwrap().clear();
        let nodes: Vec<Arc<NodeSlot>> = core.nodes.lock().unwrap().drain(..).collect();
        for slot in &nodes {
            slot.daemon.close();
        }
        core.channels.lock().unwrap().clear();
        info!("simulation closed");
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.close();
    }
}

/// The real-time loop: pace, produce, deliver, advance, fire.
fn scheduler_loop(core: Arc<SimCore>) {
    info!("scheduler started");
    loop {
        if !core.task.running.load(Ordering::SeqCst) {
            break;
        }
        let epoch = match *core.task.epoch.lock().unwrap() {
            Some(epoch) => epoch,
            None => break,
        };
        let t = core.task.t.load(Ordering::SeqCst);
        let deadline = epoch + core.clock.duration_to(t);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        if !core.task.running.load(Ordering::SeqCst) {
            break;
        }

        let blk = core.iblksize.load(Ordering::SeqCst);
        let nodes: Vec<Arc<NodeSlot>> = core.nodes.lock().unwrap().clone();
        let t_us = core.clock.to_micros(t);
        let noise_scale = db2amp(core.rxref) as f32;
        for slot in &nodes {
            let nch = slot.node.hydrophones();
            let mut cols = Vec::with_capacity(nch);
            for ch in 0..nch {
                let mut col = slot.node.tape(ch).lock().unwrap().read(t, blk, true);
                let ambient = core.noise.lock().unwrap().sample(blk, core.irate);
                for (s, n) in col.iter_mut().zip(ambient) {
                    *s += n * noise_scale;
                }
                cols.push(col);
            }
            let block = frame::interleave(&cols);
            let seqno = slot.node.next_seqno();
            slot.daemon.stream(t_us, seqno, nch as u16, &block);
        }

        let t_next = t + blk as i64;
        core.task.t.store(t_next, Ordering::SeqCst);

        while let Some(timer) = core.pop_due_timer(t_next) {
            (timer.callback)(t_next);
        }
    }
    info!("scheduler stopped");
}

/// The simulation side of the daemon ↔ node linkage: parameter surface
/// plus the transmit entry point, for one node.
struct SimNodeClient {
    core: Weak<SimCore>,
    index: usize,
}

impl SimNodeClient {
    fn slot(&self, core: &SimCore) -> Option<Arc<NodeSlot>> {
        core.nodes.lock().unwrap().get(self.index).cloned()
    }
}

impl NodeClient for SimNodeClient {
    fn get(&self, key: &str) -> Option<ParamValue> {
        let core = self.core.upgrade()?;
        let slot = self.slot(&core)?;
        let node = &slot.node;
        let value = match key {
            "time" => ParamValue::Int(core.clock.to_seconds(core.now()).round() as i64),
            "iseqno" => ParamValue::Int(node.seqno() as i64),
            "iblksize" => ParamValue::Int(core.iblksize.load(Ordering::SeqCst) as i64),
            "irate" => ParamValue::Float(core.irate),
            "irates" => ParamValue::FloatList(vec![core.irate]),
            "ichannels" => ParamValue::Int(node.hydrophones() as i64),
            "igain" => ParamValue::Float(node.igain()),
            "orate" => ParamValue::Float(core.orate),
            "orates" => ParamValue::FloatList(vec![core.orate]),
            "ochannels" => ParamValue::Int(node.ochannels() as i64),
            "ogain" => ParamValue::Float(node.ogain()),
            "omute" => ParamValue::Bool(node.mute()),
            "obufsize" => ParamValue::Int(node.obufsize() as i64),
            _ => return None,
        };
        Some(value)
    }

    fn set(&self, key: &str, value: ParamValue) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let Some(slot) = self.slot(&core) else {
            return;
        };
        let node = &slot.node;
        match key {
            // Writing any value to iseqno is a reset request.
            "iseqno" => node.reset_seqno(),
            "igain" => {
                if let Some(v) = value.as_f64() {
                    node.set_igain(v);
                }
            }
            "ogain" => {
                if let Some(v) = value.as_f64() {
                    node.set_ogain(v);
                }
            }
            "omute" => {
                if let Some(v) = value.as_bool() {
                    node.set_mute(v);
                }
            }
            "obufsize" => {
                if let Some(v) = value.as_i64() {
                    node.set_obufsize(v.max(0) as usize);
                }
            }
            _ => {} // unknown parameters are silently ignored
        }
    }

    fn transmit(
        &self,
        time_us: Option<u64>,
        x: Vec<Vec<f32>>,
        id: Option<Value>,
    ) -> SimResult<i64> {
        let core = self.core.upgrade().ok_or(SimError::Closed)?;
        let t_req = time_us.map_or(0, |us| core.clock.from_micros(us));
        transmit::transmit(&core, self.index, t_req, x, id)
    }
}
