//! Transmit Pipeline — DAC bursts onto every other node's tapes
//!
//! A burst arrives as a column-per-channel matrix of ±1 DAC samples. The
//! pipeline decimates it to the ADC rate, pushes it through the
//! propagation channel for the current geometry, scales by the transmit
//! and receive reference levels plus per-node gains, and appends the
//! delayed columns to the receiving hydrophone tapes. The transmitting
//! node is excluded from the receiver list (half-duplex: a node never
//! hears itself).
//!
//! The whole pipeline runs inline on the calling (command) thread, so the
//! returned start sample is observable before the handler replies and
//! every append lands before any ADC read that could include it.

use crate::error::{SimError, SimResult};
use crate::propagation::Position;
use crate::sim::{NodeSlot, SimCore};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use vao_core::units::db2amp;

/// Fire a DAC burst from node `index` at requested ADC sample `t_req`
/// (0 or past times are pushed out by the transmit headroom). Returns the
/// actual start sample.
pub(crate) fn transmit(
    core: &Arc<SimCore>,
    index: usize,
    t_req: i64,
    x: Vec<Vec<f32>>,
    id: Option<Value>,
) -> SimResult<i64> {
    let nodes: Vec<Arc<NodeSlot>> = core.nodes.lock().unwrap().clone();
    let slot = nodes
        .get(index)
        .cloned()
        .ok_or_else(|| SimError::Config(format!("no node {index}")))?;
    let now = core.now();
    if slot.node.mute() {
        return Ok(now);
    }

    let n_dac = x.first().map_or(0, |col| col.len());
    if n_dac == 0 {
        return Ok(now);
    }
    if x.len() > slot.node.ochannels() {
        return Err(SimError::Config(format!(
            "burst has {} channels but the node transmits on {}",
            x.len(),
            slot.node.ochannels()
        )));
    }

    // DAC runs at an integer multiple of the ADC rate; plain subsampling
    // brings the burst down to the tape rate.
    let factor = (core.orate / core.irate).round() as usize;
    let x: Vec<Vec<f32>> = if factor > 1 {
        x.into_iter()
            .map(|col| col.into_iter().step_by(factor).collect())
            .collect()
    } else {
        x
    };

    let tx_pos: Vec<Position> = x
        .iter()
        .enumerate()
        .map(|(ch, _)| slot.node.position() + slot.node.relpos()[ch])
        .collect();
    let mut rx_pos = Vec::new();
    let mut rx_map = Vec::new();
    for (j, other) in nodes.iter().enumerate() {
        if j == index {
            continue;
        }
        for (h, &rp) in other.node.relpos().iter().enumerate() {
            rx_pos.push(other.node.position() + rp);
            rx_map.push((j, h));
        }
    }

    let t_start = t_req.max(now + core.clock.from_seconds(core.txdelay));

    if !rx_pos.is_empty() {
        let channel = core.channel_for(&tx_pos, &rx_pos)?;
        let tx_scale = db2amp(core.txref + slot.node.ogain()) as f32;
        let scaled: Vec<Vec<f32>> = x
            .iter()
            .map(|col| col.iter().map(|&s| s * tx_scale).collect())
            .collect();
        let y = channel.transfer(&scaled)?;
        if y.len() != rx_map.len() {
            return Err(SimError::Propagation(format!(
                "channel produced {} outputs for {} receivers",
                y.len(),
                rx_map.len()
            )));
        }
        for (k, col) in y.into_iter().enumerate() {
            let (j, h) = rx_map[k];
            let other = &nodes[j].node;
            let rx_scale = db2amp(core.rxref + other.igain()) as f32;
            let col: Vec<f32> = col.into_iter().map(|s| s * rx_scale).collect();
            other.tape(h).lock().unwrap().append(t_start, col);
        }
    }

    let after = core.now();
    if after > t_start {
        let late_ms = core.clock.to_seconds(after - t_start) * 1e3;
        warn!("transmit finished {late_ms:.1} ms after its scheduled start");
    }

    // The client hears about the burst when the scheduler crosses its
    // start and stop instants.
    let n_adc = (n_dac as f64 * core.irate / core.orate).round() as i64;
    let t_stop = t_start + n_adc;
    let clock = core.clock;
    let start_slot = slot.clone();
    let start_id = id.clone();
    core.schedule(
        t_start,
        Box::new(move |_t| start_slot.daemon.event(clock.to_micros(t_start), "ostart", start_id)),
    );
    core.schedule(
        t_stop,
        Box::new(move |_t| slot.daemon.event(clock.to_micros(t_stop), "ostop", id)),
    );
    Ok(t_start)
}
