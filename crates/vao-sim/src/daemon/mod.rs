//! Protocol Daemons — per-node control and data planes
//!
//! Every node owns one daemon. The control plane is newline-terminated
//! JSON (request/response/notification); the data plane is binary sample
//! frames. Two framings share the contract:
//!
//! ```text
//! UASP   client ──UDP──> (ipaddr, baseport)     commands + notifications
//!        client ──UDP──> (ipaddr, baseport+1)   DAC data in
//!        daemon ──UDP──> (client, istart.port)  ADC frames out
//!
//! UASP2  client <─TCP──> (ipaddr, port)         commands, notifications,
//!                                               DAC data in (base64)
//!        daemon ──UDP──> (client, istart.port)  ADC frames out
//! ```
//!
//! The daemon talks to its node through [`NodeClient`], a narrow two-way
//! seam: parameter get/set plus transmit. The simulation injects itself as
//! the concrete implementor, which keeps the daemons free of simulation
//! internals (and testable against a stub).

pub mod uasp;
pub mod uasp2;

use crate::error::SimResult;
use crate::node::DEFAULT_OBUFSIZE;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use vao_core::frame::{deinterleave, DataFrame};
use vao_core::params::ParamValue;
use vao_core::protocol::{ParamResponse, Request, VersionResponse};

/// The node-side surface a daemon drives.
pub trait NodeClient: Send + Sync {
    /// Read a parameter; `None` for unknown keys.
    fn get(&self, key: &str) -> Option<ParamValue>;

    /// Write a parameter; unknown keys are silently ignored.
    fn set(&self, key: &str, value: ParamValue);

    /// Fire a DAC burst (column per transmit channel) at `time_us`
    /// (µs since the epoch; `None` means as soon as possible). Returns the
    /// actual start in ADC samples.
    fn transmit(
        &self,
        time_us: Option<u64>,
        x: Vec<Vec<f32>>,
        id: Option<Value>,
    ) -> SimResult<i64>;
}

/// The daemon surface the simulation drives.
pub trait ProtocolDaemon: Send + Sync {
    /// Bind sockets and spin up handler threads.
    fn run(&self) -> SimResult<()>;

    /// Push one ADC frame (channel-interleaved) toward the streaming
    /// client, if any. Send failures are swallowed.
    fn stream(&self, timestamp: u64, seqno: u64, nchannels: u16, block: &[f32]);

    /// Push an asynchronous notification toward the control client.
    fn event(&self, timestamp: u64, event: &str, id: Option<Value>);

    /// Release sockets and stop handler threads.
    fn close(&self);
}

/// A daemon configuration that can be bound to a node.
///
/// Implemented by [`uasp::Uasp`] and [`uasp2::Uasp2`]; `Simulation::add_node`
/// consumes one and wires the daemon to its node through the client seam.
pub trait ProtocolSpec {
    fn build(self, client: Arc<dyn NodeClient>) -> Box<dyn ProtocolDaemon>;
}

/// The DAC burst buffer: ±1-scaled floats accumulated by `odata` and
/// consumed whole by `ostart`.
#[derive(Debug, Default)]
pub(crate) struct DacBuffer {
    buf: Mutex<Vec<f32>>,
}

impl DacBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append samples, dropping whatever exceeds `capacity`.
    pub(crate) fn append(&self, samples: &[f32], capacity: usize) {
        let mut buf = self.buf.lock().unwrap();
        let room = capacity.saturating_sub(buf.len());
        if room < samples.len() {
            warn!(
                dropped = samples.len() - room,
                capacity, "DAC buffer full, dropping samples"
            );
        }
        buf.extend_from_slice(&samples[..room.min(samples.len())]);
    }

    pub(crate) fn clear(&self) {
        self.buf.lock().unwrap().clear();
    }

    /// Snapshot and clear in one step, atomic against concurrent appends.
    pub(crate) fn take(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buf.lock().unwrap())
    }
}

/// What the framing layer should do after a command was handled.
///
/// The dispatcher is framing-agnostic: it cannot send anything itself, and
/// only the framing layer knows the requester's address.
pub(crate) enum Disposition {
    /// Nothing to send.
    None,
    /// Send this JSON line back to the requester.
    Reply(String),
    /// `istart`: stream ADC frames to this port at the requester's host.
    StreamTo(u16),
    /// `istop`: forget the streaming destination.
    StreamStop,
}

/// Handle one control-plane line. Shared by both framings; `inband_odata`
/// is set only for UASP2, where DAC data rides the command channel.
pub(crate) fn handle_line(
    line: &str,
    client: &Arc<dyn NodeClient>,
    dac: &DacBuffer,
    inband_odata: bool,
) -> Disposition {
    let line = line.trim();
    if line.is_empty() {
        return Disposition::None;
    }
    let req = match serde_json::from_str::<Request>(line) {
        Ok(req) => req,
        Err(err) => {
            warn!(%err, line, "bad command");
            return Disposition::None;
        }
    };
    match req {
        Request::Version { id } => Disposition::Reply(to_line(&VersionResponse::new(
            env!("CARGO_PKG_VERSION"),
            id,
        ))),
        Request::Ireset {} => {
            client.set("iseqno", ParamValue::Int(0));
            Disposition::None
        }
        Request::Istart { port } => Disposition::StreamTo(port),
        Request::Istop {} => Disposition::StreamStop,
        Request::Oclear {} => {
            dac.clear();
            Disposition::None
        }
        Request::Odata { data } => {
            if inband_odata {
                handle_odata(&data, client, dac);
            } else {
                warn!("odata is not carried in-band on this framing");
            }
            Disposition::None
        }
        Request::Ostart { time, id } => {
            handle_ostart(client, dac, time, id);
            Disposition::None
        }
        Request::Ostop {} | Request::Quit {} => Disposition::None,
        Request::Get { param, id } => match client.get(&param) {
            Some(value) => Disposition::Reply(to_line(&ParamResponse { param, value, id })),
            None => Disposition::None,
        },
        Request::Set { param, value } => {
            client.set(&param, value);
            Disposition::None
        }
    }
}

/// Append base64-encoded DAC samples (UASP2 in-band path). The 16 header
/// bytes are consumed but ignored, as on the binary data socket.
fn handle_odata(data: &str, client: &Arc<dyn NodeClient>, dac: &DacBuffer) {
    let bytes = match BASE64.decode(data.as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "bad odata payload, dropping");
            return;
        }
    };
    match DataFrame::payload_after_header(&bytes) {
        Ok(samples) => dac.append(&samples, obufsize(client)),
        Err(err) => warn!(%err, "bad odata payload, dropping"),
    }
}

/// Snapshot the DAC buffer as a column-per-channel matrix and fire it.
fn handle_ostart(
    client: &Arc<dyn NodeClient>,
    dac: &DacBuffer,
    time: Option<u64>,
    id: Option<Value>,
) {
    let ochannels = client
        .get("ochannels")
        .and_then(|v| v.as_i64())
        .unwrap_or(1)
        .max(1) as usize;
    let data = dac.take();
    if data.len() % ochannels != 0 {
        warn!(
            dropped = data.len() % ochannels,
            "DAC buffer is not a whole number of frames, dropping the tail"
        );
    }
    let x = deinterleave(&data, ochannels);
    if x.first().map_or(true, |col| col.is_empty()) {
        debug!("ostart with an empty DAC buffer");
        return;
    }
    // time == 0 means "as soon as possible".
    if let Err(err) = client.transmit(time.filter(|&t| t > 0), x, id) {
        warn!(%err, "transmit failed, burst dropped");
    }
}

/// DAC buffer capacity as currently configured on the node.
pub(crate) fn obufsize(client: &Arc<dyn NodeClient>) -> usize {
    client
        .get("obufsize")
        .and_then(|v| v.as_i64())
        .map(|v| v.max(0) as usize)
        .unwrap_or(DEFAULT_OBUFSIZE)
}

fn to_line<T: serde::Serialize>(msg: &T) -> String {
    // Serialization of our own response types cannot fail.
    serde_json::to_string(msg).unwrap_or_default()
}
