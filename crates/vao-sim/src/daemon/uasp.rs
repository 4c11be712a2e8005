//! UASP framing — UDP command channel plus UDP data channel
//!
//! Two UDP sockets: commands and notifications at `(ipaddr, baseport)`,
//! DAC data in at `(ipaddr, baseport + 1)`. Replies and notifications go
//! to the source address of the most recent command; `istart` designates a
//! separate data-out port toward the client for ADC frames.

use super::{handle_line, obufsize, DacBuffer, Disposition, NodeClient, ProtocolDaemon, ProtocolSpec};
use crate::error::SimResult;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use vao_core::frame::DataFrame;
use vao_core::protocol::EventNotification;

/// Receive poll interval: how quickly handler threads notice `close`.
const POLL: Duration = Duration::from_millis(200);

/// UASP daemon configuration: bind address and base port. The command
/// socket binds at `baseport`, the data socket at `baseport + 1`.
#[derive(Debug, Clone, Copy)]
pub struct Uasp {
    pub addr: IpAddr,
    pub baseport: u16,
}

impl Uasp {
    pub fn new(addr: IpAddr, baseport: u16) -> Self {
        Self { addr, baseport }
    }
}

impl ProtocolSpec for Uasp {
    fn build(self, client: Arc<dyn NodeClient>) -> Box<dyn ProtocolDaemon> {
        Box::new(UaspDaemon::new(self, client))
    }
}

/// UDP+UDP protocol daemon.
pub struct UaspDaemon {
    inner: Arc<Inner>,
}

impl UaspDaemon {
    fn new(spec: Uasp, client: Arc<dyn NodeClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: spec.addr,
                baseport: spec.baseport,
                client,
                dac: DacBuffer::new(),
                running: AtomicBool::new(false),
                cmd_sock: Mutex::new(None),
                data_sock: Mutex::new(None),
                ctl_peer: Mutex::new(None),
                data_dest: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    addr: IpAddr,
    baseport: u16,
    client: Arc<dyn NodeClient>,
    dac: DacBuffer,
    running: AtomicBool,
    cmd_sock: Mutex<Option<UdpSocket>>,
    data_sock: Mutex<Option<UdpSocket>>,
    /// Source of the most recent command: reply and notification target.
    ctl_peer: Mutex<Option<SocketAddr>>,
    /// ADC frame destination designated by `istart`.
    data_dest: Mutex<Option<SocketAddr>>,
}

impl ProtocolDaemon for UaspDaemon {
    fn run(&self) -> SimResult<()> {
        let inner = &self.inner;
        let dataport = inner.baseport.checked_add(1).ok_or_else(|| {
            crate::error::SimError::Config(format!("baseport {} leaves no data port", inner.baseport))
        })?;
        let cmd = UdpSocket::bind((inner.addr, inner.baseport))?;
        let data = UdpSocket::bind((inner.addr, dataport))?;
        cmd.set_read_timeout(Some(POLL))?;
        data.set_read_timeout(Some(POLL))?;
        *inner.cmd_sock.lock().unwrap() = Some(cmd.try_clone()?);
        *inner.data_sock.lock().unwrap() = Some(data.try_clone()?);
        inner.running.store(true, Ordering::SeqCst);
        info!(addr = %inner.addr, baseport = inner.baseport, "UASP daemon listening");

        let ctl = inner.clone();
        thread::Builder::new()
            .name("uasp-ctl".into())
            .spawn(move || ctl.command_loop(cmd))?;
        let dat = inner.clone();
        thread::Builder::new()
            .name("uasp-dat".into())
            .spawn(move || dat.data_loop(data))?;
        Ok(())
    }

    fn stream(&self, timestamp: u64, seqno: u64, nchannels: u16, block: &[f32]) {
        let dest = match *self.inner.data_dest.lock().unwrap() {
            Some(dest) => dest,
            None => return,
        };
        let guard = self.inner.data_sock.lock().unwrap();
        if let Some(sock) = guard.as_ref() {
            let frame = DataFrame::new(timestamp, seqno as u32, nchannels, block.to_vec());
            let _ = sock.send_to(&frame.to_bytes(), dest);
        }
    }

    fn event(&self, timestamp: u64, event: &str, id: Option<Value>) {
        let peer = match *self.inner.ctl_peer.lock().unwrap() {
            Some(peer) => peer,
            None => return,
        };
        let msg = EventNotification {
            event: event.to_string(),
            time: timestamp,
            id,
        };
        let line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(_) => return,
        };
        let guard = self.inner.cmd_sock.lock().unwrap();
        if let Some(sock) = guard.as_ref() {
            let _ = sock.send_to(format!("{line}\n").as_bytes(), peer);
        }
    }

    fn close(&self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::SeqCst);
        *inner.cmd_sock.lock().unwrap() = None;
        *inner.data_sock.lock().unwrap() = None;
        *inner.ctl_peer.lock().unwrap() = None;
        *inner.data_dest.lock().unwrap() = None;
        info!(baseport = inner.baseport, "UASP daemon closed");
    }
}

impl Inner {
    /// Command socket handler: one JSON line per datagram.
    fn command_loop(self: Arc<Self>, sock: UdpSocket) {
        let mut buf = vec![0u8; 65536];
        while self.running.load(Ordering::SeqCst) {
            let (n, src) = match sock.recv_from(&mut buf) {
                Ok(r) => r,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!(%err, "UASP command socket error");
                    }
                    break;
                }
            };
            *self.ctl_peer.lock().unwrap() = Some(src);
            let text = String::from_utf8_lossy(&buf[..n]);
            for line in text.lines() {
                match handle_line(line, &self.client, &self.dac, false) {
                    Disposition::None => {}
                    Disposition::Reply(json) => {
                        let _ = sock.send_to(format!("{json}\n").as_bytes(), src);
                    }
                    Disposition::StreamTo(port) => {
                        *self.data_dest.lock().unwrap() =
                            Some(SocketAddr::new(src.ip(), port));
                    }
                    Disposition::StreamStop => {
                        *self.data_dest.lock().unwrap() = None;
                    }
                }
            }
        }
    }

    /// Data socket handler: binary DAC frames, header consumed but ignored.
    fn data_loop(self: Arc<Self>, sock: UdpSocket) {
        let mut buf = vec![0u8; 65536];
        while self.running.load(Ordering::SeqCst) {
            let n = match sock.recv_from(&mut buf) {
                Ok((n, _src)) => n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!(%err, "UASP data socket error");
                    }
                    break;
                }
            };
            match DataFrame::payload_after_header(&buf[..n]) {
                Ok(samples) => self.dac.append(&samples, obufsize(&self.client)),
                Err(err) => warn!(%err, "bad DAC data packet, dropping"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vao_core::params::ParamValue;

    struct StubClient;

    impl NodeClient for StubClient {
        fn get(&self, key: &str) -> Option<ParamValue> {
            match key {
                "ochannels" => Some(ParamValue::Int(1)),
                "obufsize" => Some(ParamValue::Int(1024)),
                _ => None,
            }
        }

        fn set(&self, _key: &str, _value: ParamValue) {}

        fn transmit(
            &self,
            _time_us: Option<u64>,
            _x: Vec<Vec<f32>>,
            _id: Option<Value>,
        ) -> SimResult<i64> {
            Ok(0)
        }
    }

    #[test]
    fn test_version_over_udp() {
        let spec = Uasp::new("127.0.0.1".parse().unwrap(), 29810);
        let daemon = UaspDaemon::new(spec, Arc::new(StubClient));
        daemon.run().unwrap();

        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        sock.send_to(br#"{"action":"version","id":1}"#, "127.0.0.1:29810")
            .unwrap();
        let mut buf = [0u8; 4096];
        let (n, _) = sock.recv_from(&mut buf).unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]);
        assert!(reply.contains(r#""name":"VirtualAcousticOcean""#));
        daemon.close();
    }

    #[test]
    fn test_binary_dac_data_lands_in_buffer() {
        let spec = Uasp::new("127.0.0.1".parse().unwrap(), 29820);
        let daemon = UaspDaemon::new(spec, Arc::new(StubClient));
        daemon.run().unwrap();

        let mut packet = vec![0u8; 16];
        packet.extend_from_slice(&0.5f32.to_be_bytes());
        packet.extend_from_slice(&(-0.5f32).to_be_bytes());
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.send_to(&packet, "127.0.0.1:29821").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let got = daemon.inner.dac.take();
            if got == vec![0.5, -0.5] {
                break;
            }
            assert!(got.is_empty(), "unexpected buffer contents: {got:?}");
            assert!(
                std::time::Instant::now() < deadline,
                "DAC data never arrived"
            );
            std::thread::sleep(Duration::from_millis(20));
        }
        daemon.close();
    }
}
