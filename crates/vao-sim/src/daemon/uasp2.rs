//! UASP2 framing — TCP command channel plus UDP data-out channel
//!
//! A TCP listener accepts one client command connection at a time:
//! line-delimited JSON in both directions, with notifications and
//! get-responses written back on the same connection. After a disconnect
//! the daemon waits for the next client. DAC data arrives in-band as a
//! base64-encoded `odata` field; ADC frames are pushed over a single UDP
//! socket to `(client_host, istart.port)`.

use super::{handle_line, DacBuffer, Disposition, NodeClient, ProtocolDaemon, ProtocolSpec};
use crate::error::SimResult;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use vao_core::frame::DataFrame;
use vao_core::protocol::EventNotification;

/// Poll interval for accept and read: how quickly threads notice `close`.
const POLL: Duration = Duration::from_millis(200);

/// UASP2 daemon configuration: TCP bind address and port.
#[derive(Debug, Clone, Copy)]
pub struct Uasp2 {
    pub addr: IpAddr,
    pub port: u16,
}

impl Uasp2 {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl ProtocolSpec for Uasp2 {
    fn build(self, client: Arc<dyn NodeClient>) -> Box<dyn ProtocolDaemon> {
        Box::new(Uasp2Daemon::new(self, client))
    }
}

/// TCP+UDP protocol daemon.
pub struct Uasp2Daemon {
    inner: Arc<Inner>,
}

impl Uasp2Daemon {
    fn new(spec: Uasp2, client: Arc<dyn NodeClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: spec.addr,
                port: spec.port,
                client,
                dac: DacBuffer::new(),
                running: AtomicBool::new(false),
                conn: Mutex::new(None),
                data_sock: Mutex::new(None),
                data_dest: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    addr: IpAddr,
    port: u16,
    client: Arc<dyn NodeClient>,
    dac: DacBuffer,
    running: AtomicBool,
    /// Write half of the current client connection, shared between the
    /// reader thread (responses) and the simulation (notifications).
    conn: Mutex<Option<TcpStream>>,
    data_sock: Mutex<Option<UdpSocket>>,
    /// ADC frame destination designated by `istart`.
    data_dest: Mutex<Option<SocketAddr>>,
}

impl ProtocolDaemon for Uasp2Daemon {
    fn run(&self) -> SimResult<()> {
        let inner = &self.inner;
        let listener = TcpListener::bind((inner.addr, inner.port))?;
        listener.set_nonblocking(true)?;
        let udp = UdpSocket::bind((inner.addr, 0))?;
        *inner.data_sock.lock().unwrap() = Some(udp);
        inner.running.store(true, Ordering::SeqCst);
        info!(addr = %inner.addr, port = inner.port, "UASP2 daemon listening");

        let ctl = inner.clone();
        thread::Builder::new()
            .name("uasp2-ctl".into())
            .spawn(move || ctl.accept_loop(listener))?;
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
        let msg = EventNotification {
            event: event.to_string(),
            time: timestamp,
            id,
        };
        if let Ok(line) = serde_json::to_string(&msg) {
            self.inner.send_line(&line);
        }
    }

    fn close(&self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::SeqCst);
        if let Some(conn) = inner.conn.lock().unwrap().take() {
            let _ = conn.shutdown(std::net::Shutdown::Both);
        }
        *inner.data_sock.lock().unwrap() = None;
        *inner.data_dest.lock().unwrap() = None;
        info!(port = inner.port, "UASP2 daemon closed");
    }
}

impl Inner {
    /// Write one JSON line to the current client, if any. Failures are
    /// swallowed; a vanished peer is rediscovered on its next connect.
    fn send_line(&self, line: &str) {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.as_mut() {
            let _ = writeln!(conn, "{line}");
        }
    }

    /// Accept one client at a time; serve its line stream until EOF.
    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, port = self.port, "UASP2 client connected");
                    if let Err(err) = self.serve_client(stream, peer) {
                        warn!(%err, "UASP2 connection error");
                    }
                    *self.conn.lock().unwrap() = None;
                    info!(%peer, "UASP2 client disconnected");
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL);
                }
                Err(err) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!(%err, "UASP2 accept error");
                        thread::sleep(POLL);
                    }
                }
            }
        }
    }

    fn serve_client(&self, stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL))?;
        *self.conn.lock().unwrap() = Some(stream.try_clone()?);

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        while self.running.load(Ordering::SeqCst) {
            match reader.read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {
                    match handle_line(&line, &self.client, &self.dac, true) {
                        Disposition::None => {}
                        Disposition::Reply(json) => self.send_line(&json),
                        Disposition::StreamTo(port) => {
                            *self.data_dest.lock().unwrap() =
                                Some(SocketAddr::new(peer.ip(), port));
                        }
                        Disposition::StreamStop => {
                            *self.data_dest.lock().unwrap() = None;
                        }
                    }
                    line.clear();
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // Timed out mid-line: whatever arrived stays in `line`
                    // and the next read continues it.
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
