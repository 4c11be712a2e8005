//! End-to-end scenarios over real sockets: a client talks to the daemons
//! exactly as an external modem driver would.

use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use vao_core::frame::DataFrame;
use vao_core::noise::NoNoise;
use vao_sim::{
    IsovelocityModel, NodeConfig, Position, PropagationModel, SimConfig, SimError, Simulation,
    Uasp, Uasp2,
};

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn connect_retry(addr: &str) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match TcpStream::connect(addr) {
            Ok(conn) => return conn,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(err) => panic!("connect to {addr} failed: {err}"),
        }
    }
}

fn send_line(conn: &mut TcpStream, line: &str) {
    conn.write_all(format!("{line}\n").as_bytes()).unwrap();
}

/// Read one newline-terminated JSON object, waiting up to `timeout`.
/// Returns `None` if nothing arrives in time.
fn read_json_line(conn: &mut TcpStream, timeout: Duration) -> Option<Value> {
    conn.set_read_timeout(Some(timeout)).unwrap();
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match conn.read(&mut byte) {
            Ok(0) => return None,
            Ok(_) => {
                if byte[0] == b'\n' {
                    return Some(serde_json::from_slice(&buf).unwrap());
                }
                buf.push(byte[0]);
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return None;
            }
            Err(err) => panic!("read failed: {err}"),
        }
    }
}

fn recv_frame(sock: &UdpSocket, timeout: Duration) -> Option<DataFrame> {
    sock.set_read_timeout(Some(timeout)).unwrap();
    let mut buf = vec![0u8; 65536];
    match sock.recv_from(&mut buf) {
        Ok((n, _)) => Some(DataFrame::from_bytes(&buf[..n]).unwrap()),
        Err(ref e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            None
        }
        Err(err) => panic!("recv failed: {err}"),
    }
}

fn odata_json(samples: &[f32]) -> String {
    let mut bytes = vec![0u8; 16]; // header bytes are ignored by the daemon
    for s in samples {
        bytes.extend_from_slice(&s.to_be_bytes());
    }
    format!(r#"{{"action":"odata","data":"{}"}}"#, BASE64.encode(&bytes))
}

/// Version handshake over UASP2: one JSON request, one JSON response.
#[test]
fn version_handshake_over_uasp2() {
    let mut sim = Simulation::new(IsovelocityModel::default(), SimConfig::new(24_000.0));
    sim.add_node(
        (0.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp2::new(localhost(), 19809),
    )
    .unwrap();
    sim.run().unwrap();

    let mut conn = connect_retry("127.0.0.1:19809");
    send_line(&mut conn, r#"{"action":"version","id":7}"#);
    let reply = read_json_line(&mut conn, Duration::from_secs(3)).expect("no version response");
    assert_eq!(reply["name"], "VirtualAcousticOcean");
    assert_eq!(reply["protocol"], "0.2.0");
    assert_eq!(reply["id"], 7);

    sim.close();
}

/// Streaming cadence over UASP: 96 kSa/s in 256-sample blocks is 375
/// frames per second, seqno strictly consecutive.
#[test]
fn streaming_cadence_over_uasp() {
    let mut sim = Simulation::new(IsovelocityModel::default(), SimConfig::new(24_000.0));
    sim.set_noise(Box::new(NoNoise));
    sim.add_node(
        (0.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp::new(localhost(), 19812),
    )
    .unwrap();
    sim.run().unwrap();
    assert_eq!(sim.iblksize(), 256);

    let cmd = UdpSocket::bind("127.0.0.1:0").unwrap();
    let data = UdpSocket::bind("127.0.0.1:0").unwrap();
    let dport = data.local_addr().unwrap().port();

    cmd.send_to(
        br#"{"action":"get","param":"iseqno","id":1}"#,
        "127.0.0.1:19812",
    )
    .unwrap();
    cmd.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut buf = [0u8; 4096];
    let (n, _) = cmd.recv_from(&mut buf).unwrap();
    let reply: Value = serde_json::from_str(String::from_utf8_lossy(&buf[..n]).trim()).unwrap();
    let seqno_before = reply["value"].as_u64().unwrap();

    cmd.send_to(
        format!(r#"{{"action":"istart","port":{dport}}}"#).as_bytes(),
        "127.0.0.1:19812",
    )
    .unwrap();

    // Collect frames until the timestamps span a full second of ADC time.
    let mut frames = Vec::new();
    let wall_deadline = Instant::now() + Duration::from_secs(5);
    let mut ts0 = None;
    while Instant::now() < wall_deadline {
        let Some(frame) = recv_frame(&data, Duration::from_millis(500)) else {
            continue;
        };
        let ts0 = *ts0.get_or_insert(frame.timestamp);
        let done = frame.timestamp >= ts0 + 1_000_000;
        frames.push(frame);
        if done {
            break;
        }
    }
    cmd.send_to(br#"{"action":"istop"}"#, "127.0.0.1:19812").unwrap();
    sim.close();

    let ts0 = frames.first().expect("no frames received").timestamp;
    let in_window: Vec<_> = frames
        .iter()
        .filter(|f| f.timestamp < ts0 + 1_000_000)
        .collect();
    assert!(
        (374..=376).contains(&in_window.len()),
        "frames in 1 s: {}",
        in_window.len()
    );
    for pair in in_window.windows(2) {
        assert_eq!(pair[1].seqno, pair[0].seqno + 1, "seqno gap");
    }
    assert!(u64::from(in_window[0].seqno) >= seqno_before);
    for frame in &in_window {
        assert_eq!(frame.nchannels, 1);
        assert_eq!(frame.samples.len(), 256);
    }
}

/// Pure-delay propagation stub: every receiver hears the transmitted
/// signal one fixed lag later at unit gain.
struct DelayLine(usize);

struct DelayLineChannel {
    delay: usize,
    nrx: usize,
}

impl vao_sim::Channel for DelayLineChannel {
    fn transfer(&self, x: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, SimError> {
        Ok((0..self.nrx)
            .map(|_| {
                let mut y = vec![0.0f32; self.delay + x[0].len()];
                for (i, &s) in x[0].iter().enumerate() {
                    y[self.delay + i] = s;
                }
                y
            })
            .collect())
    }
}

impl PropagationModel for DelayLine {
    fn channel(
        &self,
        _tx: &[Position],
        rx: &[Position],
        _fs: f64,
    ) -> Result<Arc<dyn vao_sim::Channel>, SimError> {
        Ok(Arc::new(DelayLineChannel {
            delay: self.0,
            nrx: rx.len(),
        }))
    }
}

/// Transmit delivery: an impulse from node 0 shows up on node 1's ADC
/// stream exactly one propagation delay after the start reported by the
/// ostart event, scaled by the combined reference levels.
#[test]
fn transmit_delivery_between_nodes() {
    // 1000 m at 1500 m/s is 64000 ADC samples at 96 kSa/s.
    let delay = 64_000usize;
    let mut sim = Simulation::new(
        DelayLine(delay),
        SimConfig {
            txdelay: 0.05,
            ..SimConfig::new(24_000.0)
        },
    );
    sim.set_noise(Box::new(NoNoise));
    sim.add_node(
        (0.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp2::new(localhost(), 19815),
    )
    .unwrap();
    sim.add_node(
        (1000.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp2::new(localhost(), 19816),
    )
    .unwrap();
    sim.run().unwrap();

    // Node 1's client listens for ADC frames.
    let data = UdpSocket::bind("127.0.0.1:0").unwrap();
    let dport = data.local_addr().unwrap().port();
    let mut rx_conn = connect_retry("127.0.0.1:19816");
    send_line(&mut rx_conn, &format!(r#"{{"action":"istart","port":{dport}}}"#));

    // Node 0's client uploads a unit impulse and fires it.
    let mut tx_conn = connect_retry("127.0.0.1:19815");
    send_line(&mut tx_conn, r#"{"action":"oclear"}"#);
    send_line(&mut tx_conn, &odata_json(&[1.0]));
    send_line(&mut tx_conn, r#"{"action":"ostart","id":"imp"}"#);

    // The ostart event tells us when the burst actually started.
    let event = read_json_line(&mut tx_conn, Duration::from_secs(5)).expect("no ostart event");
    assert_eq!(event["event"], "ostart");
    assert_eq!(event["id"], "imp");
    let t_start_us = event["time"].as_u64().unwrap();
    let t_start = (t_start_us as f64 * 1e-6 * 96_000.0).round() as i64;
    let spike_at = t_start + delay as i64;

    // 10^((txref + rxref)/20) with unit channel gain.
    let expect = 10.0f64.powf((185.0 - 190.0) / 20.0) as f32;
    let wall_deadline = Instant::now() + Duration::from_secs(5);
    let mut found = None;
    while found.is_none() && Instant::now() < wall_deadline {
        let Some(frame) = recv_frame(&data, Duration::from_millis(500)) else {
            continue;
        };
        let frame_t = (frame.timestamp as f64 * 1e-6 * 96_000.0).round() as i64;
        if frame_t > spike_at {
            panic!("streamed past the expected arrival without a spike");
        }
        if spike_at < frame_t + frame.samples.len() as i64 {
            found = Some(frame.samples[(spike_at - frame_t) as usize]);
        }
    }
    let got = found.expect("never reached the arrival window");
    assert!(
        (got - expect).abs() < 1e-3,
        "spike amplitude {got}, expected {expect}"
    );
    sim.close();
}

/// Event ordering: ostart precedes ostop, separated by the burst length
/// at the DAC rate (here 1000 samples at 192 kSa/s ≈ 5208 µs).
#[test]
fn event_ordering_and_spacing() {
    let mut sim = Simulation::new(
        IsovelocityModel::default(),
        SimConfig {
            txdelay: 0.05,
            ..SimConfig::new(24_000.0)
        },
    );
    sim.add_node(
        (0.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp2::new(localhost(), 19820),
    )
    .unwrap();
    sim.run().unwrap();

    let mut conn = connect_retry("127.0.0.1:19820");
    let burst = vec![0.1f32; 1000];
    send_line(&mut conn, &odata_json(&burst));
    send_line(&mut conn, r#"{"action":"ostart","id":42}"#);

    let first = read_json_line(&mut conn, Duration::from_secs(5)).expect("no ostart event");
    let second = read_json_line(&mut conn, Duration::from_secs(5)).expect("no ostop event");
    assert_eq!(first["event"], "ostart");
    assert_eq!(second["event"], "ostop");
    assert_eq!(first["id"], 42);
    assert_eq!(second["id"], 42);

    let dt = second["time"].as_u64().unwrap() - first["time"].as_u64().unwrap();
    let expect = (1000.0f64 * 1e6 / 192_000.0).round() as u64;
    assert!(
        dt.abs_diff(expect) <= 1,
        "event spacing {dt} µs, expected {expect} ± 1"
    );
    sim.close();
}

/// Parameter round-trip: known parameters echo back, unknown parameters
/// are ignored on set and silent on get.
#[test]
fn parameter_round_trip_over_uasp2() {
    let mut sim = Simulation::new(IsovelocityModel::default(), SimConfig::new(24_000.0));
    sim.add_node(
        (0.0, 0.0, -10.0),
        NodeConfig::default(),
        Uasp2::new(localhost(), 19825),
    )
    .unwrap();
    sim.run().unwrap();

    let mut conn = connect_retry("127.0.0.1:19825");
    send_line(&mut conn, r#"{"action":"set","param":"igain","value":6}"#);
    send_line(&mut conn, r#"{"action":"get","param":"igain","id":1}"#);
    let reply = read_json_line(&mut conn, Duration::from_secs(3)).expect("no igain response");
    assert_eq!(reply["param"], "igain");
    assert_eq!(reply["value"].as_f64(), Some(6.0));

    send_line(&mut conn, r#"{"action":"set","param":"nonsense","value":1}"#);
    send_line(&mut conn, r#"{"action":"get","param":"nonsense","id":2}"#);
    assert!(
        read_json_line(&mut conn, Duration::from_millis(600)).is_none(),
        "unknown parameter must get no response"
    );

    // ireset zeroes the block counter. The scheduler keeps counting while
    // we talk, so compare against where the counter had gotten to.
    thread::sleep(Duration::from_millis(500));
    send_line(&mut conn, r#"{"action":"get","param":"iseqno","id":3}"#);
    let reply = read_json_line(&mut conn, Duration::from_secs(3)).expect("no iseqno response");
    let before = reply["value"].as_u64().unwrap();
    assert!(before > 50, "scheduler should have counted blocks: {before}");

    send_line(&mut conn, r#"{"action":"ireset"}"#);
    send_line(&mut conn, r#"{"action":"get","param":"iseqno","id":4}"#);
    let reply = read_json_line(&mut conn, Duration::from_secs(3)).expect("no iseqno response");
    let after = reply["value"].as_u64().unwrap();
    assert!(after < before / 2, "ireset did not reset: {after} vs {before}");
    sim.close();
}
