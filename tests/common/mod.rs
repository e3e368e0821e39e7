use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing_subscriber::{fmt, EnvFilter};

use sixsched::{
    channel::{SendConfig, UdpAckChannel},
    dispatch::MessageKind,
    stats::RunStats,
    HardwareAddr, NodeAddr,
};

#[allow(dead_code)]
pub fn enable_tracing() {
    fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// Returns two distinct UDP ports that were free on loopback a moment ago.
///
/// Both probe sockets are held at once, so the ports can't collide with each
/// other.
#[allow(dead_code)]
pub async fn two_free_udp_ports() -> (u16, u16) {
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    (
        a.local_addr().unwrap().port(),
        b.local_addr().unwrap().port(),
    )
}

/// Transport tuning for tests: fast retransmissions, generous retry budget.
#[allow(dead_code)]
pub fn fast_send_config() -> SendConfig {
    SendConfig {
        max_retries: 40,
        retry_interval: Duration::from_millis(50),
        ack_timeout: Duration::from_millis(250),
    }
}

/// The hardware address conventionally paired with mote `n` in tests.
#[allow(dead_code)]
pub fn hw(n: u8) -> HardwareAddr {
    HardwareAddr::new([n; 8])
}

/// Builds one graph-report record.
#[allow(dead_code)]
pub fn graph_record(child: NodeAddr, parent: NodeAddr, lifetime_secs: u32) -> Vec<u8> {
    let mut record = Vec::with_capacity(36);
    record.extend_from_slice(&child.octets16());
    record.extend_from_slice(&parent.octets16());
    record.extend_from_slice(&lifetime_secs.to_le_bytes());
    record
}

/// Builds a topology-report payload: the reporter followed by its neighbors.
#[allow(dead_code)]
pub fn topology_payload(reporter: HardwareAddr, neighbors: &[HardwareAddr]) -> Vec<u8> {
    let mut payload = reporter.bytes().to_vec();
    for neighbor in neighbors {
        payload.extend_from_slice(&neighbor.bytes());
    }
    payload
}

/// Parses an update packet into its neighbor and (options, timeslot,
/// channel) cell records.
#[allow(dead_code)]
pub fn parse_update_packet(packet: &[u8]) -> (HardwareAddr, Vec<(u8, u16, u16)>) {
    assert_eq!(packet[0], 0, "not an update packet");

    let neighbor = HardwareAddr::from_slice(&packet[1..9]).unwrap();
    let count = packet[9] as usize;

    let mut cells = Vec::with_capacity(count);
    for i in 0..count {
        let record = &packet[10 + i * 5..10 + (i + 1) * 5];
        cells.push((
            record[0],
            u16::from_le_bytes([record[1], record[2]]),
            u16::from_le_bytes([record[3], record[4]]),
        ));
    }
    assert_eq!(packet.len(), 10 + count * 5);

    (neighbor, cells)
}

/// A scripted mote: its own acked channel plus everything it received.
#[allow(dead_code)]
pub struct Mote {
    pub addr: NodeAddr,
    pub channel: Arc<UdpAckChannel>,
    pub received: Arc<Mutex<Vec<Bytes>>>,
    server: SocketAddr,
}

#[allow(dead_code)]
impl Mote {
    /// Binds a mote on `ip:port` and starts its receive loop, acking every
    /// update packet and recording its payload. Motes that receive the
    /// 1-byte update-complete packet push their address onto `completions`,
    /// so tests can assert the confirmation order across motes.
    pub async fn start(
        ip: &str,
        port: u16,
        server: SocketAddr,
        completions: Arc<Mutex<Vec<NodeAddr>>>,
    ) -> Self {
        let socket = Arc::new(UdpSocket::bind((ip, port)).await.unwrap());
        let addr = NodeAddr::new(ip.parse().unwrap());

        let stats = Arc::new(RunStats::new(1, Duration::from_secs(1)));
        let channel = Arc::new(UdpAckChannel::new(socket, fast_send_config(), stats));
        let received = Arc::new(Mutex::new(Vec::new()));

        let serve_channel = Arc::clone(&channel);
        let store = Arc::clone(&received);
        tokio::spawn(async move {
            let _ = serve_channel
                .serve(move |_, payload| {
                    if payload[..] == [1] {
                        completions.lock().push(addr);
                    }
                    store.lock().push(payload);
                    Ok(())
                })
                .await;
        });

        Self {
            addr,
            channel,
            received,
            server,
        }
    }

    /// Sends one report to the controller over the acked channel.
    pub async fn send_report(&self, kind: MessageKind, payload: &[u8]) {
        let mut report = vec![kind as u8];
        report.extend_from_slice(payload);

        self.channel.send(self.server, &report).await.unwrap();
    }

    /// Returns the update packets received so far, parsed.
    pub fn updates(&self) -> Vec<(HardwareAddr, Vec<(u8, u16, u16)>)> {
        self.received
            .lock()
            .iter()
            .filter(|packet| packet.first() == Some(&0))
            .map(|packet| parse_update_packet(packet))
            .collect()
    }

    /// Returns how many update-complete packets arrived.
    pub fn completions_received(&self) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|packet| packet[..] == [1])
            .count()
    }
}
