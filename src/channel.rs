//! The reliable datagram channel: stop-and-wait acknowledgements over UDP.
//!
//! Every application payload is framed with the 1-byte [`wire`] header and
//! retransmitted until the peer acknowledges its sequence number. At most one
//! data packet per peer is in flight at any time; ordering within a peer's
//! stream follows from that discipline alone. Dropped and duplicated
//! datagrams are absorbed here and never surface to the application layer.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, Mutex as AsyncMutex},
    time::{sleep, timeout},
};
use tracing::{debug, warn};

use crate::{
    addr::NodeAddr,
    error::Error,
    stats::RunStats,
    wire::{self, Header, PacketClass, INITIAL_SEQUENCE_NUMBER},
};

/// Retry and timeout tuning for acknowledged sends.
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// How many ack timeouts (or consecutive write failures) end a send.
    pub max_retries: u32,
    /// The pause between write attempts when the socket itself errors.
    pub retry_interval: Duration,
    /// How long to wait for an acknowledgement before retransmitting.
    pub ack_timeout: Duration,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_interval: Duration::from_secs(4),
            ack_timeout: Duration::from_secs(4),
        }
    }
}

/// Per-peer expected sequence numbers, lazily initialized on first contact.
#[derive(Debug, Default)]
struct SequenceMap {
    inner: RwLock<HashMap<NodeAddr, u8>>,
}

impl SequenceMap {
    /// Returns the sequence number expected next for `peer`.
    fn expected(&self, peer: NodeAddr) -> u8 {
        if let Some(&sequence) = self.inner.read().get(&peer) {
            return sequence;
        }

        *self
            .inner
            .write()
            .entry(peer)
            .or_insert(INITIAL_SEQUENCE_NUMBER)
    }

    /// Advances the expected sequence number for `peer`, wrapping at the
    /// protocol maximum.
    fn advance(&self, peer: NodeAddr) {
        let mut inner = self.inner.write();
        let sequence = inner.entry(peer).or_insert(INITIAL_SEQUENCE_NUMBER);
        *sequence = wire::next_sequence(*sequence);
    }
}

/// A peer's acknowledgement mailbox.
///
/// The single-slot channel keeps the serve loop from ever blocking on
/// delivery: an ack that finds the slot occupied, or no send in flight, is
/// dropped. The receiver is guarded by an async mutex so only one send per
/// peer can be waiting (stop-and-wait).
struct AckSlot {
    tx: mpsc::Sender<Header>,
    rx: AsyncMutex<mpsc::Receiver<Header>>,
}

#[derive(Default)]
struct AckChannels {
    inner: RwLock<HashMap<NodeAddr, Arc<AckSlot>>>,
}

impl AckChannels {
    /// Returns the mailbox for `peer`, creating it on first use.
    fn slot(&self, peer: NodeAddr) -> Arc<AckSlot> {
        if let Some(slot) = self.inner.read().get(&peer) {
            return Arc::clone(slot);
        }

        let mut inner = self.inner.write();
        Arc::clone(inner.entry(peer).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(1);
            Arc::new(AckSlot {
                tx,
                rx: AsyncMutex::new(rx),
            })
        }))
    }

    /// Delivers an ack header to `peer`'s mailbox without ever blocking.
    fn deliver(&self, peer: NodeAddr, header: Header) {
        let slot = self.inner.read().get(&peer).cloned();

        match slot {
            Some(slot) => {
                if slot.tx.try_send(header).is_err() {
                    warn!(%peer, sequence = header.sequence, "dropping ack, no send waiting on it");
                }
            }
            None => debug!(%peer, sequence = header.sequence, "ack from peer with no send in flight"),
        }
    }
}

/// A UDP socket wrapped with the stop-and-wait acknowledgement protocol.
pub struct UdpAckChannel {
    socket: Arc<UdpSocket>,
    config: SendConfig,
    sent: SequenceMap,
    received: SequenceMap,
    acks: AckChannels,
    stats: Arc<RunStats>,
}

impl UdpAckChannel {
    /// Wraps a bound socket.
    pub fn new(socket: Arc<UdpSocket>, config: SendConfig, stats: Arc<RunStats>) -> Self {
        Self {
            socket,
            config,
            sent: SequenceMap::default(),
            received: SequenceMap::default(),
            acks: AckChannels::default(),
            stats,
        }
    }

    /// Returns the local address the underlying socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends a payload and blocks the calling task until the peer's
    /// acknowledgement arrives or the retry budget runs out.
    ///
    /// Exhausting the budget is fatal to the caller: an unreachable peer
    /// invalidates the whole distribution run.
    pub async fn send(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), Error> {
        let key = NodeAddr::from(peer.ip());
        let slot = self.acks.slot(key);
        // Holding the receiver enforces at most one in-flight packet per
        // peer; a concurrent send to the same peer queues here.
        let mut rx = slot.rx.lock().await;

        let sequence = self.sent.expected(key);
        let framed = wire::frame(PacketClass::Data, sequence, payload)?;
        debug!(%key, sequence, len = framed.len(), "sending data packet");

        self.stats.record_sent(key);
        self.transmit(&framed, peer).await?;

        let mut retries = 0;
        loop {
            match timeout(self.config.ack_timeout, rx.recv()).await {
                Ok(Some(ack)) => {
                    let expected = self.sent.expected(key);
                    debug!(%key, expected, got = ack.sequence, "ack received");

                    if ack.sequence == expected {
                        self.sent.advance(key);
                        return Ok(());
                    } else if ack.sequence < expected {
                        // A stale duplicate of an earlier ack; the one we
                        // want is still on its way.
                        debug!(%key, "stale ack, still waiting");
                    } else {
                        // The peer is acknowledging something we haven't
                        // sent yet: it never got this packet. Resend now.
                        warn!(%key, "unexpected ack sequence, resending the packet");
                        self.transmit(&framed, peer).await?;
                    }
                }
                // The sending half lives in the slot, so the channel can't
                // close while a send is in flight; treat it as spurious.
                Ok(None) => continue,
                Err(_elapsed) => {
                    retries += 1;
                    self.stats.record_timeout(key);

                    if retries >= self.config.max_retries {
                        return Err(Error::RetriesExhausted {
                            peer: key,
                            attempts: retries,
                        });
                    }

                    warn!(%key, retries, "ack timeout, resending the packet");
                    self.transmit(&framed, peer).await?;
                }
            }
        }
    }

    /// Sends a payload with no acknowledgement bookkeeping at all.
    pub async fn send_without_ack(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), Error> {
        let key = NodeAddr::from(peer.ip());
        let framed = wire::frame(PacketClass::DataNoAck, 0, payload)?;

        self.stats.record_sent(key);
        self.transmit(&framed, peer).await
    }

    /// Runs the read loop until a socket error or a fatal handler error.
    ///
    /// Each inbound datagram is stripped of its header and classified:
    /// acks go to the matching mailbox, no-ack data is dispatched as is, and
    /// data packets go through the sequence check before being acknowledged
    /// and dispatched.
    pub async fn serve<H>(&self, handler: H) -> Result<(), Error>
    where
        H: Fn(NodeAddr, Bytes) -> Result<(), Error> + Send + Sync,
    {
        let mut buffer = vec![0u8; 2048];

        loop {
            let (len, remote) = self.socket.recv_from(&mut buffer).await?;
            let peer = NodeAddr::from(remote.ip());
            self.stats.record_protocol_received(peer);

            self.handle_packet(remote, &buffer[..len], &handler).await?;
        }
    }

    async fn handle_packet<H>(
        &self,
        remote: SocketAddr,
        packet: &[u8],
        handler: &H,
    ) -> Result<(), Error>
    where
        H: Fn(NodeAddr, Bytes) -> Result<(), Error> + Send + Sync,
    {
        let peer = NodeAddr::from(remote.ip());
        let (header, payload) = wire::strip(packet)?;
        debug!(%peer, class = ?header.class, sequence = header.sequence, "packet received");

        match header.class {
            PacketClass::DataNoAck => {
                self.stats.record_received(peer);
                handler(peer, payload)
            }
            PacketClass::Ack => {
                self.acks.deliver(peer, header);
                Ok(())
            }
            PacketClass::Data => {
                let expected = self.received.expected(peer);

                if header.sequence == expected {
                    self.send_ack(remote, header.sequence).await?;
                    self.received.advance(peer);
                    self.stats.record_received(peer);
                    handler(peer, payload)
                } else if header.sequence > expected && expected != 0 {
                    // A future packet: the one we're missing is still in
                    // flight somewhere, so stay quiet and wait for it.
                    debug!(%peer, expected, got = header.sequence, "out-of-order packet ignored");
                    Ok(())
                } else {
                    // A duplicate of something already processed; the peer
                    // missed our ack, so repeat it without re-dispatching.
                    debug!(%peer, expected, got = header.sequence, "duplicate packet, re-acking");
                    self.send_ack(remote, header.sequence).await
                }
            }
        }
    }

    async fn send_ack(&self, remote: SocketAddr, sequence: u8) -> Result<(), Error> {
        debug!(peer = %remote.ip(), sequence, "sending ack");
        let packet = wire::ack_packet(sequence)?;
        self.transmit(&packet, remote).await
    }

    /// Writes a framed packet, retrying transient socket errors with a fixed
    /// pause in between.
    async fn transmit(&self, framed: &Bytes, peer: SocketAddr) -> Result<(), Error> {
        let key = NodeAddr::from(peer.ip());
        let mut attempts = 0;

        loop {
            match self.socket.send_to(framed, peer).await {
                Ok(_) => {
                    self.stats.record_protocol_sent(key);
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(e.into());
                    }

                    warn!(%key, error = %e, "write failed, retrying");
                    sleep(self.config.retry_interval).await;
                }
            }
        }
    }
}
