//! Per-run statistics, persisted as JSON once distribution completes.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::PathBuf,
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::addr::NodeAddr;

/// A per-peer counter that only ever increments.
#[derive(Debug, Default)]
struct Counters {
    inner: Mutex<HashMap<NodeAddr, u64>>,
}

impl Counters {
    fn increment(&self, peer: NodeAddr) {
        *self.inner.lock().entry(peer).or_insert(0) += 1;
    }

    fn get(&self, peer: NodeAddr) -> u64 {
        self.inner.lock().get(&peer).copied().unwrap_or(0)
    }

    // Keys are stringified and sorted so the serialized report is stable.
    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .iter()
            .map(|(peer, count)| (peer.to_string(), *count))
            .collect()
    }
}

/// Counters accumulated over one controller run.
///
/// A handle to this is passed to the transport and the distributor at
/// construction; there is no process-wide statistics state.
#[derive(Debug, Default)]
pub struct RunStats {
    sent: Counters,
    received: Counters,
    timeouts: Counters,
    timeouts_before_confirmation: Counters,
    protocol_sent: Counters,
    protocol_received: Counters,
    update_start: Mutex<Option<OffsetDateTime>>,
    update_end: Mutex<Option<OffsetDateTime>>,
    n_clients: Mutex<u16>,
    ack_timeout: Mutex<Duration>,
}

impl RunStats {
    pub fn new(n_clients: u16, ack_timeout: Duration) -> Self {
        Self {
            n_clients: Mutex::new(n_clients),
            ack_timeout: Mutex::new(ack_timeout),
            ..Default::default()
        }
    }

    /// Records one application payload handed to the transport for `peer`.
    pub fn record_sent(&self, peer: NodeAddr) {
        self.sent.increment(peer);
    }

    /// Records one application payload dispatched up from `peer`.
    pub fn record_received(&self, peer: NodeAddr) {
        self.received.increment(peer);
    }

    /// Records one ack-wait timeout for `peer`.
    pub fn record_timeout(&self, peer: NodeAddr) {
        self.timeouts.increment(peer);
    }

    /// Records one raw frame written to the socket for `peer`, acks and
    /// retransmissions included.
    pub fn record_protocol_sent(&self, peer: NodeAddr) {
        self.protocol_sent.increment(peer);
    }

    /// Records one raw datagram read from the socket from `peer`.
    pub fn record_protocol_received(&self, peer: NodeAddr) {
        self.protocol_received.increment(peer);
    }

    /// Snapshots the timeout counters accumulated so far.
    ///
    /// Called between the schedule-update and update-complete phases, so the
    /// report distinguishes timeouts suffered before confirmation began.
    pub fn freeze_timeouts_before_confirmation(&self) {
        let timeouts = self.timeouts.inner.lock();
        let mut frozen = self.timeouts_before_confirmation.inner.lock();
        for (peer, count) in timeouts.iter() {
            frozen.insert(*peer, *count);
        }
    }

    /// Marks the start of schedule distribution.
    pub fn mark_update_start(&self) {
        *self.update_start.lock() = Some(OffsetDateTime::now_utc());
    }

    /// Marks the end of schedule distribution.
    pub fn mark_update_end(&self) {
        *self.update_end.lock() = Some(OffsetDateTime::now_utc());
    }

    /// Returns the timeout count recorded for `peer`.
    pub fn timeouts_for(&self, peer: NodeAddr) -> u64 {
        self.timeouts.get(peer)
    }

    /// Produces a serializable snapshot of the run.
    pub fn report(&self) -> StatsReport {
        StatsReport {
            nsent: self.sent.snapshot(),
            nreceived: self.received.snapshot(),
            timeouts: self.timeouts.snapshot(),
            timeouts_before_confirmation: self.timeouts_before_confirmation.snapshot(),
            protocol_sent: self.protocol_sent.snapshot(),
            protocol_received: self.protocol_received.snapshot(),
            schedule_update_start: self.update_start.lock().map(OffsetDateTime::unix_timestamp),
            schedule_update_end: self.update_end.lock().map(OffsetDateTime::unix_timestamp),
            nclients: *self.n_clients.lock(),
            timeout_s: self.ack_timeout.lock().as_secs_f64(),
        }
    }
}

/// A plain snapshot of [`RunStats`], ready for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub nsent: BTreeMap<String, u64>,
    pub nreceived: BTreeMap<String, u64>,
    pub timeouts: BTreeMap<String, u64>,
    pub timeouts_before_confirmation: BTreeMap<String, u64>,
    pub protocol_sent: BTreeMap<String, u64>,
    pub protocol_received: BTreeMap<String, u64>,
    pub schedule_update_start: Option<i64>,
    pub schedule_update_end: Option<i64>,
    pub nclients: u16,
    pub timeout_s: f64,
}

impl StatsReport {
    /// Writes the report as pretty JSON to `<prefix><unix-timestamp>.json`,
    /// returning the path written.
    pub fn write_to_file(&self, prefix: &str) -> io::Result<PathBuf> {
        let filename = format!(
            "{prefix}{}.json",
            OffsetDateTime::now_utc().unix_timestamp()
        );
        let path = PathBuf::from(filename);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        std::fs::write(&path, json)?;

        Ok(path)
    }
}
