//! Collector for radio-neighbor topology reports.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    addr::{AddressRegistry, HardwareAddr, NodeAddr},
    dispatch::{Collector, MessageKind},
    error::Error,
};

#[derive(Debug)]
struct Inner {
    topology: RwLock<HashMap<NodeAddr, Vec<HardwareAddr>>>,
    expected_nodes: usize,
}

/// Accumulates each mote's radio-neighbor list.
///
/// A report carries the mote's own hardware address followed by its
/// neighbors'; the stored list is replaced wholesale on every report, and the
/// reporter's hardware/network pair is recorded in the shared
/// [`AddressRegistry`].
#[derive(Debug, Clone)]
pub struct TopologyCollector {
    inner: Arc<Inner>,
    registry: AddressRegistry,
}

impl TopologyCollector {
    pub fn new(expected_nodes: usize, registry: AddressRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                topology: RwLock::new(HashMap::new()),
                expected_nodes,
            }),
            registry,
        }
    }

    /// `true` once every expected mote has reported its neighbors.
    pub fn ready(&self) -> bool {
        self.inner.topology.read().len() == self.inner.expected_nodes
    }

    /// Returns the neighbor lists as currently known.
    pub fn snapshot(&self) -> HashMap<NodeAddr, Vec<HardwareAddr>> {
        self.inner.topology.read().clone()
    }
}

impl Collector for TopologyCollector {
    fn kind(&self) -> MessageKind {
        MessageKind::Topology
    }

    fn process(&self, peer: NodeAddr, payload: Bytes) -> Result<(), Error> {
        let (reporter, neighbors) = decode_topology(&payload)?;
        debug!(%peer, %reporter, neighbors = neighbors.len(), "topology report received");

        self.inner.topology.write().insert(peer, neighbors);
        self.registry.insert(reporter, peer);

        Ok(())
    }
}

/// Splits a topology payload into the reporter's hardware address and its
/// neighbor list. The payload must be a positive multiple of the hardware
/// address width.
fn decode_topology(payload: &[u8]) -> Result<(HardwareAddr, Vec<HardwareAddr>), Error> {
    if payload.is_empty() || payload.len() % HardwareAddr::BYTES != 0 {
        return Err(Error::MalformedTopologyPayload {
            len: payload.len(),
            entry: HardwareAddr::BYTES,
        });
    }

    let mut entries = payload.chunks_exact(HardwareAddr::BYTES);
    // The length check above guarantees at least one full entry.
    let reporter = HardwareAddr::from_slice(entries.next().unwrap()).unwrap();
    let neighbors = entries
        .map(|entry| HardwareAddr::from_slice(entry).unwrap())
        .collect();

    Ok((reporter, neighbors))
}
