//! Collector for bandwidth-demand reports.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    addr::NodeAddr,
    dispatch::{Collector, MessageKind},
    error::Error,
};

#[derive(Debug)]
struct Inner {
    demand: RwLock<HashMap<NodeAddr, u8>>,
    expected_nodes: usize,
}

/// Accumulates each mote's requested cells per slotframe.
///
/// A report is exactly one unsigned byte; the stored demand is overwritten on
/// every report from that mote.
#[derive(Debug, Clone)]
pub struct BandwidthCollector {
    inner: Arc<Inner>,
}

impl BandwidthCollector {
    pub fn new(expected_nodes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                demand: RwLock::new(HashMap::new()),
                expected_nodes,
            }),
        }
    }

    /// `true` once every expected mote has reported a demand.
    pub fn ready(&self) -> bool {
        self.inner.demand.read().len() == self.inner.expected_nodes
    }

    /// Returns the demands as currently known.
    pub fn snapshot(&self) -> HashMap<NodeAddr, u8> {
        self.inner.demand.read().clone()
    }
}

impl Collector for BandwidthCollector {
    fn kind(&self) -> MessageKind {
        MessageKind::Bandwidth
    }

    fn process(&self, peer: NodeAddr, payload: Bytes) -> Result<(), Error> {
        let [demand] = payload[..] else {
            return Err(Error::MalformedBandwidthPayload {
                len: payload.len(),
            });
        };

        debug!(%peer, demand, "bandwidth report received");
        self.inner.demand.write().insert(peer, demand);

        Ok(())
    }
}
