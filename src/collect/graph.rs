//! Collector for routing-parent (RPL link) reports.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::{
    addr::NodeAddr,
    dispatch::{Collector, MessageKind},
    error::Error,
};

/// One graph-update record: child, parent, lifetime seconds.
const RECORD_SIZE: usize = 16 + 16 + 4;

/// A mote's active link to its routing parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RplLink {
    pub parent: NodeAddr,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct Inner {
    graph: RwLock<HashMap<NodeAddr, RplLink>>,
    expected_nodes: usize,
}

/// Accumulates the child-to-parent routing graph.
///
/// Links carry a lifetime; a background check removes a link once it expires,
/// unless it was refreshed in the meantime or its child has since become
/// another mote's parent. Removal is best effort, not transactional.
#[derive(Debug, Clone)]
pub struct GraphCollector {
    inner: Arc<Inner>,
}

impl GraphCollector {
    /// Creates a collector expecting reports from `expected_nodes` motes
    /// (the root is not anyone's child, so readiness needs one report less).
    pub fn new(expected_nodes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph: RwLock::new(HashMap::new()),
                expected_nodes,
            }),
        }
    }

    /// `true` once every mote but the root has a recorded parent link.
    pub fn ready(&self) -> bool {
        self.inner.graph.read().len() == self.inner.expected_nodes.saturating_sub(1)
    }

    /// Returns the child-to-parent map as currently known.
    pub fn snapshot(&self) -> HashMap<NodeAddr, NodeAddr> {
        self.inner
            .graph
            .read()
            .iter()
            .map(|(child, link)| (*child, link.parent))
            .collect()
    }

    /// Returns the number of recorded links.
    pub fn len(&self) -> usize {
        self.inner.graph.read().len()
    }

    /// Returns `true` if no link has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.inner.graph.read().is_empty()
    }

    fn update(&self, child: NodeAddr, parent: NodeAddr, lifetime: Duration) {
        let mut graph = self.inner.graph.write();

        // A re-report with the same parent only refreshes the expiry.
        let refreshed = matches!(graph.get(&child), Some(link) if link.parent == parent);
        if !refreshed {
            info!(%child, %parent, "recording routing link");
        }

        graph.insert(
            child,
            RplLink {
                parent,
                expires_at: Instant::now() + lifetime,
            },
        );
        drop(graph);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(lifetime).await;
            remove_if_expired(&inner, child);
        });
    }
}

/// Removes `child`'s link if its lifetime has elapsed and nothing depends on
/// it: a refreshed expiry keeps it, and so does `child` being some other
/// mote's parent.
fn remove_if_expired(inner: &Inner, child: NodeAddr) {
    let mut graph = inner.graph.write();

    let expired = match graph.get(&child) {
        Some(link) => Instant::now() >= link.expires_at,
        None => return,
    };
    if !expired {
        return;
    }

    if graph.values().any(|link| link.parent == child) {
        return;
    }

    debug!(%child, "routing link expired, removing");
    graph.remove(&child);
}

impl Collector for GraphCollector {
    fn kind(&self) -> MessageKind {
        MessageKind::Graph
    }

    fn process(&self, peer: NodeAddr, payload: Bytes) -> Result<(), Error> {
        let updates = decode_graph_updates(&payload)?;
        debug!(%peer, count = updates.len(), "graph report received");

        for (child, parent, lifetime) in updates {
            self.update(child, parent, lifetime);
        }

        Ok(())
    }
}

fn decode_graph_updates(payload: &[u8]) -> Result<Vec<(NodeAddr, NodeAddr, Duration)>, Error> {
    if payload.is_empty() || payload.len() % RECORD_SIZE != 0 {
        return Err(Error::MalformedGraphPayload {
            len: payload.len(),
            record: RECORD_SIZE,
        });
    }

    let updates = payload
        .chunks_exact(RECORD_SIZE)
        .map(|record| {
            // The chunk width is fixed, so these slices can't be short.
            let child = NodeAddr::from_bytes16(record[..16].try_into().unwrap());
            let parent = NodeAddr::from_bytes16(record[16..32].try_into().unwrap());
            let lifetime = u32::from_le_bytes(record[32..36].try_into().unwrap());

            (child, parent, Duration::from_secs(lifetime.into()))
        })
        .collect();

    Ok(updates)
}
