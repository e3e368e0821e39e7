//! Demultiplexing of inbound application payloads by message kind.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::error;

use crate::{addr::NodeAddr, error::Error};

/// The number of assigned message kinds.
pub const MESSAGE_KIND_COUNT: usize = 3;

/// The leading byte of every application payload names the collector the
/// report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Routing-parent (RPL link) reports.
    Graph = 0,
    /// Radio-neighbor topology reports.
    Topology = 1,
    /// Bandwidth-demand reports.
    Bandwidth = 2,
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Error> {
        match raw {
            0 => Ok(MessageKind::Graph),
            1 => Ok(MessageKind::Topology),
            2 => Ok(MessageKind::Bandwidth),
            _ => Err(Error::UnknownMessageKind(raw)),
        }
    }
}

/// A consumer of one kind of report.
///
/// Implementations accumulate per-mote state and must tolerate concurrent
/// `process` calls; the dispatcher runs each dispatch on its own task.
pub trait Collector: Send + Sync + 'static {
    /// The message kind this collector subscribes to.
    fn kind(&self) -> MessageKind;

    /// Consumes one report payload from `peer`.
    fn process(&self, peer: NodeAddr, payload: Bytes) -> Result<(), Error>;
}

/// Routes application payloads to the collectors registered for their kind.
///
/// Dispatch is fire-and-forget: the serve loop is never held up waiting for
/// a collector, since collectors only mutate their own state. Collector
/// errors are not swallowed; they are forwarded on the fault channel handed
/// out at construction, and the controller treats any fault as fatal.
pub struct Dispatcher {
    collectors: [Vec<Arc<dyn Collector>>; MESSAGE_KIND_COUNT],
    faults: mpsc::UnboundedSender<Error>,
}

impl Dispatcher {
    /// Creates a dispatcher and the receiving end of its fault channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (faults, faults_rx) = mpsc::unbounded_channel();

        (
            Self {
                collectors: Default::default(),
                faults,
            },
            faults_rx,
        )
    }

    /// Registers a collector under the kind it declares.
    pub fn subscribe(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors[collector.kind() as usize].push(collector);
        self
    }

    /// Validates the leading kind byte and hands the remaining payload to
    /// every collector registered for it, one task per collector.
    ///
    /// An unknown kind byte is a fatal protocol error returned to the serve
    /// loop directly.
    pub fn handle(&self, peer: NodeAddr, payload: Bytes) -> Result<(), Error> {
        let (&raw_kind, _) = payload.split_first().ok_or(Error::EmptyDatagram)?;
        let kind = MessageKind::try_from(raw_kind)?;
        let payload = payload.slice(1..);

        for collector in &self.collectors[kind as usize] {
            let collector = Arc::clone(collector);
            let faults = self.faults.clone();
            let payload = payload.clone();

            tokio::spawn(async move {
                if let Err(e) = collector.process(peer, payload) {
                    error!(%peer, error = %e, "collector failed to process a report");
                    // The receiver only goes away when the run is already
                    // over, in which case the fault has nowhere to go.
                    let _ = faults.send(e);
                }
            });
        }

        Ok(())
    }
}
