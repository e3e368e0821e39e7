//! The controller: wiring, readiness gating and the run lifecycle.

use std::{io, net::Ipv4Addr, sync::Arc, time::Duration};

use tokio::{net::UdpSocket, task::JoinError, time::sleep};
use tracing::{info, warn};

use crate::{
    addr::{AddressRegistry, NodeAddr},
    channel::{SendConfig, UdpAckChannel},
    collect::{BandwidthCollector, GraphCollector, TopologyCollector},
    dispatch::{Collector, Dispatcher},
    error::Error,
    schedule::{build_schedule, AssignParams},
    stats::{RunStats, StatsReport},
    update::{Distributor, DEFAULT_MAX_CELLS_PER_PACKET},
};

/// Everything a controller run is parameterized by.
#[derive(Debug, Clone)]
pub struct Config {
    /// The number of motes in the network, border router included.
    pub n_nodes: u16,
    /// The identifier of the first mote (the border router).
    pub first_node_id: u16,
    /// The UDP port the controller listens on.
    pub listen_port: u16,
    /// The UDP port the motes listen on.
    pub client_port: u16,
    /// The addresses of every mote in the network.
    pub clients: Vec<NodeAddr>,
    /// Transport retry and timeout tuning.
    pub send: SendConfig,
    /// Scheduler grid bounds and data-error policy.
    pub assign: AssignParams,
    /// The ceiling on cells carried by one update packet.
    pub max_cells_per_packet: usize,
    /// How often the readiness of the collectors is polled.
    pub poll_interval: Duration,
}

impl Config {
    /// Builds a configuration for a simulated network of `n_nodes` motes
    /// with derived addresses, the way the deployment scripts lay them out.
    pub fn new(n_nodes: u16, first_node_id: u16, listen_port: u16, ack_timeout: Duration) -> Self {
        let clients = (first_node_id..first_node_id + n_nodes)
            .map(NodeAddr::for_mote_id)
            .collect();

        Self {
            n_nodes,
            first_node_id,
            listen_port,
            client_port: listen_port,
            clients,
            send: SendConfig {
                ack_timeout,
                ..Default::default()
            },
            assign: AssignParams::default(),
            max_cells_per_packet: DEFAULT_MAX_CELLS_PER_PACKET,
            poll_interval: Duration::from_secs(4),
        }
    }
}

/// A one-shot schedule controller.
///
/// [`Controller::run`] collects reports until every collector is ready,
/// computes the schedule, installs it on all motes and returns the run's
/// statistics. It is not a long-running service: its job ends once the
/// schedule is installed, and the embedding process decides what happens
/// next.
pub struct Controller {
    config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<StatsReport, Error> {
        let config = self.config;
        let expected = config.n_nodes as usize;

        let stats = Arc::new(RunStats::new(config.n_nodes, config.send.ack_timeout));
        let socket =
            Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.listen_port)).await?);
        info!(port = config.listen_port, "controller listening");

        let channel = Arc::new(UdpAckChannel::new(
            socket,
            config.send.clone(),
            Arc::clone(&stats),
        ));

        let registry = AddressRegistry::new();
        let graph = GraphCollector::new(expected);
        let topology = TopologyCollector::new(expected, registry.clone());
        let bandwidth = BandwidthCollector::new(expected);

        let (dispatcher, mut faults) = Dispatcher::new();
        let dispatcher = dispatcher
            .subscribe(Arc::new(graph.clone()) as Arc<dyn Collector>)
            .subscribe(Arc::new(topology.clone()) as Arc<dyn Collector>)
            .subscribe(Arc::new(bandwidth.clone()) as Arc<dyn Collector>);

        let serve_channel = Arc::clone(&channel);
        let mut serve = tokio::spawn(async move {
            serve_channel
                .serve(move |peer, payload| dispatcher.handle(peer, payload))
                .await
        });

        // Gate on complete state: the schedule is only meaningful once every
        // mote has reported all three kinds.
        loop {
            let graph_ready = graph.ready();
            let topology_ready = topology.ready();
            let bandwidth_ready = bandwidth.ready();

            if graph_ready && topology_ready && bandwidth_ready {
                break;
            }

            if !graph_ready {
                warn!(links = graph.len(), "graph collector not ready yet");
            }
            if !topology_ready {
                warn!("topology collector not ready yet");
            }
            if !bandwidth_ready {
                warn!("bandwidth collector not ready yet");
            }

            tokio::select! {
                _ = sleep(config.poll_interval) => {}
                Some(fault) = faults.recv() => {
                    serve.abort();
                    return Err(fault);
                }
                outcome = &mut serve => return Err(serve_error(outcome)),
            }
        }

        info!("all collectors ready, computing the schedule");
        let graph_snapshot = graph.snapshot();
        let schedule = build_schedule(
            &graph_snapshot,
            &bandwidth.snapshot(),
            &topology.snapshot(),
            &registry,
            &config.assign,
        )?;

        let distributor = Distributor::new(
            Arc::clone(&channel),
            config.client_port,
            config.max_cells_per_packet,
            Arc::clone(&stats),
        );

        stats.mark_update_start();

        // The serve loop keeps running underneath distribution; it is what
        // feeds the acknowledgements back to the in-flight sends.
        tokio::select! {
            result = distributor.distribute(&schedule, &graph_snapshot, &config.clients) => {
                result?;
            }
            Some(fault) = faults.recv() => {
                serve.abort();
                return Err(fault);
            }
            outcome = &mut serve => return Err(serve_error(outcome)),
        }

        stats.mark_update_end();
        serve.abort();
        info!("schedule installed on every mote, run complete");

        Ok(stats.report())
    }
}

/// Maps a finished serve task to the error that ends the run.
fn serve_error(outcome: Result<Result<(), Error>, JoinError>) -> Error {
    match outcome {
        Ok(Ok(())) => Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "serve loop ended unexpectedly",
        )),
        Ok(Err(e)) => e,
        Err(e) => Error::Io(io::Error::new(io::ErrorKind::Other, e)),
    }
}
