//! Serialization of the computed schedule and its two-phase installation.
//!
//! Phase 1 pushes every client's update packets concurrently over the
//! acknowledged channel. Phase 2 then confirms completion to one client at a
//! time, leaves first: a mote only activates its new slotframe on
//! confirmation, and an ancestor's path to the controller may run through a
//! child, so the child's schedule has to be live before the ancestor's
//! confirmation travels.

use std::{collections::HashMap, io, net::SocketAddr, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::{
    addr::{HardwareAddr, NodeAddr},
    channel::UdpAckChannel,
    error::Error,
    schedule::{leaves_to_root, Cell, Schedule},
    stats::RunStats,
};

/// The default ceiling on cells per update packet, bounding packet size.
pub const DEFAULT_MAX_CELLS_PER_PACKET: usize = 20;

/// The wire size of one encoded cell.
const CELL_SIZE: usize = 1 + 2 + 2;

/// The class byte leading every schedule-updater packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateClass {
    /// Cells for one neighbor link follow.
    Update = 0,
    /// The whole schedule has been delivered; activate it.
    Complete = 1,
}

/// Encodes one update packet: class byte, neighbor hardware address, cell
/// count, then the cells as (options, timeslot, channel) little-endian
/// records.
pub fn encode_update_packet(neighbor: HardwareAddr, cells: &[Cell]) -> Bytes {
    debug_assert!(cells.len() <= u8::MAX as usize);

    let mut packet =
        BytesMut::with_capacity(1 + HardwareAddr::BYTES + 1 + cells.len() * CELL_SIZE);
    packet.put_u8(UpdateClass::Update as u8);
    packet.put_slice(&neighbor.bytes());
    packet.put_u8(cells.len() as u8);

    for cell in cells {
        packet.put_u8(cell.options.bits());
        packet.put_u16_le(cell.timeslot);
        packet.put_u16_le(cell.channel);
    }

    packet.freeze()
}

/// Encodes the 1-byte update-complete packet.
pub fn encode_update_complete() -> Bytes {
    Bytes::from_static(&[UpdateClass::Complete as u8])
}

/// Serializes a client's schedule into bounded-size update packets, one
/// batch per neighbor link.
///
/// A client the schedule holds nothing for is a data error: the controller
/// cannot confirm an update it never shipped.
pub fn serialize_for_client(
    schedule: &Schedule,
    client: &NodeAddr,
    max_cells_per_packet: usize,
) -> Result<Vec<Bytes>, Error> {
    let links = schedule
        .cells_for(client)
        .ok_or(Error::NoScheduleForClient(*client))?;

    // Neighbors are visited in address order so a run's packet stream is
    // reproducible.
    let mut neighbors: Vec<HardwareAddr> = links.keys().copied().collect();
    neighbors.sort_unstable();

    let mut packets = Vec::new();
    for neighbor in neighbors {
        for chunk in links[&neighbor].chunks(max_cells_per_packet) {
            packets.push(encode_update_packet(neighbor, chunk));
        }
    }

    Ok(packets)
}

/// Pushes a computed schedule to the whole client population.
pub struct Distributor {
    channel: Arc<UdpAckChannel>,
    client_port: u16,
    max_cells_per_packet: usize,
    stats: Arc<RunStats>,
}

impl Distributor {
    pub fn new(
        channel: Arc<UdpAckChannel>,
        client_port: u16,
        max_cells_per_packet: usize,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            channel,
            client_port,
            max_cells_per_packet,
            stats,
        }
    }

    /// Installs `schedule` on every client: update packets concurrently,
    /// then confirmations sequentially in leaves-to-root order.
    ///
    /// Any delivery failure aborts the run; a partially informed network is
    /// worse than none.
    pub async fn distribute(
        &self,
        schedule: &Schedule,
        graph: &HashMap<NodeAddr, NodeAddr>,
        clients: &[NodeAddr],
    ) -> Result<(), Error> {
        info!(clients = clients.len(), "distributing the new schedule");

        let mut sends = JoinSet::new();
        for &client in clients {
            // Serialize up front so a client without a schedule fails the
            // run before anything is put on the wire.
            let packets = serialize_for_client(schedule, &client, self.max_cells_per_packet)?;
            debug!(%client, packets = packets.len(), "update packets serialized");

            let channel = Arc::clone(&self.channel);
            let target = SocketAddr::new(client.ip(), self.client_port);
            sends.spawn(async move {
                for packet in packets {
                    channel.send(target, &packet).await?;
                }

                Ok::<_, Error>(())
            });
        }

        while let Some(outcome) = sends.join_next().await {
            outcome.map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))??;
        }
        info!("schedule delivered to every client");

        self.stats.freeze_timeouts_before_confirmation();

        let complete = encode_update_complete();
        for client in leaves_to_root(graph, clients) {
            let target = SocketAddr::new(client.ip(), self.client_port);
            self.channel.send(target, &complete).await?;
            debug!(%client, "update confirmed");
        }
        info!("update complete confirmed by every client");

        Ok(())
    }
}
