//! Greedy first-fit cell assignment over the collected state.

use std::{collections::HashMap, ops::Range};

use tracing::{debug, warn};

use crate::{
    addr::{AddressRegistry, HardwareAddr, NodeAddr},
    error::Error,
    schedule::{Cell, LinkOptions, Schedule},
};

/// The (channel, timeslot) space scanned for free cells.
///
/// The bounds vary between deployments, so they are parameters rather than
/// constants; the defaults match a 15-channel, 100-slot slotframe.
#[derive(Debug, Clone)]
pub struct CellGrid {
    pub channels: Range<u16>,
    pub timeslots: Range<u16>,
}

impl Default for CellGrid {
    fn default() -> Self {
        Self {
            channels: 1..16,
            timeslots: 1..101,
        }
    }
}

/// What to do with a demand reported by a mote with no known routing parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingParentPolicy {
    /// Log the mote and leave its demand out of the schedule.
    #[default]
    Skip,
    /// Abort the whole computation.
    Fatal,
}

/// Tuning for [`build_schedule`].
#[derive(Debug, Clone, Default)]
pub struct AssignParams {
    pub grid: CellGrid,
    pub missing_parent: MissingParentPolicy,
}

/// Computes a conflict-free schedule from the collected graph, demand and
/// topology snapshots.
///
/// Motes are visited in address order. For each mote with a demand, one
/// descending (parent to mote) cell is allocated before any of its ascending
/// cells, so every mote is reachable from the root before its own uplink
/// bandwidth is granted. Exhausting the grid is a capacity error and aborts
/// the computation.
pub fn build_schedule(
    graph: &HashMap<NodeAddr, NodeAddr>,
    bandwidth: &HashMap<NodeAddr, u8>,
    topology: &HashMap<NodeAddr, Vec<HardwareAddr>>,
    registry: &AddressRegistry,
    params: &AssignParams,
) -> Result<Schedule, Error> {
    let mut schedule = Schedule::new();

    let mut motes: Vec<NodeAddr> = bandwidth.keys().copied().collect();
    motes.sort_unstable();

    for mote in motes {
        let demand = bandwidth[&mote];

        let parent = match graph.get(&mote) {
            Some(parent) => *parent,
            None => match params.missing_parent {
                MissingParentPolicy::Skip => {
                    warn!(%mote, "no routing parent recorded, skipping its demand");
                    continue;
                }
                MissingParentPolicy::Fatal => return Err(Error::MissingParent(mote)),
            },
        };

        // Downlink before uplink.
        allocate_link(&mut schedule, parent, mote, topology, registry, &params.grid)?;

        for _ in 0..demand {
            allocate_link(&mut schedule, mote, parent, topology, registry, &params.grid)?;
        }

        debug!(%mote, %parent, demand, "cells assigned");
    }

    Ok(schedule)
}

/// Finds the lowest free (channel, timeslot) pair for a transmission from
/// `sender` to `receiver` and records it as a TX/RX cell pair atomically.
///
/// A pair is free when none of `sender`'s cells, toward any of its
/// neighbors, already occupies it.
fn allocate_link(
    schedule: &mut Schedule,
    sender: NodeAddr,
    receiver: NodeAddr,
    topology: &HashMap<NodeAddr, Vec<HardwareAddr>>,
    registry: &AddressRegistry,
    grid: &CellGrid,
) -> Result<(), Error> {
    let sender_hw = registry
        .hardware_of(&sender)
        .ok_or(Error::UnresolvedHardwareAddr(sender))?;
    let receiver_hw = registry
        .hardware_of(&receiver)
        .ok_or(Error::UnresolvedHardwareAddr(receiver))?;

    let no_neighbors = Vec::new();
    let neighbors = topology.get(&sender).unwrap_or(&no_neighbors);

    for channel in grid.channels.clone() {
        for timeslot in grid.timeslots.clone() {
            let conflict = neighbors
                .iter()
                .any(|neighbor| schedule.is_cell_used(&sender, neighbor, timeslot, channel));
            if conflict {
                continue;
            }

            schedule.add_cell(
                sender,
                receiver_hw,
                Cell {
                    options: LinkOptions::TX,
                    timeslot,
                    channel,
                },
            );
            schedule.add_cell(
                receiver,
                sender_hw,
                Cell {
                    options: LinkOptions::RX,
                    timeslot,
                    channel,
                },
            );

            return Ok(());
        }
    }

    Err(Error::NoAvailableCell)
}
