//! The slotframe schedule model and its construction.

use std::{collections::HashMap, fmt, ops::BitOr};

use crate::addr::{HardwareAddr, NodeAddr};

pub mod assign;
pub mod order;

pub use assign::{build_schedule, AssignParams, CellGrid, MissingParentPolicy};
pub use order::leaves_to_root;

/// TSCH link option bit flags carried in every cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkOptions(u8);

impl LinkOptions {
    /// The owner transmits in this cell.
    pub const TX: Self = Self(0x01);
    /// The owner listens in this cell.
    pub const RX: Self = Self(0x02);
    /// The cell is shared (slotted-aloha style backoff).
    pub const SHARED: Self = Self(0x04);
    /// The cell is used for time synchronization.
    pub const TIMEKEEPING: Self = Self(0x08);

    /// Reconstructs flags from their wire byte.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the wire byte for these flags.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if every flag in `other` is set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LinkOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for LinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06b}", self.0)
    }
}

/// One reserved (timeslot, channel) pair on a directional link.
///
/// A cell is scoped to an (owner, neighbor) pair; the neighbor is identified
/// by hardware address because topology reports only carry hardware
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub options: LinkOptions,
    pub timeslot: u16,
    pub channel: u16,
}

/// The computed slotframe assignment: owner → neighbor → cells.
///
/// Built once per run and only read during distribution.
#[derive(Debug, Default, Clone)]
pub struct Schedule {
    cells: HashMap<NodeAddr, HashMap<HardwareAddr, Vec<Cell>>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cell to the (owner, neighbor) link.
    pub fn add_cell(&mut self, owner: NodeAddr, neighbor: HardwareAddr, cell: Cell) {
        self.cells
            .entry(owner)
            .or_default()
            .entry(neighbor)
            .or_default()
            .push(cell);
    }

    /// Returns `true` if any cell on the (owner, neighbor) link already
    /// occupies the given (timeslot, channel).
    ///
    /// Receive cells count too: a mote cannot transmit in a slot it is
    /// already listening in on the same link.
    pub fn is_cell_used(
        &self,
        owner: &NodeAddr,
        neighbor: &HardwareAddr,
        timeslot: u16,
        channel: u16,
    ) -> bool {
        self.cells
            .get(owner)
            .and_then(|links| links.get(neighbor))
            .map(|cells| {
                cells
                    .iter()
                    .any(|cell| cell.timeslot == timeslot && cell.channel == channel)
            })
            .unwrap_or(false)
    }

    /// Returns the per-neighbor cell lists for `owner`, if any.
    pub fn cells_for(&self, owner: &NodeAddr) -> Option<&HashMap<HardwareAddr, Vec<Cell>>> {
        self.cells.get(owner)
    }

    /// Iterates over every owner in the schedule.
    pub fn owners(&self) -> impl Iterator<Item = &NodeAddr> {
        self.cells.keys()
    }

    /// Returns the number of owners holding at least one cell.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if no cell has been assigned.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
