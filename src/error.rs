//! Crate-wide error taxonomy.

use std::io;

use crate::addr::NodeAddr;

/// Errors surfaced by the transport, the collectors and the scheduler.
///
/// Decode and delivery errors are fatal to the run: a malformed report or an
/// unreachable mote invalidates the whole schedule installation. Dropped or
/// duplicated datagrams are handled inside the transport and never appear
/// here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A datagram arrived without even a header byte.
    #[error("received an empty datagram")]
    EmptyDatagram,

    /// The 2-bit packet class field held an unassigned value.
    #[error("invalid packet class {0:#04b}")]
    InvalidPacketClass(u8),

    /// A sequence number larger than the 6-bit header field can carry.
    #[error("sequence number {0} exceeds the protocol maximum")]
    SequenceOutOfRange(u8),

    /// The leading application byte did not name a known message kind.
    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),

    /// A graph report whose length is not a whole number of link records.
    #[error("graph payload of {len} bytes is not a multiple of {record} byte records")]
    MalformedGraphPayload { len: usize, record: usize },

    /// A topology report whose length is not a positive multiple of the
    /// hardware address width.
    #[error("topology payload of {len} bytes is not a positive multiple of {entry} byte entries")]
    MalformedTopologyPayload { len: usize, entry: usize },

    /// A bandwidth report that is not exactly one byte.
    #[error("bandwidth payload must be exactly 1 byte, got {len}")]
    MalformedBandwidthPayload { len: usize },

    /// A mote reported demand but no routing parent is known for it.
    #[error("no routing parent recorded for {0}")]
    MissingParent(NodeAddr),

    /// A schedule endpoint whose hardware address was never registered.
    #[error("no hardware address registered for {0}")]
    UnresolvedHardwareAddr(NodeAddr),

    /// The whole (channel, timeslot) grid is occupied.
    #[error("no available cell left in the slotframe grid")]
    NoAvailableCell,

    /// Distribution was asked to update a mote the schedule knows nothing
    /// about.
    #[error("no schedule entries for client {0}")]
    NoScheduleForClient(NodeAddr),

    /// The peer never acknowledged a framed packet within the retry budget.
    #[error("ack retries exhausted for {peer} after {attempts} attempts")]
    RetriesExhausted { peer: NodeAddr, attempts: u32 },
}
