//! A centralized schedule controller for 6TiSCH/RPL low-power wireless
//! meshes.
//!
//! The controller collects three kinds of reports from a fixed population of
//! motes over UDP (routing-parent links, radio-neighbor topology, bandwidth
//! demand), then computes a conflict-free (timeslot, channel) slotframe
//! assignment and installs it on every mote.
//!
//! Two pieces do the heavy lifting:
//!
//! 1. [`channel::UdpAckChannel`], a stop-and-wait reliability layer over raw
//!    datagrams: every payload is framed with a 1-byte class/sequence header,
//!    retransmitted until acknowledged, and deduplicated on receipt. At most
//!    one packet per peer is ever in flight, which is what makes per-peer
//!    delivery ordered.
//! 2. [`schedule::build_schedule`], a greedy first-fit search over the
//!    (channel, timeslot) grid that gives every mote a downlink cell before
//!    granting its uplink demand, while keeping each mote's reservations
//!    conflict-free across all of its neighbors.
//!
//! [`server::Controller`] ties them together: collect until every mote has
//! reported, assign, distribute, return the run statistics.

pub mod addr;
pub mod channel;
pub mod collect;
pub mod dispatch;
pub mod error;
pub mod schedule;
pub mod server;
pub mod stats;
pub mod update;
pub mod wire;

pub use crate::{
    addr::{AddressRegistry, HardwareAddr, NodeAddr},
    error::Error,
    server::{Config, Controller},
};
