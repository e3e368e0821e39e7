//! The three report collectors feeding the scheduler.
//!
//! Each collector accumulates per-mote state under a lock, exposes a
//! readiness predicate (all expected motes have reported) and a snapshot of
//! its state for the scheduler to consume once ready. All three tolerate
//! concurrent writes from reports dispatched in parallel.

mod bandwidth;
mod graph;
mod topology;

pub use bandwidth::BandwidthCollector;
pub use graph::{GraphCollector, RplLink};
pub use topology::TopologyCollector;
