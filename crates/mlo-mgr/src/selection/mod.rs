//! Primary-anchor (PTQM) selection.
//!
//! Pure decision logic: given a peer's link entries, per-instance load
//! from an [`InstanceDirectory`] and the device's [`TopologyPolicy`],
//! pick the link whose instance should anchor the peer.

mod engine;
mod load;
mod rssi;
mod topology;

pub use engine::{Selection, SelectionEngine, SelectionError, SelectionRule};
pub use load::{InstanceDirectory, InstanceLoad, LoadTracker};
pub use rssi::PathLossTable;
pub use topology::{
    topology_from_config, CentralInstanceTopology, TopologyPolicy, UnconstrainedTopology,
};
