//! ML peer contexts and their per-link entries.

mod context;
mod types;

pub use context::{MloPeer, RemovedLink};
pub use types::{LinkPeerEntry, PeerError};
