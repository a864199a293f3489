//! Peer migration request layer.
//!
//! Collects migration requests for one peer from several internal modules,
//! reduces them to a single resultant request and runs it against firmware.

mod orch;
mod request;
mod types;

pub use orch::{PeerMigrationOrch, PeerMigrationStats};
pub use request::{AddOutcome, PeerMigrationContext};
pub use types::{
    MigrationCompletion, MigrationRequest, MigrationStatus, ModuleId, PeerMigrationError,
    ResultantRequest,
};
