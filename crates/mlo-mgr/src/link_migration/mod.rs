//! Link migration request layer.
//!
//! Bulk request to move the primary anchor of every multi-link peer off one
//! hardware link, expressed as one peer migration request per peer.

mod context;
mod orch;
mod types;

pub use context::LinkMigrationContext;
pub use orch::{LinkMigrationOrch, LinkMigrationParams};
pub use types::{
    LinkMigrationBegin, LinkMigrationEnd, LinkMigrationError, LinkMigrationResponse,
    LinkMigrationStats,
};
