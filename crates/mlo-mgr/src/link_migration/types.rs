//! Link migration request types.

use mlo_common::SerializationError;
use mlo_types::HwLinkId;
use thiserror::Error;

/// Link migration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkMigrationError {
    #[error("Migration away from {0} already in progress")]
    AlreadyActive(HwLinkId),
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Aggregate outcome of a bulk migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMigrationResponse {
    pub total_peer_count: u32,
    pub fail_peer_count: u32,
}

/// Called once the bulk migration holds the device's command slot.
pub type LinkMigrationBegin = Box<dyn FnOnce(HwLinkId) + Send + 'static>;

/// Called exactly once with the aggregate outcome.
pub type LinkMigrationEnd = Box<dyn FnOnce(LinkMigrationResponse) + Send + 'static>;

/// Link migration statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMigrationStats {
    pub requests: u64,
    pub rejected: u64,
    /// Requests finished immediately for lack of eligible peers.
    pub empty: u64,
    pub completed: u64,
    pub peer_requests: u64,
    pub peer_failures: u64,
    pub timeouts: u64,
}
