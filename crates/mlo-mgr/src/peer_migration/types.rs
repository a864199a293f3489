//! Peer migration request types.

use mlo_types::HwLinkId;
use std::fmt;
use thiserror::Error;

/// Peer migration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerMigrationError {
    /// A more important request already names another destination.
    #[error("Destination {requested} conflicts with resultant destination {resultant}")]
    ConflictingDestination {
        requested: HwLinkId,
        resultant: HwLinkId,
    },
    #[error("Peer is being deleted")]
    PeerDeleted,
    #[error("Peer has no link {0}")]
    UnknownLink(HwLinkId),
    #[error("Destination {0} equals the source link")]
    InvalidDestination(HwLinkId),
    #[error("Peer has a single link")]
    SingleLinkPeer,
}

/// Final status delivered to every waiter of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStatus {
    Success,
    Failure,
    /// Peer torn down before the request finished.
    Deleted,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStatus::Success => write!(f, "success"),
            MigrationStatus::Failure => write!(f, "failure"),
            MigrationStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Internal module asking for a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    LoadBalance,
    LinkDisable,
    LinkMigration,
    Host,
    Firmware,
    Other(u8),
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::LoadBalance => write!(f, "load_balance"),
            ModuleId::LinkDisable => write!(f, "link_disable"),
            ModuleId::LinkMigration => write!(f, "link_migration"),
            ModuleId::Host => write!(f, "host"),
            ModuleId::Firmware => write!(f, "firmware"),
            ModuleId::Other(id) => write!(f, "module{}", id),
        }
    }
}

/// Completion sink of one request.
pub type MigrationCompletion = Box<dyn FnOnce(MigrationStatus) + Send + 'static>;

/// One requester's migration request.
///
/// Lower `priority` numbers are more important. `dst == None` lets the
/// selection engine pick the destination.
pub struct MigrationRequest {
    pub requester: ModuleId,
    pub priority: u8,
    pub src: HwLinkId,
    pub dst: Option<HwLinkId>,
    pub force: bool,
    completion: Option<MigrationCompletion>,
}

impl fmt::Debug for MigrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRequest")
            .field("requester", &self.requester)
            .field("priority", &self.priority)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("force", &self.force)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl MigrationRequest {
    pub fn new(
        requester: ModuleId,
        priority: u8,
        src: HwLinkId,
        dst: Option<HwLinkId>,
        force: bool,
    ) -> Self {
        Self {
            requester,
            priority,
            src,
            dst,
            force,
            completion: None,
        }
    }

    pub fn with_completion<F>(mut self, completion: F) -> Self
    where
        F: FnOnce(MigrationStatus) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
        self
    }

    pub(crate) fn with_boxed_completion(mut self, completion: Option<MigrationCompletion>) -> Self {
        self.completion = completion;
        self
    }

    /// Delivers the final status. Call without holding any peer or device lock.
    pub fn complete(mut self, status: MigrationStatus) {
        if let Some(cb) = self.completion.take() {
            cb(status);
        }
    }
}

/// Pending requests of a peer folded into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultantRequest {
    /// Source of the most recently added request.
    pub src: HwLinkId,
    /// Destination of the most important request that names one.
    pub dst: Option<HwLinkId>,
    /// Most important priority among the folded requests.
    pub priority: u8,
    pub force: bool,
    pub requesters: Vec<ModuleId>,
}
