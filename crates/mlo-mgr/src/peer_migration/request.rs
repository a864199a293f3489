//! Per-peer migration request reduction.
//!
//! Requests from several modules for the same peer are kept in a pending
//! list and folded into one resultant request:
//!
//! - source: the most recently added request's source
//! - destination: taken from the most important request naming one
//! - a new destination that conflicts with the resultant one replaces every
//!   destination-bearing request if it is more important, and is rejected
//!   otherwise
//!
//! At most one resultant request is active per peer. Everything pending
//! when it activates rides along and shares its completion status.

use mlo_types::HwLinkId;

use super::types::{MigrationRequest, PeerMigrationError, ResultantRequest};

/// Result of [`PeerMigrationContext::add_request`].
#[derive(Debug)]
pub struct AddOutcome {
    /// Requests displaced by the new one; complete them with `Failure`.
    pub discarded: Vec<MigrationRequest>,
    /// No request is active; the caller should activate.
    pub idle: bool,
}

#[derive(Debug)]
struct ActiveMigration {
    resultant: ResultantRequest,
    waiters: Vec<MigrationRequest>,
}

/// Pending and active migration requests of one peer.
#[derive(Debug, Default)]
pub struct PeerMigrationContext {
    pending: Vec<MigrationRequest>,
    active: Option<ActiveMigration>,
    torn_down: bool,
}

impl PeerMigrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn active_request(&self) -> Option<&ResultantRequest> {
        self.active.as_ref().map(|a| &a.resultant)
    }

    /// Destination and priority of the most important pending request
    /// naming a destination. The earliest one wins priority ties.
    fn resultant_dst(&self) -> Option<(HwLinkId, u8)> {
        let mut best: Option<(HwLinkId, u8)> = None;
        for req in &self.pending {
            if let Some(dst) = req.dst {
                if best.map(|(_, p)| req.priority < p).unwrap_or(true) {
                    best = Some((dst, req.priority));
                }
            }
        }
        best
    }

    /// The pending list folded into one request.
    pub fn resultant(&self) -> Option<ResultantRequest> {
        let last = self.pending.last()?;
        Some(ResultantRequest {
            src: last.src,
            dst: self.resultant_dst().map(|(dst, _)| dst),
            priority: self.pending.iter().map(|r| r.priority).min().unwrap_or(last.priority),
            force: self.pending.iter().any(|r| r.force),
            requesters: self.pending.iter().map(|r| r.requester).collect(),
        })
    }

    /// Adds a request to the pending list.
    pub fn add_request(&mut self, req: MigrationRequest) -> Result<AddOutcome, PeerMigrationError> {
        if self.torn_down {
            return Err(PeerMigrationError::PeerDeleted);
        }

        let mut discarded = Vec::new();
        if let (Some(requested), Some((resultant, priority))) = (req.dst, self.resultant_dst()) {
            if requested != resultant {
                if req.priority >= priority {
                    return Err(PeerMigrationError::ConflictingDestination {
                        requested,
                        resultant,
                    });
                }
                let (with_dst, rest): (Vec<_>, Vec<_>) =
                    self.pending.drain(..).partition(|r| r.dst.is_some());
                self.pending = rest;
                discarded = with_dst;
            }
        }

        self.pending.push(req);
        Ok(AddOutcome {
            discarded,
            idle: self.active.is_none(),
        })
    }

    /// Moves the pending list into the active slot.
    ///
    /// Returns the resultant request to execute, or `None` if a request is
    /// already active or nothing is pending.
    pub fn activate(&mut self) -> Option<ResultantRequest> {
        if self.torn_down || self.active.is_some() {
            return None;
        }
        let resultant = self.resultant()?;
        let waiters = std::mem::take(&mut self.pending);
        self.active = Some(ActiveMigration {
            resultant: resultant.clone(),
            waiters,
        });
        Some(resultant)
    }

    /// Retires the active request and returns its waiters.
    pub fn complete_active(&mut self) -> Vec<MigrationRequest> {
        self.active.take().map(|a| a.waiters).unwrap_or_default()
    }

    /// Drops every request; further requests are refused.
    pub fn teardown(&mut self) -> Vec<MigrationRequest> {
        self.torn_down = true;
        let mut all = self.complete_active();
        all.append(&mut self.pending);
        all
    }
}
