//! PeerMigrationOrch: executes resultant migration requests.

use mlo_types::HwLinkId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::types::{MigrationRequest, MigrationStatus, PeerMigrationError, ResultantRequest};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::device::MldDevice;
use crate::gateway::{FirmwareGateway, PtqmPeerEntry};
use crate::peer::MloPeer;
use crate::selection::SelectionEngine;

pub type Result<T> = std::result::Result<T, PeerMigrationError>;

/// Peer migration statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMigrationStats {
    /// Requests accepted into a pending list.
    pub requests: u64,
    /// Requests refused at submission.
    pub rejected: u64,
    /// Requests displaced by a more important destination.
    pub discarded: u64,
    /// Resultant requests that moved the primary.
    pub migrations: u64,
    /// Resultant requests completed without a firmware round-trip.
    pub no_ops: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Waiters completed with `Deleted`.
    pub deleted: u64,
}

/// Runs at most one migration per peer and fans completions out to waiters.
pub struct PeerMigrationOrch {
    firmware: Arc<dyn FirmwareGateway>,
    engine: Arc<SelectionEngine>,
    response_timeout: Duration,
    stats: Mutex<PeerMigrationStats>,
}

impl fmt::Debug for PeerMigrationOrch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerMigrationOrch")
            .field("response_timeout", &self.response_timeout)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

enum Outcome {
    Migrated { from: HwLinkId, to: HwLinkId },
    NoOp(&'static str),
    Failed(String),
    Deleted,
}

impl PeerMigrationOrch {
    pub fn new(
        firmware: Arc<dyn FirmwareGateway>,
        engine: Arc<SelectionEngine>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            firmware,
            engine,
            response_timeout,
            stats: Mutex::new(PeerMigrationStats::default()),
        }
    }

    pub fn stats(&self) -> PeerMigrationStats {
        self.stats.lock().clone()
    }

    /// Queues a request for `peer` and starts it if the peer is idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_request(
        self: &Arc<Self>,
        device: &Arc<MldDevice>,
        peer: &Arc<MloPeer>,
        req: MigrationRequest,
    ) -> Result<()> {
        let checked = self.check_request(peer, &req);
        let outcome = checked.and_then(|_| peer.with_migration(|ctx| ctx.add_request(req)));
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                self.stats.lock().rejected += 1;
                audit_log!(AuditRecord::new(
                    AuditCategory::PeerMigration,
                    "PeerMigrationOrch",
                    "add_request"
                )
                .with_outcome(AuditOutcome::Denied)
                .with_object_id(format!("{}/{}", device.id(), peer.id()))
                .with_object_type("peer")
                .with_error(e.to_string()));
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.requests += 1;
            stats.discarded += outcome.discarded.len() as u64;
        }
        for displaced in outcome.discarded {
            debug!(peer = %peer.id(), requester = %displaced.requester, "request displaced");
            displaced.complete(MigrationStatus::Failure);
        }

        if outcome.idle {
            self.kick(Arc::clone(device), Arc::clone(peer));
        }
        Ok(())
    }

    fn check_request(&self, peer: &MloPeer, req: &MigrationRequest) -> Result<()> {
        if peer.link_count() < 2 {
            return Err(PeerMigrationError::SingleLinkPeer);
        }
        if !peer.has_link(req.src) {
            return Err(PeerMigrationError::UnknownLink(req.src));
        }
        if let Some(dst) = req.dst {
            if dst == req.src {
                return Err(PeerMigrationError::InvalidDestination(dst));
            }
            if !peer.has_link(dst) {
                return Err(PeerMigrationError::UnknownLink(dst));
            }
        }
        Ok(())
    }

    /// Activates the peer's next resultant request, if any.
    fn kick(self: &Arc<Self>, device: Arc<MldDevice>, peer: Arc<MloPeer>) {
        let Some(resultant) = peer.with_migration(|ctx| ctx.activate()) else {
            return;
        };
        device.set_migration_pending(peer.id(), true);
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            orch.run(device, peer, resultant).await;
        });
    }

    async fn run(self: Arc<Self>, device: Arc<MldDevice>, peer: Arc<MloPeer>, resultant: ResultantRequest) {
        let outcome = self.execute(&device, &peer, &resultant).await;

        let status = match &outcome {
            Outcome::Migrated { .. } | Outcome::NoOp(_) => MigrationStatus::Success,
            Outcome::Failed(_) => MigrationStatus::Failure,
            Outcome::Deleted => MigrationStatus::Deleted,
        };

        let record = AuditRecord::new(AuditCategory::PeerMigration, "PeerMigrationOrch", "migrate")
            .with_object_id(format!("{}/{}", device.id(), peer.id()))
            .with_object_type("peer");
        {
            let mut stats = self.stats.lock();
            match &outcome {
                Outcome::Migrated { from, to } => {
                    stats.migrations += 1;
                    audit_log!(record
                        .with_outcome(AuditOutcome::Success)
                        .with_details(serde_json::json!({
                            "from": from.0,
                            "to": to.0,
                            "priority": resultant.priority,
                            "force": resultant.force,
                        })));
                }
                Outcome::NoOp(why) => {
                    stats.no_ops += 1;
                    audit_log!(record
                        .with_outcome(AuditOutcome::Success)
                        .with_details(serde_json::json!({ "no_op": why })));
                }
                Outcome::Failed(err) => {
                    stats.failures += 1;
                    audit_log!(record.with_error(err.clone()));
                }
                Outcome::Deleted => {}
            }
        }

        let waiters = peer.with_migration(|ctx| ctx.complete_active());
        device.set_migration_pending(peer.id(), false);
        for waiter in waiters {
            waiter.complete(status);
        }

        self.kick(device, peer);
    }

    async fn execute(&self, device: &MldDevice, peer: &MloPeer, resultant: &ResultantRequest) -> Outcome {
        let Some(primary) = peer.primary() else {
            return Outcome::Failed("peer has no primary link".to_string());
        };
        let topology = device.topology();

        let dst = match resultant.dst {
            Some(dst) => dst,
            None => {
                let entries = peer.entries();
                match self
                    .engine
                    .select_migration_target(&entries, resultant.src, topology.as_ref())
                {
                    Ok(sel) => sel.hw_link_id,
                    Err(e) => return Outcome::Failed(e.to_string()),
                }
            }
        };
        let Some(dst_entry) = peer.entry(dst) else {
            return Outcome::Failed(format!("destination {} left the peer", dst));
        };

        if dst == primary.hw_link_id {
            return Outcome::NoOp("destination already primary");
        }
        if !resultant.force && primary.hw_link_id != resultant.src {
            return Outcome::NoOp("source no longer primary");
        }
        if !resultant.force && !topology.is_migration_allowed(primary.instance, dst_entry.instance) {
            return Outcome::Failed(format!(
                "{} does not allow {} -> {}",
                topology.name(),
                primary.instance,
                dst_entry.instance
            ));
        }

        let entry = PtqmPeerEntry {
            peer_id: peer.id(),
            src_hw_link: primary.hw_link_id,
            dst_hw_link: dst,
        };
        let sent = timeout(
            self.response_timeout,
            self.firmware.send_ptqm_migrate(primary.vdev_id, &[entry]),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Outcome::Failed(e.to_string()),
            Err(_) => {
                self.stats.lock().timeouts += 1;
                warn!(peer = %peer.id(), "PTQM migrate timed out");
                return Outcome::Failed(format!("no response within {:?}", self.response_timeout));
            }
        }

        if peer.with_migration(|ctx| ctx.is_torn_down()) {
            return Outcome::Deleted;
        }

        match peer.set_primary(dst) {
            Ok(old) => {
                let directory = self.engine.directory();
                directory.release_primary(old.instance, old.rssi);
                directory.record_primary(dst_entry.instance, dst_entry.rssi);
                Outcome::Migrated {
                    from: old.hw_link_id,
                    to: dst,
                }
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    /// Completes every waiter of a departing peer with `Deleted`.
    pub fn teardown_peer(&self, device: &MldDevice, peer: &MloPeer) {
        let waiters = peer.with_migration(|ctx| ctx.teardown());
        device.set_migration_pending(peer.id(), false);
        self.stats.lock().deleted += waiters.len() as u64;
        for waiter in waiters {
            waiter.complete(MigrationStatus::Deleted);
        }
    }
}
