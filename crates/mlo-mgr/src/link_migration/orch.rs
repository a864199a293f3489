//! LinkMigrationOrch: moves every peer anchored on one link elsewhere.

use mlo_common::{Command, CommandKey, CommandType, SerializationGateway};
use mlo_types::{DeviceId, HwLinkId, InstanceId, PeerId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::context::LinkMigrationContext;
use super::types::{
    LinkMigrationBegin, LinkMigrationEnd, LinkMigrationError, LinkMigrationResponse,
    LinkMigrationStats,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::device::MldDevice;
use crate::peer::MloPeer;
use crate::peer_migration::{MigrationRequest, MigrationStatus, ModuleId, PeerMigrationOrch};
use crate::selection::SelectionEngine;

pub type Result<T> = std::result::Result<T, LinkMigrationError>;

/// Parameters of one bulk migration request.
pub struct LinkMigrationParams {
    pub link: HwLinkId,
    pub module: ModuleId,
    pub priority: u8,
    pub force: bool,
    pub begin: Option<LinkMigrationBegin>,
    pub end: LinkMigrationEnd,
}

/// Link migration orchestrator.
pub struct LinkMigrationOrch {
    peer_orch: Arc<PeerMigrationOrch>,
    engine: Arc<SelectionEngine>,
    serializer: Arc<SerializationGateway>,
    command_timeout: Duration,
    active: Mutex<HashSet<(DeviceId, HwLinkId)>>,
    stats: Mutex<LinkMigrationStats>,
}

impl fmt::Debug for LinkMigrationOrch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkMigrationOrch")
            .field("command_timeout", &self.command_timeout)
            .field("active", &self.active.lock().len())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl LinkMigrationOrch {
    pub fn new(
        peer_orch: Arc<PeerMigrationOrch>,
        engine: Arc<SelectionEngine>,
        serializer: Arc<SerializationGateway>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            peer_orch,
            engine,
            serializer,
            command_timeout,
            active: Mutex::new(HashSet::new()),
            stats: Mutex::new(LinkMigrationStats::default()),
        }
    }

    pub fn stats(&self) -> LinkMigrationStats {
        self.stats.lock().clone()
    }

    pub fn is_active(&self, device: DeviceId, link: HwLinkId) -> bool {
        self.active.lock().contains(&(device, link))
    }

    /// Migrates every multi-link peer anchored on `params.link`.
    ///
    /// With no eligible peer the end callback runs before this returns.
    /// Otherwise the work is queued as a serialized command; must be called
    /// from within a tokio runtime.
    pub fn request(self: &Arc<Self>, device: &Arc<MldDevice>, params: LinkMigrationParams) -> Result<()> {
        let link = params.link;
        self.stats.lock().requests += 1;

        if self.is_active(device.id(), link) {
            self.stats.lock().rejected += 1;
            audit_log!(AuditRecord::new(AuditCategory::LinkMigration, "LinkMigrationOrch", "request")
                .with_outcome(AuditOutcome::Denied)
                .with_object_id(format!("{}/{}", device.id(), link))
                .with_object_type("hw_link")
                .with_error("already active"));
            return Err(LinkMigrationError::AlreadyActive(link));
        }

        let peers: Vec<Arc<MloPeer>> = device
            .peers()
            .snapshot()
            .into_iter()
            .filter(|p| p.link_count() > 1 && p.is_primary_on(link))
            .collect();

        if peers.is_empty() {
            debug!(device = %device.id(), %link, "no peers anchored on link");
            self.stats.lock().empty += 1;
            (params.end)(LinkMigrationResponse::default());
            return Ok(());
        }

        if !self.active.lock().insert((device.id(), link)) {
            self.stats.lock().rejected += 1;
            return Err(LinkMigrationError::AlreadyActive(link));
        }

        let peer_ids: Vec<PeerId> = peers.iter().map(|p| p.id()).collect();
        let instances: BTreeSet<InstanceId> = peers
            .iter()
            .flat_map(|p| p.entries().into_iter().map(|e| e.instance))
            .collect();
        let directory = self.engine.directory();
        let load_snapshot = instances
            .into_iter()
            .map(|i| (i, directory.load(i)))
            .collect();
        let ctx = Arc::new(LinkMigrationContext::new(
            link,
            params.module,
            params.force,
            &peer_ids,
            load_snapshot,
        ));

        info!(device = %device.id(), %link, peers = peer_ids.len(), module = %params.module, "link migration queued");

        let orch = Arc::clone(self);
        let device = Arc::clone(device);
        tokio::spawn(async move {
            orch.run(device, peers, ctx, params).await;
        });
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        device: Arc<MldDevice>,
        peers: Vec<Arc<MloPeer>>,
        ctx: Arc<LinkMigrationContext>,
        params: LinkMigrationParams,
    ) {
        let LinkMigrationParams {
            link,
            module,
            priority,
            force,
            begin,
            end,
        } = params;
        let key = CommandKey::link_migration(device.id(), link);
        let cmd = Command::new(CommandType::LinkMigration, key, self.command_timeout);

        match self.serializer.acquire(cmd).await {
            Ok(active) => {
                if let Some(begin) = begin {
                    begin(link);
                }
                self.dispatch(&device, &peers, &ctx, module, priority, force);

                if timeout(active.timeout(), ctx.wait_drained()).await.is_err() {
                    self.stats.lock().timeouts += 1;
                    warn!(device = %device.id(), %link, outstanding = ctx.outstanding(), "link migration timed out");
                }
                drop(active);
            }
            Err(e) => {
                warn!(device = %device.id(), %link, error = %e, "link migration not serialized");
            }
        }

        let response = ctx.finish();
        self.active.lock().remove(&(device.id(), link));
        {
            let mut stats = self.stats.lock();
            stats.completed += 1;
            stats.peer_failures += u64::from(response.fail_peer_count);
        }

        let record = AuditRecord::new(AuditCategory::LinkMigration, "LinkMigrationOrch", "complete")
            .with_object_id(format!("{}/{}", device.id(), link))
            .with_object_type("hw_link")
            .with_correlation_id(key.to_string())
            .with_details(serde_json::json!({
                "module": module.to_string(),
                "total_peer_count": response.total_peer_count,
                "fail_peer_count": response.fail_peer_count,
                "load": ctx
                    .load_snapshot
                    .iter()
                    .map(|(i, l)| serde_json::json!({
                        "instance": i.0,
                        "num_peers": l.num_peers,
                        "avg_rssi": l.avg_rssi,
                    }))
                    .collect::<Vec<_>>(),
            }));
        if response.fail_peer_count == 0 {
            audit_log!(record.with_outcome(AuditOutcome::Success));
        } else {
            audit_log!(record.with_error(format!(
                "{} of {} peers failed",
                response.fail_peer_count, response.total_peer_count
            )));
        }

        end(response);
    }

    /// Submits one peer migration per eligible peer.
    fn dispatch(
        &self,
        device: &Arc<MldDevice>,
        peers: &[Arc<MloPeer>],
        ctx: &Arc<LinkMigrationContext>,
        module: ModuleId,
        priority: u8,
        force: bool,
    ) {
        let topology = device.topology();
        for peer in peers {
            let peer_id = peer.id();
            let dst = match self
                .engine
                .select_migration_target(&peer.entries(), ctx.link, topology.as_ref())
            {
                Ok(selection) => selection.hw_link_id,
                Err(e) => {
                    debug!(peer = %peer_id, error = %e, "no destination for peer");
                    ctx.peer_done(peer_id, MigrationStatus::Failure);
                    continue;
                }
            };

            let waiter = Arc::clone(ctx);
            let req = MigrationRequest::new(module, priority, ctx.link, Some(dst), force)
                .with_completion(move |status| waiter.peer_done(peer_id, status));
            self.stats.lock().peer_requests += 1;
            if let Err(e) = self.peer_orch.add_request(device, peer, req) {
                debug!(peer = %peer_id, error = %e, "peer migration refused");
                ctx.peer_done(peer_id, MigrationStatus::Failure);
            }
        }
    }
}
