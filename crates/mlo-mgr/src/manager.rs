//! MloManager: host-facing entry point.
//!
//! Owns the device registry and the orchestrators, and routes host and
//! firmware requests to them.

use mlo_common::{HandleMap, SerializationGateway};
use mlo_types::{Channel, DeviceId, HwLinkId, LinkId, MacAddress, PeerId, VdevId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::config::MloConfig;
use crate::device::{ConnectionState, DeferredDisconnect, DeviceRole, MldDevice, VdevInfo};
use crate::gateway::{
    ConfirmStatus, ConnectionManager, CsaTracker, DiagnosticSink, DisconnectReason,
    DisconnectSource, FirmwareGateway, GatewayError, LogDiagnosticSink,
};
use crate::link_info::{LinkInfo, LinkTableError};
use crate::link_migration::{
    LinkMigrationBegin, LinkMigrationEnd, LinkMigrationError, LinkMigrationOrch,
    LinkMigrationParams, LinkMigrationStats,
};
use crate::link_switch::{
    DisconnectOutcome, Initiator, LinkSwitchCallbacks, LinkSwitchError, LinkSwitchObserver,
    LinkSwitchOrch, LinkSwitchReason, LinkSwitchStats, LinkSwitchTicket, SubsystemId,
};
use crate::peer::{LinkPeerEntry, MloPeer, PeerError, RemovedLink};
use crate::peer_migration::{
    MigrationCompletion, MigrationRequest, ModuleId, PeerMigrationError, PeerMigrationOrch,
    PeerMigrationStats,
};
use crate::selection::{
    topology_from_config, InstanceDirectory, LoadTracker, SelectionEngine, SelectionError,
};
use crate::{audit_log, info_log};

/// Manager errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("Device {0} already exists")]
    DeviceExists(DeviceId),
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("Vdev {0} already exists")]
    VdevExists(VdevId),
    #[error("Vdev {0} not found")]
    VdevNotFound(VdevId),
    #[error("Peer {0} already exists")]
    PeerExists(PeerId),
    #[error("Peer {0} not found")]
    PeerNotFound(PeerId),
    #[error("Callbacks do not match the migration target")]
    CallbackMismatch,
    #[error("Link table error: {0}")]
    LinkTable(#[from] LinkTableError),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),
    #[error("Peer migration error: {0}")]
    PeerMigration(#[from] PeerMigrationError),
    #[error("Link migration error: {0}")]
    LinkMigration(#[from] LinkMigrationError),
    #[error("Link switch error: {0}")]
    LinkSwitch(#[from] LinkSwitchError),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// What a PTQM migration request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    /// One peer of a device.
    Peer(DeviceId, PeerId),
    /// Every multi-link peer anchored on the request's source link.
    Link(DeviceId),
}

/// Completion sinks matching a [`MigrationTarget`].
pub enum MigrationCallbacks {
    Peer(Option<MigrationCompletion>),
    Link {
        begin: Option<LinkMigrationBegin>,
        end: LinkMigrationEnd,
    },
}

/// External collaborators handed to the manager.
pub struct MloCollaborators {
    pub connection: Arc<dyn ConnectionManager>,
    pub firmware: Arc<dyn FirmwareGateway>,
    /// Per-instance load; a [`LoadTracker`] when unset.
    pub directory: Option<Arc<dyn InstanceDirectory>>,
    pub csa: Option<Arc<dyn CsaTracker>>,
    /// Fatal-condition sink; [`LogDiagnosticSink`] when unset.
    pub diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl MloCollaborators {
    pub fn new(connection: Arc<dyn ConnectionManager>, firmware: Arc<dyn FirmwareGateway>) -> Self {
        Self {
            connection,
            firmware,
            directory: None,
            csa: None,
            diagnostics: None,
        }
    }
}

/// MLO link manager.
pub struct MloManager {
    config: MloConfig,
    devices: HandleMap<DeviceId, MldDevice>,
    engine: Arc<SelectionEngine>,
    link_switch: Arc<LinkSwitchOrch>,
    peer_migration: Arc<PeerMigrationOrch>,
    link_migration: Arc<LinkMigrationOrch>,
    csa: Option<Arc<dyn CsaTracker>>,
}

impl fmt::Debug for MloManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MloManager")
            .field("devices", &self.devices.keys())
            .field("engine", &self.engine)
            .field("link_switch", &self.link_switch)
            .field("peer_migration", &self.peer_migration)
            .field("link_migration", &self.link_migration)
            .finish()
    }
}

impl MloManager {
    pub fn new(config: MloConfig, collaborators: MloCollaborators) -> Self {
        let directory = collaborators
            .directory
            .unwrap_or_else(|| Arc::new(LoadTracker::new()));
        let diagnostics = collaborators
            .diagnostics
            .unwrap_or_else(|| Arc::new(LogDiagnosticSink));
        let serializer = SerializationGateway::new(config.serialization.max_pending);
        let engine = Arc::new(SelectionEngine::new(config.selection.clone(), directory));

        let link_switch = Arc::new(LinkSwitchOrch::new(
            LinkSwitchCallbacks {
                connection: collaborators.connection,
                firmware: Arc::clone(&collaborators.firmware),
                diagnostics,
            },
            Arc::clone(&serializer),
            config.link_switch.max_observers,
            config.serialization.command_timeout(),
            config.firmware.response_timeout(),
        ));
        let peer_migration = Arc::new(PeerMigrationOrch::new(
            collaborators.firmware,
            Arc::clone(&engine),
            config.firmware.response_timeout(),
        ));
        let link_migration = Arc::new(LinkMigrationOrch::new(
            Arc::clone(&peer_migration),
            Arc::clone(&engine),
            serializer,
            config.serialization.command_timeout(),
        ));

        info!(topology = ?config.topology.kind, "MLO manager initialized");
        Self {
            config,
            devices: HandleMap::new(),
            engine,
            link_switch,
            peer_migration,
            link_migration,
            csa: collaborators.csa,
        }
    }

    pub fn config(&self) -> &MloConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn InstanceDirectory> {
        self.engine.directory()
    }

    pub fn link_switch_stats(&self) -> LinkSwitchStats {
        self.link_switch.stats()
    }

    pub fn peer_migration_stats(&self) -> PeerMigrationStats {
        self.peer_migration.stats()
    }

    pub fn link_migration_stats(&self) -> LinkMigrationStats {
        self.link_migration.stats()
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<MldDevice>> {
        self.devices.acquire(&id)
    }

    fn require_device(&self, id: DeviceId) -> Result<Arc<MldDevice>> {
        self.devices.acquire(&id).ok_or(ManagerError::DeviceNotFound(id))
    }

    /// Creates a device; its topology policy comes from configuration.
    pub fn create_device(&self, id: DeviceId, mld_addr: MacAddress, role: DeviceRole) -> Result<Arc<MldDevice>> {
        let topology = topology_from_config(&self.config.topology);
        let device = MldDevice::new(id, mld_addr, role, topology);
        let device = self
            .devices
            .insert(id, device)
            .map_err(|_| ManagerError::DeviceExists(id))?;

        audit_log!(AuditRecord::new(AuditCategory::DeviceLifecycle, "MloManager", "create_device")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(id.to_string())
            .with_object_type("mld_device")
            .with_details(serde_json::json!({
                "mld_addr": mld_addr.to_string(),
                "role": format!("{:?}", role),
                "topology": device.topology().name(),
            })));
        Ok(device)
    }

    /// Removes a device and tears down its peers.
    pub fn destroy_device(&self, id: DeviceId) -> Result<()> {
        let device = self.devices.remove(&id).ok_or(ManagerError::DeviceNotFound(id))?;
        for peer_id in device.peers().keys() {
            if let Some(peer) = device.peers().remove(&peer_id) {
                self.retire_peer(&device, &peer);
            }
        }
        audit_log!(AuditRecord::new(AuditCategory::DeviceLifecycle, "MloManager", "destroy_device")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(id.to_string())
            .with_object_type("mld_device"));
        Ok(())
    }

    pub fn add_vdev(&self, device_id: DeviceId, vdev: VdevInfo) -> Result<()> {
        let device = self.require_device(device_id)?;
        let mut inner = device.lock();
        if inner.vdevs.iter().any(|v| v.vdev_id == vdev.vdev_id) {
            return Err(ManagerError::VdevExists(vdev.vdev_id));
        }
        inner.vdevs.push(vdev);
        Ok(())
    }

    /// Records a completed association on `link_id` through `vdev_id`.
    pub fn set_connected(
        &self,
        device_id: DeviceId,
        vdev_id: VdevId,
        link_id: LinkId,
        ap_mld_addr: MacAddress,
    ) -> Result<()> {
        let device = self.require_device(device_id)?;
        let mut inner = device.lock();
        let local_addr = inner
            .link_table
            .get_link_by_id(link_id)
            .map(|l| l.local_addr)
            .ok_or(LinkTableError::NotFound(link_id))?;
        if !inner.vdevs.iter().any(|v| v.vdev_id == vdev_id) {
            return Err(ManagerError::VdevNotFound(vdev_id));
        }
        inner.link_table.set_link_active(link_id, true)?;
        if let Some(vdev) = inner.vdevs.iter_mut().find(|v| v.vdev_id == vdev_id) {
            vdev.link_id = link_id;
            vdev.link_addr = local_addr;
        }
        inner.conn_state = ConnectionState::Connected;
        inner.ap_mld_addr = Some(ap_mld_addr);
        drop(inner);

        info_log!("MloManager", device = %device_id, vdev = %vdev_id, link = %link_id, "connected");
        Ok(())
    }

    pub fn set_disconnected(&self, device_id: DeviceId) -> Result<()> {
        let device = self.require_device(device_id)?;
        let mut inner = device.lock();
        inner.conn_state = ConnectionState::Disconnected;
        inner.ap_mld_addr = None;
        for vdev in inner.vdevs.iter_mut() {
            vdev.link_id = LinkId::INVALID;
        }
        let active: Vec<LinkId> = inner.link_table.active_links().map(|l| l.link_id).collect();
        for link_id in active {
            inner.link_table.set_link_active(link_id, false)?;
        }
        Ok(())
    }

    pub fn add_partner_link(&self, device_id: DeviceId, link: LinkInfo) -> Result<()> {
        let device = self.require_device(device_id)?;
        let link_id = link.link_id;
        device.lock().link_table.add_partner_link(link)?;
        audit_log!(AuditRecord::new(AuditCategory::LinkTable, "MloManager", "add_partner_link")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(format!("{}/{}", device_id, link_id))
            .with_object_type("link"));
        Ok(())
    }

    pub fn get_link_by_id(&self, device_id: DeviceId, link_id: LinkId) -> Result<LinkInfo> {
        let device = self.require_device(device_id)?;
        let link = device.link(link_id);
        link.ok_or(ManagerError::LinkTable(LinkTableError::NotFound(link_id)))
    }

    /// Refreshes a link's AP address and channel.
    ///
    /// A channel change is reported to the CSA tracker after the device
    /// lock is released.
    pub fn update_ap_link(
        &self,
        device_id: DeviceId,
        link_id: LinkId,
        ap_addr: MacAddress,
        channel: Channel,
    ) -> Result<()> {
        let device = self.require_device(device_id)?;
        let changed = device
            .lock()
            .link_table
            .update_ap_link(link_id, ap_addr, channel);
        let changed = match changed {
            Ok(changed) => changed,
            Err(e) => {
                warn!(device = %device_id, link = %link_id, error = %e, "AP link update ignored");
                return Err(e.into());
            }
        };
        if changed {
            if let Some(csa) = &self.csa {
                csa.on_link_channel_update(device_id, link_id, &channel);
            }
            audit_log!(AuditRecord::new(AuditCategory::LinkTable, "MloManager", "channel_update")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(format!("{}/{}", device_id, link_id))
                .with_object_type("link")
                .with_details(serde_json::json!({
                    "freq_mhz": channel.freq_mhz,
                    "bandwidth_mhz": channel.bandwidth_mhz(),
                })));
        }
        Ok(())
    }

    pub fn clear_link(&self, device_id: DeviceId, ap_addr: MacAddress) -> Result<LinkId> {
        let device = self.require_device(device_id)?;
        let link_id = device.lock().link_table.clear_link(&ap_addr)?;
        Ok(link_id)
    }

    pub fn reset_links(&self, device_id: DeviceId) -> Result<()> {
        let device = self.require_device(device_id)?;
        device.lock().link_table.reset_all();
        Ok(())
    }

    pub fn record_rejection(&self, device_id: DeviceId, link_id: LinkId, status_code: u16) -> Result<()> {
        let device = self.require_device(device_id)?;
        device
            .lock()
            .link_table
            .record_rejection(link_id, status_code)?;
        Ok(())
    }

    pub fn peer(&self, device_id: DeviceId, peer_id: PeerId) -> Option<Arc<MloPeer>> {
        self.device(device_id).and_then(|d| d.peer(peer_id))
    }

    fn require_peer(&self, device: &MldDevice, peer_id: PeerId) -> Result<Arc<MloPeer>> {
        device.peer(peer_id).ok_or(ManagerError::PeerNotFound(peer_id))
    }

    /// Creates an ML peer and assigns its initial primary anchor.
    pub fn create_peer(
        &self,
        device_id: DeviceId,
        peer_id: PeerId,
        mld_addr: MacAddress,
        entries: Vec<LinkPeerEntry>,
    ) -> Result<Arc<MloPeer>> {
        let device = self.require_device(device_id)?;
        if device.peers().contains_key(&peer_id) {
            return Err(ManagerError::PeerExists(peer_id));
        }

        let topology = device.topology();
        let selection = match self.engine.select_initial_primary(
            &entries,
            device.is_single_instance(),
            topology.as_ref(),
        ) {
            Ok(selection) => selection,
            Err(e) => {
                audit_log!(AuditRecord::new(AuditCategory::PrimaryAssignment, "MloManager", "create_peer")
                    .with_object_id(format!("{}/{}", device_id, peer_id))
                    .with_object_type("peer")
                    .with_error(e.to_string()));
                return Err(e.into());
            }
        };

        let peer = MloPeer::new(peer_id, mld_addr, device_id, entries, selection.hw_link_id)?;
        let peer = device
            .peers()
            .insert(peer_id, peer)
            .map_err(|_| ManagerError::PeerExists(peer_id))?;
        if let Some(primary) = peer.primary() {
            self.engine
                .directory()
                .record_primary(primary.instance, primary.rssi);
        }

        audit_log!(AuditRecord::new(AuditCategory::PrimaryAssignment, "MloManager", "create_peer")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(format!("{}/{}", device_id, peer_id))
            .with_object_type("peer")
            .with_details(serde_json::json!({
                "hw_link_id": selection.hw_link_id.0,
                "instance": selection.instance.0,
                "rule": selection.rule.to_string(),
            })));
        Ok(peer)
    }

    pub fn add_link_peer(&self, device_id: DeviceId, peer_id: PeerId, entry: LinkPeerEntry) -> Result<()> {
        let device = self.require_device(device_id)?;
        let peer = self.require_peer(&device, peer_id)?;
        let hw_link_id = entry.hw_link_id;
        peer.add_link_entry(entry)?;
        if let Some(primary) = peer.primary().filter(|p| p.hw_link_id == hw_link_id) {
            self.engine
                .directory()
                .record_primary(primary.instance, primary.rssi);
        }
        Ok(())
    }

    /// Removes one link of a peer, reselecting the primary if it was on it.
    pub fn remove_link_peer(&self, device_id: DeviceId, peer_id: PeerId, hw_link_id: HwLinkId) -> Result<RemovedLink> {
        let device = self.require_device(device_id)?;
        let peer = self.require_peer(&device, peer_id)?;
        let topology = device.topology();
        let single_instance = device.is_single_instance();

        let removed = peer.remove_link_entry(hw_link_id, |remaining| {
            self.engine
                .select_initial_primary(remaining, single_instance, topology.as_ref())
                .ok()
                .map(|s| s.hw_link_id)
        })?;

        let directory = self.engine.directory();
        if removed.entry.is_primary {
            directory.release_primary(removed.entry.instance, removed.entry.rssi);
        }
        if let Some(new_primary) = &removed.new_primary {
            directory.record_primary(new_primary.instance, new_primary.rssi);
            audit_log!(AuditRecord::new(AuditCategory::PrimaryAssignment, "MloManager", "reselect_primary")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(format!("{}/{}", device_id, peer_id))
                .with_object_type("peer")
                .with_details(serde_json::json!({
                    "removed": hw_link_id.0,
                    "hw_link_id": new_primary.hw_link_id.0,
                })));
        }
        Ok(removed)
    }

    /// Records a new RSSI; a primary link keeps its instance average current.
    pub fn update_peer_rssi(&self, device_id: DeviceId, peer_id: PeerId, hw_link_id: HwLinkId, rssi: i8) -> Result<()> {
        let device = self.require_device(device_id)?;
        let peer = self.require_peer(&device, peer_id)?;
        let previous = peer.update_rssi(hw_link_id, rssi)?;
        if previous.is_primary && previous.rssi != rssi {
            let directory = self.engine.directory();
            directory.release_primary(previous.instance, previous.rssi);
            directory.record_primary(previous.instance, rssi);
        }
        Ok(())
    }

    /// Deletes a peer. Outstanding migration waiters complete with `Deleted`.
    pub fn destroy_peer(&self, device_id: DeviceId, peer_id: PeerId) -> Result<()> {
        let device = self.require_device(device_id)?;
        let peer = device
            .peers()
            .remove(&peer_id)
            .ok_or(ManagerError::PeerNotFound(peer_id))?;
        self.retire_peer(&device, &peer);
        Ok(())
    }

    fn retire_peer(&self, device: &MldDevice, peer: &MloPeer) {
        self.peer_migration.teardown_peer(device, peer);
        if let Some(primary) = peer.primary() {
            self.engine
                .directory()
                .release_primary(primary.instance, primary.rssi);
        }
        audit_log!(AuditRecord::new(AuditCategory::PrimaryAssignment, "MloManager", "destroy_peer")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(format!("{}/{}", device.id(), peer.id()))
            .with_object_type("peer"));
    }

    pub fn register_observer(&self, id: SubsystemId, observer: Arc<dyn LinkSwitchObserver>) -> Result<()> {
        self.link_switch.register_observer(id, observer)?;
        Ok(())
    }

    pub fn unregister_observer(&self, id: SubsystemId) -> bool {
        self.link_switch.unregister_observer(id)
    }

    /// Host-initiated link switch.
    pub fn request_link_switch(
        &self,
        device_id: DeviceId,
        vdev_id: VdevId,
        curr_link_id: LinkId,
        new_link_id: LinkId,
        new_freq_mhz: u32,
        reason: LinkSwitchReason,
    ) -> std::result::Result<LinkSwitchTicket, LinkSwitchError> {
        let device = self
            .device(device_id)
            .ok_or(LinkSwitchError::DeviceNotFound(device_id))?;
        self.link_switch.request(
            &device,
            vdev_id,
            curr_link_id,
            new_link_id,
            new_freq_mhz,
            reason,
            Initiator::Host,
        )
    }

    /// Firmware-initiated link switch.
    ///
    /// Any request that does not get queued is answered with `REJECT`.
    pub async fn handle_fw_link_switch_request(
        &self,
        device_id: DeviceId,
        vdev_id: VdevId,
        curr_link_id: LinkId,
        new_link_id: LinkId,
        new_freq_mhz: u32,
        reason: LinkSwitchReason,
    ) -> std::result::Result<LinkSwitchTicket, LinkSwitchError> {
        let result = match self.device(device_id) {
            Some(device) => self.link_switch.request(
                &device,
                vdev_id,
                curr_link_id,
                new_link_id,
                new_freq_mhz,
                reason,
                Initiator::Firmware,
            ),
            None => Err(LinkSwitchError::DeviceNotFound(device_id)),
        };
        if let Err(e) = &result {
            warn!(device = %device_id, vdev = %vdev_id, error = %e, "firmware link switch refused");
            self.link_switch
                .send_confirm(device_id, ConfirmStatus::Reject, reason)
                .await;
        }
        result
    }

    /// Cancels a link switch that has not started executing.
    pub fn cancel_link_switch(&self, ticket: &LinkSwitchTicket) -> bool {
        self.link_switch.cancel(&ticket.key())
    }

    /// Host disconnect of the whole MLD; deferred while a link switch runs.
    pub async fn request_disconnect(
        &self,
        device_id: DeviceId,
        vdev_id: VdevId,
        reason: DisconnectReason,
    ) -> Result<DisconnectOutcome> {
        let device = self.require_device(device_id)?;
        if device.vdev(vdev_id).is_none() {
            return Err(ManagerError::VdevNotFound(vdev_id));
        }
        let bssid = device.ap_mld_addr().unwrap_or(MacAddress::ZERO);
        let outcome = self
            .link_switch
            .disconnect(
                &device,
                DeferredDisconnect {
                    vdev_id,
                    source: DisconnectSource::Host,
                    reason,
                    bssid,
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Requests a primary-anchor migration for one peer or for every peer
    /// anchored on `src`.
    pub fn request_ptqm_migration(
        &self,
        target: MigrationTarget,
        module: ModuleId,
        priority: u8,
        src: HwLinkId,
        dst: Option<HwLinkId>,
        force: bool,
        callbacks: MigrationCallbacks,
    ) -> Result<()> {
        match (target, callbacks) {
            (MigrationTarget::Peer(device_id, peer_id), MigrationCallbacks::Peer(completion)) => {
                let device = self.require_device(device_id)?;
                let peer = self.require_peer(&device, peer_id)?;
                let req = MigrationRequest::new(module, priority, src, dst, force)
                    .with_boxed_completion(completion);
                self.peer_migration.add_request(&device, &peer, req)?;
                Ok(())
            }
            (MigrationTarget::Link(device_id), MigrationCallbacks::Link { begin, end }) => {
                let device = self.require_device(device_id)?;
                self.link_migration.request(
                    &device,
                    LinkMigrationParams {
                        link: src,
                        module,
                        priority,
                        force,
                        begin,
                        end,
                    },
                )?;
                Ok(())
            }
            _ => Err(ManagerError::CallbackMismatch),
        }
    }
}
