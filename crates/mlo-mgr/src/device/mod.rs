//! MLD device context.
//!
//! One [`MldDevice`] per logical multi-link device. The device owns its
//! link info table, the single link-switch request slot, the vdev list,
//! the pending-migration bitmap and the peer registry. All of it sits
//! behind one short-held lock that is never kept across an `.await`.

use bit_vec::BitVec;
use mlo_common::HandleMap;
use mlo_types::{DeviceId, InstanceId, LinkId, MacAddress, PeerId, VdevId, MAX_MLO_PEER_ID};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::gateway::{DisconnectReason, DisconnectSource};
use crate::link_info::{LinkInfo, LinkInfoTable};
use crate::link_switch::{LinkSwitchRequest, LinkSwitchState};
use crate::peer::MloPeer;
use crate::selection::TopologyPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Ap,
    Sta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// A local vdev affiliated with the MLD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdevInfo {
    pub vdev_id: VdevId,
    pub instance: InstanceId,
    /// Link the vdev currently serves; [`LinkId::INVALID`] when idle.
    pub link_id: LinkId,
    pub link_addr: MacAddress,
}

/// Disconnect held back until the active serialized command retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredDisconnect {
    pub vdev_id: VdevId,
    pub source: DisconnectSource,
    pub reason: DisconnectReason,
    pub bssid: MacAddress,
}

pub(crate) struct DeviceInner {
    pub(crate) link_table: LinkInfoTable,
    pub(crate) link_switch: Option<LinkSwitchRequest>,
    pub(crate) vdevs: Vec<VdevInfo>,
    pub(crate) conn_state: ConnectionState,
    pub(crate) ap_mld_addr: Option<MacAddress>,
    pub(crate) pending_migration_peers: BitVec,
    pub(crate) deferred_disconnect: Option<DeferredDisconnect>,
}

/// Logical multi-link device.
pub struct MldDevice {
    id: DeviceId,
    mld_addr: MacAddress,
    role: DeviceRole,
    topology: Arc<dyn TopologyPolicy>,
    inner: Mutex<DeviceInner>,
    peers: HandleMap<PeerId, MloPeer>,
}

impl fmt::Debug for MldDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MldDevice")
            .field("id", &self.id)
            .field("mld_addr", &self.mld_addr)
            .field("role", &self.role)
            .field("topology", &self.topology.name())
            .field("links", &inner.link_table.len())
            .field("vdevs", &inner.vdevs.len())
            .field("conn_state", &inner.conn_state)
            .field("link_switch", &inner.link_switch.as_ref().map(|r| r.state()))
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl MldDevice {
    pub fn new(
        id: DeviceId,
        mld_addr: MacAddress,
        role: DeviceRole,
        topology: Arc<dyn TopologyPolicy>,
    ) -> Self {
        Self {
            id,
            mld_addr,
            role,
            topology,
            inner: Mutex::new(DeviceInner {
                link_table: LinkInfoTable::new(),
                link_switch: None,
                vdevs: Vec::new(),
                conn_state: ConnectionState::Disconnected,
                ap_mld_addr: None,
                pending_migration_peers: BitVec::from_elem(MAX_MLO_PEER_ID as usize, false),
                deferred_disconnect: None,
            }),
            peers: HandleMap::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn mld_addr(&self) -> MacAddress {
        self.mld_addr
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn topology(&self) -> Arc<dyn TopologyPolicy> {
        Arc::clone(&self.topology)
    }

    pub fn peers(&self) -> &HandleMap<PeerId, MloPeer> {
        &self.peers
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<Arc<MloPeer>> {
        self.peers.acquire(&peer_id)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceInner> {
        self.inner.lock()
    }

    pub fn link(&self, link_id: LinkId) -> Option<LinkInfo> {
        self.inner.lock().link_table.get_link_by_id(link_id).cloned()
    }

    pub fn partner_links(&self) -> Vec<LinkInfo> {
        self.inner.lock().link_table.partner_links().cloned().collect()
    }

    pub fn vdev(&self, vdev_id: VdevId) -> Option<VdevInfo> {
        self.inner
            .lock()
            .vdevs
            .iter()
            .find(|v| v.vdev_id == vdev_id)
            .cloned()
    }

    pub fn vdevs(&self) -> Vec<VdevInfo> {
        self.inner.lock().vdevs.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().conn_state
    }

    pub fn ap_mld_addr(&self) -> Option<MacAddress> {
        self.inner.lock().ap_mld_addr
    }

    /// State of the in-flight link switch, `Idle` when there is none.
    pub fn link_switch_state(&self) -> LinkSwitchState {
        self.inner
            .lock()
            .link_switch
            .as_ref()
            .map(|r| r.state())
            .unwrap_or_default()
    }

    pub fn link_switch_request(&self) -> Option<LinkSwitchRequest> {
        self.inner.lock().link_switch.clone()
    }

    /// True when every vdev and partner link terminates on one instance.
    pub fn is_single_instance(&self) -> bool {
        let inner = self.inner.lock();
        let instances: HashSet<InstanceId> = inner
            .vdevs
            .iter()
            .map(|v| v.instance)
            .chain(inner.link_table.partner_links().map(|l| l.instance))
            .collect();
        instances.len() <= 1
    }

    /// Peers with a migration in flight.
    pub fn pending_migration_peers(&self) -> Vec<PeerId> {
        self.inner
            .lock()
            .pending_migration_peers
            .iter()
            .enumerate()
            .filter(|(_, set)| *set)
            .filter_map(|(bit, _)| PeerId::new(bit as u16).ok())
            .collect()
    }

    pub(crate) fn set_migration_pending(&self, peer_id: PeerId, pending: bool) {
        self.inner
            .lock()
            .pending_migration_peers
            .set(peer_id.bit(), pending);
    }

    /// Stores a disconnect for later. Returns false if one is already held.
    pub(crate) fn defer_disconnect(&self, disconnect: DeferredDisconnect) -> bool {
        let mut inner = self.inner.lock();
        if inner.deferred_disconnect.is_some() {
            return false;
        }
        inner.deferred_disconnect = Some(disconnect);
        true
    }

    pub(crate) fn take_deferred_disconnect(&self) -> Option<DeferredDisconnect> {
        self.inner.lock().deferred_disconnect.take()
    }

    pub fn has_deferred_disconnect(&self) -> bool {
        self.inner.lock().deferred_disconnect.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::UnconstrainedTopology;
    use mlo_types::{Channel, ChannelWidth, HwLinkId};
    use pretty_assertions::assert_eq;

    fn device() -> MldDevice {
        MldDevice::new(
            DeviceId(1),
            MacAddress::new([0x02, 0, 0, 0, 0, 0x10]),
            DeviceRole::Sta,
            Arc::new(UnconstrainedTopology),
        )
    }

    #[test]
    fn test_idle_by_default() {
        let dev = device();
        assert_eq!(dev.link_switch_state(), LinkSwitchState::Idle);
        assert_eq!(dev.connection_state(), ConnectionState::Disconnected);
        assert!(dev.pending_migration_peers().is_empty());
        assert!(dev.is_single_instance());
    }

    #[test]
    fn test_single_instance_detection() {
        let dev = device();
        {
            let mut inner = dev.lock();
            inner.vdevs.push(VdevInfo {
                vdev_id: VdevId(0),
                instance: InstanceId(0),
                link_id: LinkId::INVALID,
                link_addr: MacAddress::ZERO,
            });
            inner
                .link_table
                .add_partner_link(LinkInfo::new(
                    LinkId::new(1).unwrap(),
                    InstanceId(0),
                    HwLinkId(1),
                    MacAddress::ZERO,
                    MacAddress::ZERO,
                    Channel::new(5180, ChannelWidth::Mhz80, 20),
                ))
                .unwrap();
        }
        assert!(dev.is_single_instance());

        dev.lock()
            .link_table
            .add_partner_link(LinkInfo::new(
                LinkId::new(2).unwrap(),
                InstanceId(1),
                HwLinkId(2),
                MacAddress::ZERO,
                MacAddress::ZERO,
                Channel::new(5955, ChannelWidth::Mhz320, 20),
            ))
            .unwrap();
        assert!(!dev.is_single_instance());
    }

    #[test]
    fn test_pending_migration_bitmap() {
        let dev = device();
        let p3 = PeerId::new(3).unwrap();
        let p900 = PeerId::new(900).unwrap();
        dev.set_migration_pending(p3, true);
        dev.set_migration_pending(p900, true);
        assert_eq!(dev.pending_migration_peers(), vec![p3, p900]);
        dev.set_migration_pending(p3, false);
        assert_eq!(dev.pending_migration_peers(), vec![p900]);
    }

    #[test]
    fn test_deferred_disconnect_slot() {
        let dev = device();
        let d = DeferredDisconnect {
            vdev_id: VdevId(0),
            source: DisconnectSource::Host,
            reason: DisconnectReason::UserRequested,
            bssid: MacAddress::ZERO,
        };
        assert!(dev.defer_disconnect(d));
        assert!(!dev.defer_disconnect(d));
        assert_eq!(dev.take_deferred_disconnect(), Some(d));
        assert!(!dev.has_deferred_disconnect());
    }
}
