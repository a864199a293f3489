//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mlo_mgr::config::MloConfig;
use mlo_mgr::device::{DeviceRole, VdevInfo};
use mlo_mgr::gateway::{
    ConfirmStatus, ConnectParams, ConnectionManager, CsaTracker, DiagnosticSink, DisconnectReason,
    DisconnectSource, FatalEvent, FirmwareGateway, GatewayError, PtqmPeerEntry,
};
use mlo_mgr::link_info::LinkInfo;
use mlo_mgr::link_switch::{
    LinkSwitchObserver, LinkSwitchReason, LinkSwitchRequest, LinkSwitchStatus, NotifyReason,
};
use mlo_mgr::peer::LinkPeerEntry;
use mlo_mgr::{MloCollaborators, MloManager};
use mlo_types::{
    Channel, ChannelWidth, DeviceId, HwLinkId, InstanceId, LinkId, MacAddress, PeerId, VdevId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Call recorded by [`MockConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnCall {
    Disconnect {
        vdev: VdevId,
        source: DisconnectSource,
        reason: DisconnectReason,
        bssid: MacAddress,
    },
    Connect {
        vdev: VdevId,
        link_id: LinkId,
        bssid: MacAddress,
    },
}

/// Connection manager that records calls; connects can be held back.
pub struct MockConnection {
    pub calls: Mutex<Vec<ConnCall>>,
    pub fail_disconnect: AtomicBool,
    pub fail_connect: AtomicBool,
    connect_gate: Semaphore,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_disconnect: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_gate: Semaphore::new(Semaphore::MAX_PERMITS),
        })
    }

    /// A connection manager whose connects wait for [`MockConnection::release_connects`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_disconnect: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_gate: Semaphore::new(0),
        })
    }

    pub fn release_connects(&self, n: usize) {
        self.connect_gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<ConnCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionManager for MockConnection {
    async fn disconnect(
        &self,
        vdev: VdevId,
        source: DisconnectSource,
        reason: DisconnectReason,
        bssid: MacAddress,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(ConnCall::Disconnect {
            vdev,
            source,
            reason,
            bssid,
        });
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionManager("disconnect failed".into()));
        }
        Ok(())
    }

    async fn start_connect(&self, vdev: VdevId, params: ConnectParams) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(ConnCall::Connect {
            vdev,
            link_id: params.link_id,
            bssid: params.bssid,
        });
        if let Ok(permit) = self.connect_gate.acquire().await {
            permit.forget();
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionManager("association failed".into()));
        }
        Ok(())
    }
}

/// Firmware that records every message; PTQM migrates can be held back.
pub struct MockFirmware {
    pub set_mac: Mutex<Vec<(MacAddress, MacAddress, VdevId)>>,
    pub ptqm: Mutex<Vec<(VdevId, Vec<PtqmPeerEntry>)>>,
    pub confirms: Mutex<Vec<(DeviceId, ConfirmStatus, LinkSwitchReason)>>,
    pub fail_set_mac: AtomicBool,
    pub fail_ptqm_for: Mutex<HashSet<PeerId>>,
    ptqm_gate: Semaphore,
}

impl MockFirmware {
    pub fn new() -> Arc<Self> {
        Self::with_gate(Semaphore::MAX_PERMITS)
    }

    /// Firmware whose PTQM migrates wait for [`MockFirmware::release_ptqm`].
    pub fn gated() -> Arc<Self> {
        Self::with_gate(0)
    }

    fn with_gate(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            set_mac: Mutex::new(Vec::new()),
            ptqm: Mutex::new(Vec::new()),
            confirms: Mutex::new(Vec::new()),
            fail_set_mac: AtomicBool::new(false),
            fail_ptqm_for: Mutex::new(HashSet::new()),
            ptqm_gate: Semaphore::new(permits),
        })
    }

    pub fn release_ptqm(&self, n: usize) {
        self.ptqm_gate.add_permits(n);
    }

    pub fn confirms(&self) -> Vec<ConfirmStatus> {
        self.confirms
            .lock()
            .unwrap()
            .iter()
            .map(|(_, status, _)| *status)
            .collect()
    }

    pub fn ptqm_entries(&self) -> Vec<PtqmPeerEntry> {
        self.ptqm
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, entries)| entries.iter().copied())
            .collect()
    }
}

#[async_trait]
impl FirmwareGateway for MockFirmware {
    async fn send_set_mac_addr(
        &self,
        old_addr: MacAddress,
        new_addr: MacAddress,
        vdev: VdevId,
    ) -> Result<(), GatewayError> {
        self.set_mac.lock().unwrap().push((old_addr, new_addr, vdev));
        if self.fail_set_mac.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("set mac addr".into()));
        }
        Ok(())
    }

    async fn send_ptqm_migrate(&self, vdev: VdevId, peers: &[PtqmPeerEntry]) -> Result<(), GatewayError> {
        if let Ok(permit) = self.ptqm_gate.acquire().await {
            permit.forget();
        }
        self.ptqm.lock().unwrap().push((vdev, peers.to_vec()));
        let failing = self.fail_ptqm_for.lock().unwrap();
        if peers.iter().any(|p| failing.contains(&p.peer_id)) {
            return Err(GatewayError::Rejected("ptqm migrate".into()));
        }
        Ok(())
    }

    async fn send_link_switch_confirm(
        &self,
        device: DeviceId,
        status: ConfirmStatus,
        reason: LinkSwitchReason,
    ) -> Result<(), GatewayError> {
        self.confirms.lock().unwrap().push((device, status, reason));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDiagnostics {
    pub events: Mutex<Vec<FatalEvent>>,
}

impl DiagnosticSink for MockDiagnostics {
    fn raise_fatal(&self, event: FatalEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// CSA tracker that records every channel update it is told about.
#[derive(Default)]
pub struct RecordingCsa {
    pub updates: Mutex<Vec<(DeviceId, LinkId, Channel)>>,
}

impl RecordingCsa {
    pub fn updates(&self) -> Vec<(DeviceId, LinkId, Channel)> {
        self.updates.lock().unwrap().clone()
    }
}

impl CsaTracker for RecordingCsa {
    fn on_link_channel_update(&self, device: DeviceId, link_id: LinkId, channel: &Channel) {
        self.updates.lock().unwrap().push((device, link_id, *channel));
    }
}

/// Observer that records reasons and answers with a fixed verdict for one reason.
pub struct RecordingObserver {
    pub seen: Mutex<Vec<NotifyReason>>,
    veto_on: Option<NotifyReason>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            veto_on: None,
        })
    }

    pub fn vetoing(reason: NotifyReason) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            veto_on: Some(reason),
        })
    }

    pub fn seen(&self) -> Vec<NotifyReason> {
        self.seen.lock().unwrap().clone()
    }
}

impl LinkSwitchObserver for RecordingObserver {
    fn notify(&self, _vdev: VdevId, _request: &LinkSwitchRequest, reason: NotifyReason) -> LinkSwitchStatus {
        self.seen.lock().unwrap().push(reason);
        if self.veto_on == Some(reason) {
            LinkSwitchStatus::Failure
        } else {
            LinkSwitchStatus::Success
        }
    }
}

/// Manager plus handles to its mocks.
pub struct Harness {
    pub mgr: Arc<MloManager>,
    pub conn: Arc<MockConnection>,
    pub fw: Arc<MockFirmware>,
    pub diag: Arc<MockDiagnostics>,
    pub csa: Arc<RecordingCsa>,
}

pub fn harness_with(config: MloConfig, conn: Arc<MockConnection>, fw: Arc<MockFirmware>) -> Harness {
    let diag = Arc::new(MockDiagnostics::default());
    let csa = Arc::new(RecordingCsa::default());
    let mut collaborators = MloCollaborators::new(conn.clone(), fw.clone());
    collaborators.diagnostics = Some(diag.clone());
    collaborators.csa = Some(csa.clone());
    Harness {
        mgr: Arc::new(MloManager::new(config, collaborators)),
        conn,
        fw,
        diag,
        csa,
    }
}

pub fn harness() -> Harness {
    harness_with(MloConfig::default(), MockConnection::new(), MockFirmware::new())
}

pub const DEV: DeviceId = DeviceId(1);
pub const VDEV: VdevId = VdevId(0);

pub fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
}

pub fn ap_mld() -> MacAddress {
    MacAddress::new([0x02, 0xaa, 0x00, 0x00, 0x00, 0x01])
}

pub fn link(id: u8) -> LinkId {
    LinkId::new(id).unwrap()
}

/// Link 0 on instance 0 (5 GHz), link 1 on instance 1 (6 GHz), link 2 on
/// instance 2 (2.4 GHz).
pub fn partner_links() -> Vec<LinkInfo> {
    vec![
        LinkInfo::new(link(0), InstanceId(0), HwLinkId(0), mac(0x10), mac(0xa0), Channel::new(5180, ChannelWidth::Mhz80, 23)),
        LinkInfo::new(link(1), InstanceId(1), HwLinkId(1), mac(0x11), mac(0xa1), Channel::new(5955, ChannelWidth::Mhz320, 23)),
        LinkInfo::new(link(2), InstanceId(2), HwLinkId(2), mac(0x12), mac(0xa2), Channel::new(2412, ChannelWidth::Mhz20, 20)),
    ]
}

/// STA device associated on link 0 through vdev 0.
pub fn connected_sta(h: &Harness) {
    h.mgr.create_device(DEV, mac(0x01), DeviceRole::Sta).unwrap();
    h.mgr
        .add_vdev(
            DEV,
            VdevInfo {
                vdev_id: VDEV,
                instance: InstanceId(0),
                link_id: LinkId::INVALID,
                link_addr: MacAddress::ZERO,
            },
        )
        .unwrap();
    for l in partner_links() {
        h.mgr.add_partner_link(DEV, l).unwrap();
    }
    h.mgr.set_connected(DEV, VDEV, link(0), ap_mld()).unwrap();
}

/// AP device with one vdev per instance.
pub fn ap_device(h: &Harness, instances: u8) {
    h.mgr.create_device(DEV, mac(0x01), DeviceRole::Ap).unwrap();
    for i in 0..instances {
        h.mgr
            .add_vdev(
                DEV,
                VdevInfo {
                    vdev_id: VdevId(i),
                    instance: InstanceId(i),
                    link_id: LinkId::INVALID,
                    link_addr: mac(0x20 + i),
                },
            )
            .unwrap();
    }
}

/// Peer link on instance/hw link `i`, served by vdev `i`.
pub fn peer_entry(i: u8, freq: u32, width: ChannelWidth, rssi: i8) -> LinkPeerEntry {
    LinkPeerEntry::new(
        link(i),
        HwLinkId(u16::from(i)),
        InstanceId(i),
        VdevId(i),
        mac(0x40 + i),
        Channel::new(freq, width, 23),
        rssi,
    )
}

pub fn peer_id(id: u16) -> PeerId {
    PeerId::new(id).unwrap()
}

pub fn primaries(h: &Harness, peer: PeerId) -> usize {
    h.mgr
        .peer(DEV, peer)
        .unwrap()
        .entries()
        .iter()
        .filter(|e| e.is_primary)
        .count()
}
