//! Primary-anchor selection and migration integration tests.

mod common;

use common::*;
use mlo_mgr::config::{MloConfig, TopologyKind};
use mlo_mgr::link_migration::{LinkMigrationError, LinkMigrationResponse};
use mlo_mgr::peer_migration::{MigrationStatus, ModuleId, PeerMigrationError};
use mlo_mgr::selection::InstanceLoad;
use mlo_mgr::{ManagerError, MigrationCallbacks, MigrationTarget};
use mlo_types::{ChannelWidth, HwLinkId, InstanceId, PeerId};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn three_link_entries() -> Vec<mlo_mgr::peer::LinkPeerEntry> {
    vec![
        peer_entry(0, 5180, ChannelWidth::Mhz160, -50).assoc(),
        peer_entry(1, 5955, ChannelWidth::Mhz320, -60),
        peer_entry(2, 2412, ChannelWidth::Mhz20, -45),
    ]
}

fn peer_callback(
    tx: &mpsc::UnboundedSender<(u8, MigrationStatus)>,
    tag: u8,
) -> MigrationCallbacks {
    let tx = tx.clone();
    MigrationCallbacks::Peer(Some(Box::new(move |status| {
        let _ = tx.send((tag, status));
    })))
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(u8, MigrationStatus)>) -> (u8, MigrationStatus) {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_topology_forces_central_instance() {
    let mut config = MloConfig::default();
    config.topology.kind = TopologyKind::Central;
    config.topology.adjacency = vec![[0, 2], [1, 2]];
    let h = harness_with(config, MockConnection::new(), MockFirmware::new());
    ap_device(&h, 3);

    let peer = h
        .mgr
        .create_peer(DEV, peer_id(1), mac(0x50), three_link_entries())
        .unwrap();
    assert_eq!(peer.primary().unwrap().instance, InstanceId(2));
    assert_eq!(primaries(&h, peer_id(1)), 1);
}

#[tokio::test]
async fn test_single_instance_uses_assoc_link() {
    let h = harness();
    ap_device(&h, 1);

    let entries = vec![
        peer_entry(0, 5180, ChannelWidth::Mhz80, -70),
        peer_entry(1, 5955, ChannelWidth::Mhz320, -40).assoc(),
    ];
    let peer = h.mgr.create_peer(DEV, peer_id(2), mac(0x51), entries).unwrap();
    assert_eq!(peer.primary().unwrap().hw_link_id, HwLinkId(1));

    let single = vec![peer_entry(0, 5180, ChannelWidth::Mhz80, -70).assoc()];
    let peer = h.mgr.create_peer(DEV, peer_id(3), mac(0x52), single).unwrap();
    assert_eq!(peer.primary().unwrap().hw_link_id, HwLinkId(0));
}

#[tokio::test]
async fn test_exactly_one_primary_through_link_changes() {
    let h = harness();
    ap_device(&h, 3);

    let peer = h
        .mgr
        .create_peer(DEV, peer_id(4), mac(0x53), three_link_entries())
        .unwrap();
    assert_eq!(primaries(&h, peer_id(4)), 1);
    assert_eq!(h.mgr.directory().load(peer.primary().unwrap().instance).num_peers, 1);

    let primary = peer.primary().unwrap().hw_link_id;
    let removed = h.mgr.remove_link_peer(DEV, peer_id(4), primary).unwrap();
    assert!(removed.entry.is_primary);
    assert!(removed.new_primary.is_some());
    assert_eq!(primaries(&h, peer_id(4)), 1);

    let other = peer
        .entries()
        .iter()
        .find(|e| !e.is_primary)
        .map(|e| e.hw_link_id)
        .unwrap();
    h.mgr.remove_link_peer(DEV, peer_id(4), other).unwrap();
    assert_eq!(primaries(&h, peer_id(4)), 1);

    h.mgr.destroy_peer(DEV, peer_id(4)).unwrap();
    let total: u32 = (0..3)
        .map(|i| h.mgr.directory().load(InstanceId(i)).num_peers)
        .sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_priority_reduction() {
    let h = harness_with(MloConfig::default(), MockConnection::new(), MockFirmware::gated());
    ap_device(&h, 5);

    let entries = vec![
        peer_entry(0, 5180, ChannelWidth::Mhz80, -50).assoc(),
        peer_entry(1, 5955, ChannelWidth::Mhz320, -55),
        peer_entry(2, 2412, ChannelWidth::Mhz20, -45),
        peer_entry(3, 5745, ChannelWidth::Mhz80, -58),
        peer_entry(4, 6115, ChannelWidth::Mhz160, -62),
    ];
    let peer = h.mgr.create_peer(DEV, peer_id(7), mac(0x54), entries).unwrap();
    let primary = peer.primary().unwrap().hw_link_id;
    let others: Vec<HwLinkId> = peer
        .entries()
        .iter()
        .map(|e| e.hw_link_id)
        .filter(|hw| *hw != primary)
        .collect();
    let (x, a, b, c) = (others[0], others[1], others[2], others[3]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let target = MigrationTarget::Peer(DEV, peer_id(7));

    // Occupies the active slot while firmware is held.
    h.mgr
        .request_ptqm_migration(target, ModuleId::LoadBalance, 9, primary, Some(x), false, peer_callback(&tx, 9))
        .unwrap();

    h.mgr
        .request_ptqm_migration(target, ModuleId::Other(5), 5, x, Some(a), false, peer_callback(&tx, 5))
        .unwrap();
    h.mgr
        .request_ptqm_migration(target, ModuleId::Other(2), 2, x, Some(b), false, peer_callback(&tx, 2))
        .unwrap();
    assert_eq!(next(&mut rx).await, (5, MigrationStatus::Failure));

    let err = h
        .mgr
        .request_ptqm_migration(target, ModuleId::Other(7), 7, x, Some(c), false, peer_callback(&tx, 7))
        .unwrap_err();
    assert_eq!(
        err,
        ManagerError::PeerMigration(PeerMigrationError::ConflictingDestination {
            requested: c,
            resultant: b,
        })
    );

    h.fw.release_ptqm(2);
    assert_eq!(next(&mut rx).await, (9, MigrationStatus::Success));
    assert_eq!(next(&mut rx).await, (2, MigrationStatus::Success));

    assert_eq!(peer.primary().unwrap().hw_link_id, b);
    assert_eq!(primaries(&h, peer_id(7)), 1);
    let moves: Vec<(HwLinkId, HwLinkId)> = h
        .fw
        .ptqm_entries()
        .iter()
        .map(|e| (e.src_hw_link, e.dst_hw_link))
        .collect();
    assert_eq!(moves, vec![(primary, x), (x, b)]);
    assert!(h.mgr.device(DEV).unwrap().pending_migration_peers().is_empty());
}

#[tokio::test]
async fn test_peer_teardown_completes_waiters_deleted() {
    let h = harness_with(MloConfig::default(), MockConnection::new(), MockFirmware::gated());
    ap_device(&h, 3);
    let peer = h
        .mgr
        .create_peer(DEV, peer_id(8), mac(0x55), three_link_entries())
        .unwrap();
    let primary = peer.primary().unwrap().hw_link_id;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let target = MigrationTarget::Peer(DEV, peer_id(8));
    h.mgr
        .request_ptqm_migration(target, ModuleId::Host, 3, primary, None, false, peer_callback(&tx, 3))
        .unwrap();
    h.mgr
        .request_ptqm_migration(target, ModuleId::Host, 4, primary, None, false, peer_callback(&tx, 4))
        .unwrap();

    h.mgr.destroy_peer(DEV, peer_id(8)).unwrap();
    let mut statuses = vec![next(&mut rx).await, next(&mut rx).await];
    statuses.sort_by_key(|(tag, _)| *tag);
    assert_eq!(
        statuses,
        vec![(3, MigrationStatus::Deleted), (4, MigrationStatus::Deleted)]
    );
    h.fw.release_ptqm(1);
}

#[tokio::test]
async fn test_single_link_peer_cannot_migrate() {
    let h = harness();
    ap_device(&h, 2);
    let single = vec![peer_entry(0, 5180, ChannelWidth::Mhz80, -70).assoc()];
    h.mgr.create_peer(DEV, peer_id(9), mac(0x56), single).unwrap();

    let err = h
        .mgr
        .request_ptqm_migration(
            MigrationTarget::Peer(DEV, peer_id(9)),
            ModuleId::Host,
            1,
            HwLinkId(0),
            None,
            false,
            MigrationCallbacks::Peer(None),
        )
        .unwrap_err();
    assert_eq!(err, ManagerError::PeerMigration(PeerMigrationError::SingleLinkPeer));
}

#[tokio::test]
async fn test_link_migration_without_peers_ends_immediately() {
    let h = harness();
    ap_device(&h, 3);

    let ended = Arc::new(Mutex::new(Vec::new()));
    let sink = ended.clone();
    h.mgr
        .request_ptqm_migration(
            MigrationTarget::Link(DEV),
            ModuleId::LinkDisable,
            1,
            HwLinkId(1),
            None,
            false,
            MigrationCallbacks::Link {
                begin: None,
                end: Box::new(move |resp| sink.lock().unwrap().push(resp)),
            },
        )
        .unwrap();

    assert_eq!(
        *ended.lock().unwrap(),
        vec![LinkMigrationResponse {
            total_peer_count: 0,
            fail_peer_count: 0,
        }]
    );
    assert_eq!(h.mgr.link_migration_stats().empty, 1);
}

/// Three peers anchored on hw link 0, each with a second and third link.
fn anchored_peers(h: &Harness) -> Vec<PeerId> {
    let mut ids = Vec::new();
    for id in 10..13 {
        let pid = peer_id(id);
        let single = vec![peer_entry(0, 5180, ChannelWidth::Mhz80, -50).assoc()];
        h.mgr.create_peer(DEV, pid, mac(0x60 + id as u8), single).unwrap();
        h.mgr
            .add_link_peer(DEV, pid, peer_entry(1, 5955, ChannelWidth::Mhz320, -55))
            .unwrap();
        h.mgr
            .add_link_peer(DEV, pid, peer_entry(2, 2412, ChannelWidth::Mhz20, -48))
            .unwrap();
        ids.push(pid);
    }
    ids
}

#[tokio::test]
async fn test_link_migration_moves_every_peer() {
    let h = harness();
    ap_device(&h, 3);
    let ids = anchored_peers(&h);
    h.fw.fail_ptqm_for.lock().unwrap().insert(ids[1]);

    let begun = Arc::new(Mutex::new(Vec::new()));
    let begin_sink = begun.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.mgr
        .request_ptqm_migration(
            MigrationTarget::Link(DEV),
            ModuleId::LinkDisable,
            1,
            HwLinkId(0),
            None,
            false,
            MigrationCallbacks::Link {
                begin: Some(Box::new(move |link| begin_sink.lock().unwrap().push(link))),
                end: Box::new(move |resp| {
                    let _ = tx.send(resp);
                }),
            },
        )
        .unwrap();

    let response = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        response,
        LinkMigrationResponse {
            total_peer_count: 3,
            fail_peer_count: 1,
        }
    );
    assert_eq!(*begun.lock().unwrap(), vec![HwLinkId(0)]);

    for (i, id) in ids.iter().enumerate() {
        let peer = h.mgr.peer(DEV, *id).unwrap();
        let primary = peer.primary().unwrap().hw_link_id;
        if i == 1 {
            assert_eq!(primary, HwLinkId(0));
        } else {
            assert_ne!(primary, HwLinkId(0));
        }
        assert_eq!(primaries(&h, *id), 1);
    }
    assert_eq!(h.mgr.link_migration_stats().completed, 1);
}

#[tokio::test]
async fn test_concurrent_link_migration_refused() {
    let h = harness_with(MloConfig::default(), MockConnection::new(), MockFirmware::gated());
    ap_device(&h, 3);
    anchored_peers(&h);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callbacks = |tx: mpsc::UnboundedSender<LinkMigrationResponse>| MigrationCallbacks::Link {
        begin: None,
        end: Box::new(move |resp| {
            let _ = tx.send(resp);
        }),
    };

    h.mgr
        .request_ptqm_migration(MigrationTarget::Link(DEV), ModuleId::LinkDisable, 1, HwLinkId(0), None, false, callbacks(tx.clone()))
        .unwrap();
    let err = h
        .mgr
        .request_ptqm_migration(MigrationTarget::Link(DEV), ModuleId::Host, 1, HwLinkId(0), None, false, callbacks(tx))
        .unwrap_err();
    assert_eq!(
        err,
        ManagerError::LinkMigration(LinkMigrationError::AlreadyActive(HwLinkId(0)))
    );

    h.fw.release_ptqm(3);
    let response = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(response.total_peer_count, 3);
    assert_eq!(response.fail_peer_count, 0);
}

#[tokio::test]
async fn test_mismatched_callbacks() {
    let h = harness();
    ap_device(&h, 2);
    let err = h
        .mgr
        .request_ptqm_migration(
            MigrationTarget::Link(DEV),
            ModuleId::Host,
            1,
            HwLinkId(0),
            None,
            false,
            MigrationCallbacks::Peer(None),
        )
        .unwrap_err();
    assert_eq!(err, ManagerError::CallbackMismatch);
}

#[tokio::test]
async fn test_link_migrations_on_two_links_both_finish() {
    let h = harness();
    ap_device(&h, 3);
    let on_link0 = anchored_peers(&h);
    for id in 20..22 {
        let pid = peer_id(id);
        let single = vec![peer_entry(1, 5955, ChannelWidth::Mhz320, -52).assoc()];
        h.mgr.create_peer(DEV, pid, mac(0x70 + id as u8), single).unwrap();
        h.mgr
            .add_link_peer(DEV, pid, peer_entry(2, 2412, ChannelWidth::Mhz20, -47))
            .unwrap();
    }

    let mut receivers = Vec::new();
    for hw in [HwLinkId(0), HwLinkId(1)] {
        let (tx, rx) = tokio::sync::oneshot::channel();
        h.mgr
            .request_ptqm_migration(
                MigrationTarget::Link(DEV),
                ModuleId::LinkDisable,
                1,
                hw,
                None,
                false,
                MigrationCallbacks::Link {
                    begin: None,
                    end: Box::new(move |resp| {
                        let _ = tx.send(resp);
                    }),
                },
            )
            .unwrap();
        receivers.push(rx);
    }

    let responses = timeout(WAIT, futures::future::join_all(receivers))
        .await
        .unwrap();
    let totals: Vec<u32> = responses
        .into_iter()
        .map(|r| r.unwrap().total_peer_count)
        .collect();
    assert_eq!(totals, vec![3, 2]);
    assert_eq!(h.mgr.link_migration_stats().completed, 2);
    for id in on_link0 {
        assert_ne!(h.mgr.peer(DEV, id).unwrap().primary().unwrap().hw_link_id, HwLinkId(0));
    }
}

#[tokio::test]
async fn test_rssi_update_keeps_instance_average() {
    let h = harness();
    ap_device(&h, 2);
    let soc0 = InstanceId(0);

    for (id, rssi) in [(30, -50), (31, -70)] {
        let single = vec![peer_entry(0, 5180, ChannelWidth::Mhz80, rssi).assoc()];
        h.mgr.create_peer(DEV, peer_id(id), mac(0x30 + id as u8), single).unwrap();
    }
    assert_eq!(h.mgr.directory().load(soc0).avg_rssi, -60);

    h.mgr.update_peer_rssi(DEV, peer_id(30), HwLinkId(0), -90).unwrap();
    assert_eq!(
        h.mgr.directory().load(soc0),
        InstanceLoad {
            num_peers: 2,
            avg_rssi: -80,
        }
    );

    h.mgr.destroy_peer(DEV, peer_id(30)).unwrap();
    assert_eq!(
        h.mgr.directory().load(soc0),
        InstanceLoad {
            num_peers: 1,
            avg_rssi: -70,
        }
    );
}

#[tokio::test]
async fn test_rssi_balance_follows_updated_rssi() {
    let h = harness();
    ap_device(&h, 2);

    // One anchored peer per instance: -40 dBm on instance 0, -80 dBm on instance 1.
    h.mgr
        .create_peer(DEV, peer_id(40), mac(0x80), vec![peer_entry(0, 5180, ChannelWidth::Mhz80, -40).assoc()])
        .unwrap();
    h.mgr
        .create_peer(DEV, peer_id(41), mac(0x81), vec![peer_entry(1, 5745, ChannelWidth::Mhz80, -80).assoc()])
        .unwrap();

    let newcomer = || {
        vec![
            peer_entry(0, 5180, ChannelWidth::Mhz80, -75).assoc(),
            peer_entry(1, 5745, ChannelWidth::Mhz80, -75),
        ]
    };

    let peer = h.mgr.create_peer(DEV, peer_id(42), mac(0x82), newcomer()).unwrap();
    assert_eq!(peer.primary().unwrap().instance, InstanceId(1));
    h.mgr.destroy_peer(DEV, peer_id(42)).unwrap();

    h.mgr.update_peer_rssi(DEV, peer_id(40), HwLinkId(0), -80).unwrap();
    h.mgr.update_peer_rssi(DEV, peer_id(41), HwLinkId(1), -40).unwrap();
    assert_eq!(h.mgr.directory().load(InstanceId(0)).avg_rssi, -80);
    assert_eq!(h.mgr.directory().load(InstanceId(1)).avg_rssi, -40);

    let peer = h.mgr.create_peer(DEV, peer_id(43), mac(0x83), newcomer()).unwrap();
    assert_eq!(peer.primary().unwrap().instance, InstanceId(0));
}

#[tokio::test]
async fn test_secondary_rssi_update_leaves_load_alone() {
    let h = harness();
    ap_device(&h, 2);
    let single = vec![peer_entry(0, 5180, ChannelWidth::Mhz80, -55).assoc()];
    h.mgr.create_peer(DEV, peer_id(50), mac(0x90), single).unwrap();
    h.mgr
        .add_link_peer(DEV, peer_id(50), peer_entry(1, 5745, ChannelWidth::Mhz80, -60))
        .unwrap();

    h.mgr.update_peer_rssi(DEV, peer_id(50), HwLinkId(1), -30).unwrap();
    assert_eq!(h.mgr.directory().load(InstanceId(0)).avg_rssi, -55);
    assert_eq!(h.mgr.directory().load(InstanceId(1)), InstanceLoad::default());
    assert!(h.mgr.update_peer_rssi(DEV, peer_id(50), HwLinkId(7), -30).is_err());
}
