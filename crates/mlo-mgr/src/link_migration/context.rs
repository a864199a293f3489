//! Progress of one bulk link migration.

use bit_vec::BitVec;
use mlo_types::{HwLinkId, InstanceId, PeerId, MAX_MLO_PEER_ID};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::types::LinkMigrationResponse;
use crate::peer_migration::{MigrationStatus, ModuleId};
use crate::selection::InstanceLoad;

#[derive(Debug)]
struct Progress {
    pending: BitVec,
    fail_peer_count: u32,
    finished: bool,
}

/// Tracks which peers of a bulk migration are still outstanding.
#[derive(Debug)]
pub struct LinkMigrationContext {
    pub link: HwLinkId,
    pub module: ModuleId,
    pub force: bool,
    /// Instance load when the request was accepted.
    pub load_snapshot: Vec<(InstanceId, InstanceLoad)>,
    total_peer_count: u32,
    progress: Mutex<Progress>,
    drained: Notify,
}

impl LinkMigrationContext {
    pub fn new(
        link: HwLinkId,
        module: ModuleId,
        force: bool,
        peers: &[PeerId],
        load_snapshot: Vec<(InstanceId, InstanceLoad)>,
    ) -> Self {
        let mut pending = BitVec::from_elem(MAX_MLO_PEER_ID as usize, false);
        for peer in peers {
            pending.set(peer.bit(), true);
        }
        Self {
            link,
            module,
            force,
            load_snapshot,
            total_peer_count: peers.len() as u32,
            progress: Mutex::new(Progress {
                pending,
                fail_peer_count: 0,
                finished: false,
            }),
            drained: Notify::new(),
        }
    }

    pub fn is_pending(&self, peer: PeerId) -> bool {
        self.progress.lock().pending.get(peer.bit()).unwrap_or(false)
    }

    pub fn outstanding(&self) -> usize {
        self.progress.lock().pending.iter().filter(|b| *b).count()
    }

    /// Records one peer's final status. Wakes the waiter once every peer is in.
    pub fn peer_done(&self, peer: PeerId, status: MigrationStatus) {
        let drained = {
            let mut progress = self.progress.lock();
            if progress.finished || !progress.pending.get(peer.bit()).unwrap_or(false) {
                return;
            }
            progress.pending.set(peer.bit(), false);
            if status != MigrationStatus::Success {
                progress.fail_peer_count += 1;
            }
            progress.pending.none()
        };
        if drained {
            self.drained.notify_one();
        }
    }

    /// Resolves once every peer has reported.
    pub async fn wait_drained(&self) {
        if self.progress.lock().pending.none() {
            return;
        }
        self.drained.notified().await;
    }

    /// Closes the context. Peers still outstanding count as failed and
    /// later reports are ignored.
    pub fn finish(&self) -> LinkMigrationResponse {
        let mut progress = self.progress.lock();
        let outstanding = progress.pending.iter().filter(|b| *b).count() as u32;
        progress.pending.clear();
        progress.fail_peer_count += outstanding;
        progress.finished = true;
        LinkMigrationResponse {
            total_peer_count: self.total_peer_count,
            fail_peer_count: progress.fail_peer_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn peers(ids: &[u16]) -> Vec<PeerId> {
        ids.iter().map(|id| PeerId::new(*id).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_drains_after_every_peer() {
        let ids = peers(&[1, 7, 300]);
        let ctx = LinkMigrationContext::new(HwLinkId(2), ModuleId::LinkDisable, false, &ids, Vec::new());
        assert_eq!(ctx.outstanding(), 3);

        ctx.peer_done(ids[0], MigrationStatus::Success);
        ctx.peer_done(ids[1], MigrationStatus::Failure);
        assert!(ctx.is_pending(ids[2]));
        ctx.peer_done(ids[2], MigrationStatus::Deleted);

        ctx.wait_drained().await;
        assert_eq!(
            ctx.finish(),
            LinkMigrationResponse {
                total_peer_count: 3,
                fail_peer_count: 2,
            }
        );
    }

    #[test]
    fn test_duplicate_report_ignored() {
        let ids = peers(&[4, 5]);
        let ctx = LinkMigrationContext::new(HwLinkId(0), ModuleId::Host, true, &ids, Vec::new());
        ctx.peer_done(ids[0], MigrationStatus::Failure);
        ctx.peer_done(ids[0], MigrationStatus::Failure);
        assert_eq!(ctx.outstanding(), 1);
    }

    #[test]
    fn test_finish_counts_stragglers() {
        let ids = peers(&[4, 5, 6]);
        let ctx = LinkMigrationContext::new(HwLinkId(0), ModuleId::Host, false, &ids, Vec::new());
        ctx.peer_done(ids[0], MigrationStatus::Success);
        let response = ctx.finish();
        assert_eq!(response.fail_peer_count, 2);

        ctx.peer_done(ids[1], MigrationStatus::Success);
        assert_eq!(ctx.outstanding(), 0);
    }
}
