//! ML peer context.

use mlo_types::{DeviceId, HwLinkId, MacAddress, PeerId, MAX_MLO_LINKS};
use parking_lot::Mutex;
use std::fmt;

use super::types::{LinkPeerEntry, PeerError};
use crate::peer_migration::PeerMigrationContext;

/// Result of removing one link entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedLink {
    pub entry: LinkPeerEntry,
    /// Set when the removed entry was primary and the role moved.
    pub new_primary: Option<LinkPeerEntry>,
}

struct PeerInner {
    entries: Vec<LinkPeerEntry>,
    migration: PeerMigrationContext,
}

/// One associated ML peer across all of its links.
///
/// Exactly one entry carries `is_primary` whenever the entry list is not
/// empty. Every method keeps that true before releasing the lock.
pub struct MloPeer {
    id: PeerId,
    mld_addr: MacAddress,
    device_id: DeviceId,
    inner: Mutex<PeerInner>,
}

impl fmt::Debug for MloPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MloPeer")
            .field("id", &self.id)
            .field("mld_addr", &self.mld_addr)
            .field("device_id", &self.device_id)
            .field("links", &inner.entries.len())
            .field("migration", &inner.migration)
            .finish()
    }
}

impl MloPeer {
    /// Creates a peer whose primary role sits on `primary`.
    pub fn new(
        id: PeerId,
        mld_addr: MacAddress,
        device_id: DeviceId,
        mut entries: Vec<LinkPeerEntry>,
        primary: HwLinkId,
    ) -> Result<Self, PeerError> {
        if entries.is_empty() {
            return Err(PeerError::NoLinks);
        }
        if entries.len() > MAX_MLO_LINKS {
            return Err(PeerError::TooManyLinks);
        }
        if !entries.iter().any(|e| e.is_assoc) {
            return Err(PeerError::NoAssocLink);
        }
        for (i, e) in entries.iter().enumerate() {
            if entries[..i].iter().any(|o| o.instance == e.instance) {
                return Err(PeerError::DuplicateInstance(e.instance));
            }
        }
        if !entries.iter().any(|e| e.hw_link_id == primary) {
            return Err(PeerError::UnknownLink(primary));
        }

        for e in entries.iter_mut() {
            e.is_primary = e.hw_link_id == primary;
        }

        Ok(Self {
            id,
            mld_addr,
            device_id,
            inner: Mutex::new(PeerInner {
                entries,
                migration: PeerMigrationContext::new(),
            }),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn mld_addr(&self) -> MacAddress {
        self.mld_addr
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Snapshot of the link entries.
    pub fn entries(&self) -> Vec<LinkPeerEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn link_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn primary(&self) -> Option<LinkPeerEntry> {
        self.inner.lock().entries.iter().find(|e| e.is_primary).cloned()
    }

    pub fn assoc(&self) -> Option<LinkPeerEntry> {
        self.inner.lock().entries.iter().find(|e| e.is_assoc).cloned()
    }

    pub fn entry(&self, hw_link_id: HwLinkId) -> Option<LinkPeerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.hw_link_id == hw_link_id)
            .cloned()
    }

    pub fn has_link(&self, hw_link_id: HwLinkId) -> bool {
        self.entry(hw_link_id).is_some()
    }

    pub fn is_primary_on(&self, hw_link_id: HwLinkId) -> bool {
        self.inner
            .lock()
            .entries
            .iter()
            .any(|e| e.is_primary && e.hw_link_id == hw_link_id)
    }

    /// Moves the primary role to `hw_link_id` and returns the previous holder.
    pub fn set_primary(&self, hw_link_id: HwLinkId) -> Result<LinkPeerEntry, PeerError> {
        let mut inner = self.inner.lock();
        if !inner.entries.iter().any(|e| e.hw_link_id == hw_link_id) {
            return Err(PeerError::UnknownLink(hw_link_id));
        }
        let old = inner
            .entries
            .iter()
            .find(|e| e.is_primary)
            .cloned()
            .ok_or(PeerError::NoLinks)?;
        for e in inner.entries.iter_mut() {
            e.is_primary = e.hw_link_id == hw_link_id;
        }
        Ok(old)
    }

    /// Adds a link entry. The first entry of an empty peer becomes primary.
    pub fn add_link_entry(&self, mut entry: LinkPeerEntry) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= MAX_MLO_LINKS {
            return Err(PeerError::TooManyLinks);
        }
        if inner.entries.iter().any(|e| e.instance == entry.instance) {
            return Err(PeerError::DuplicateInstance(entry.instance));
        }
        entry.is_primary = inner.entries.is_empty();
        inner.entries.push(entry);
        Ok(())
    }

    /// Removes a link entry.
    ///
    /// When the primary entry goes away, `reselect` picks the new primary
    /// among the remaining entries; an answer naming no remaining entry
    /// falls back to the first one.
    pub fn remove_link_entry<F>(&self, hw_link_id: HwLinkId, reselect: F) -> Result<RemovedLink, PeerError>
    where
        F: FnOnce(&[LinkPeerEntry]) -> Option<HwLinkId>,
    {
        let mut inner = self.inner.lock();
        let pos = inner
            .entries
            .iter()
            .position(|e| e.hw_link_id == hw_link_id)
            .ok_or(PeerError::UnknownLink(hw_link_id))?;
        let entry = inner.entries.remove(pos);

        if !entry.is_primary || inner.entries.is_empty() {
            return Ok(RemovedLink {
                entry,
                new_primary: None,
            });
        }

        let chosen = reselect(&inner.entries)
            .filter(|hw| inner.entries.iter().any(|e| e.hw_link_id == *hw))
            .unwrap_or(inner.entries[0].hw_link_id);
        for e in inner.entries.iter_mut() {
            e.is_primary = e.hw_link_id == chosen;
        }
        let new_primary = inner.entries.iter().find(|e| e.is_primary).cloned();

        Ok(RemovedLink { entry, new_primary })
    }

    /// Stores a new RSSI for one link and returns the entry as it was.
    pub fn update_rssi(&self, hw_link_id: HwLinkId, rssi: i8) -> Result<LinkPeerEntry, PeerError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.hw_link_id == hw_link_id)
            .ok_or(PeerError::UnknownLink(hw_link_id))?;
        let previous = entry.clone();
        entry.rssi = rssi;
        Ok(previous)
    }

    /// Runs `f` on the migration request context under the peer lock.
    ///
    /// `f` must not call back into this peer.
    pub fn with_migration<R>(&self, f: impl FnOnce(&mut PeerMigrationContext) -> R) -> R {
        f(&mut self.inner.lock().migration)
    }
}
