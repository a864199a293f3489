//! Link-peer entry types.

use mlo_types::{Channel, HwLinkId, InstanceId, LinkId, MacAddress, VdevId};
use thiserror::Error;

/// Peer context errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("Peer has no link entries")]
    NoLinks,
    #[error("Peer has no association link")]
    NoAssocLink,
    #[error("Peer already has a link on {0}")]
    DuplicateInstance(InstanceId),
    #[error("Peer has no link on {0}")]
    UnknownLink(HwLinkId),
    #[error("Peer link list is full")]
    TooManyLinks,
}

/// The part of an ML peer living on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPeerEntry {
    pub link_id: LinkId,
    pub hw_link_id: HwLinkId,
    pub instance: InstanceId,
    /// Local vdev serving this link.
    pub vdev_id: VdevId,
    pub link_addr: MacAddress,
    pub channel: Channel,
    /// Last reported RSSI (dBm) on this link.
    pub rssi: i8,
    /// Holds the primary anchor (PTQM) role.
    pub is_primary: bool,
    /// Link the association was made on.
    pub is_assoc: bool,
}

impl LinkPeerEntry {
    pub fn new(
        link_id: LinkId,
        hw_link_id: HwLinkId,
        instance: InstanceId,
        vdev_id: VdevId,
        link_addr: MacAddress,
        channel: Channel,
        rssi: i8,
    ) -> Self {
        Self {
            link_id,
            hw_link_id,
            instance,
            vdev_id,
            link_addr,
            channel,
            rssi,
            is_primary: false,
            is_assoc: false,
        }
    }

    /// Marks this entry as the association link.
    pub fn assoc(mut self) -> Self {
        self.is_assoc = true;
        self
    }
}
