//! Link info entry types.

use mlo_types::{Channel, HwLinkId, InstanceId, LinkId, MacAddress};

/// One partner link of an MLD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// [`LinkId::INVALID`] marks an empty slot.
    pub link_id: LinkId,
    pub instance: InstanceId,
    pub hw_link_id: HwLinkId,
    /// Local link address used on this link.
    pub local_addr: MacAddress,
    /// AP link address (BSSID).
    pub ap_addr: MacAddress,
    pub channel: Option<Channel>,
    /// Link currently carries the association.
    pub is_active: bool,
    /// Status code of the last association rejection on this link.
    pub status_code: u16,
}

impl LinkInfo {
    pub fn new(
        link_id: LinkId,
        instance: InstanceId,
        hw_link_id: HwLinkId,
        local_addr: MacAddress,
        ap_addr: MacAddress,
        channel: Channel,
    ) -> Self {
        Self {
            link_id,
            instance,
            hw_link_id,
            local_addr,
            ap_addr,
            channel: Some(channel),
            is_active: false,
            status_code: 0,
        }
    }

    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            link_id: LinkId::INVALID,
            instance: InstanceId(0),
            hw_link_id: HwLinkId(0),
            local_addr: MacAddress::ZERO,
            ap_addr: MacAddress::ZERO,
            channel: None,
            is_active: false,
            status_code: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.link_id.is_valid()
    }

    pub fn freq_mhz(&self) -> Option<u32> {
        self.channel.as_ref().map(|c| c.freq_mhz)
    }
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self::empty()
    }
}
