//! Fixed-size link info table of one MLD.

use mlo_types::{Channel, InstanceId, LinkId, MacAddress, MAX_MLO_LINKS};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::LinkInfo;

/// Link table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkTableError {
    #[error("Link {0} not found")]
    NotFound(LinkId),
    #[error("No link with AP address {0}")]
    AddrNotFound(MacAddress),
    #[error("Link {0} already present")]
    Duplicate(LinkId),
    #[error("Link table full")]
    Full,
    #[error("Invalid link id")]
    InvalidLinkId,
    #[error("Link {existing} is already active on {instance}")]
    ActiveConflict { instance: InstanceId, existing: LinkId },
}

pub type Result<T> = std::result::Result<T, LinkTableError>;

/// Partner links of an MLD, indexed by slot.
///
/// Callers hold the owning device's lock for every mutation.
#[derive(Debug, Clone)]
pub struct LinkInfoTable {
    links: [LinkInfo; MAX_MLO_LINKS],
}

impl LinkInfoTable {
    pub fn new() -> Self {
        Self {
            links: std::array::from_fn(|_| LinkInfo::empty()),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.partner_links().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_link_by_id(&self, link_id: LinkId) -> Option<&LinkInfo> {
        if !link_id.is_valid() {
            return None;
        }
        self.links.iter().find(|l| l.link_id == link_id)
    }

    pub fn get_link_by_ap_addr(&self, ap_addr: &MacAddress) -> Option<&LinkInfo> {
        self.partner_links().find(|l| &l.ap_addr == ap_addr)
    }

    fn slot_mut(&mut self, link_id: LinkId) -> Result<&mut LinkInfo> {
        if !link_id.is_valid() {
            warn!(%link_id, "invalid link id");
            return Err(LinkTableError::InvalidLinkId);
        }
        match self.links.iter_mut().find(|l| l.link_id == link_id) {
            Some(slot) => Ok(slot),
            None => {
                warn!(%link_id, "link not in table");
                Err(LinkTableError::NotFound(link_id))
            }
        }
    }

    /// Stores a new partner link in the first empty slot.
    pub fn add_partner_link(&mut self, info: LinkInfo) -> Result<()> {
        if !info.link_id.is_valid() {
            return Err(LinkTableError::InvalidLinkId);
        }
        if self.get_link_by_id(info.link_id).is_some() {
            return Err(LinkTableError::Duplicate(info.link_id));
        }
        let slot = self
            .links
            .iter_mut()
            .find(|l| l.is_empty())
            .ok_or(LinkTableError::Full)?;
        debug!(link_id = %info.link_id, instance = %info.instance, "partner link added");
        *slot = info;
        Ok(())
    }

    /// Refreshes the AP address and channel of a link.
    ///
    /// Returns true if the channel changed.
    pub fn update_ap_link(
        &mut self,
        link_id: LinkId,
        ap_addr: MacAddress,
        channel: Channel,
    ) -> Result<bool> {
        let slot = self.slot_mut(link_id)?;
        slot.ap_addr = ap_addr;
        let changed = slot.channel.as_ref() != Some(&channel);
        slot.channel = Some(channel);
        Ok(changed)
    }

    /// Empties the slot holding `ap_addr` and returns the freed link id.
    pub fn clear_link(&mut self, ap_addr: &MacAddress) -> Result<LinkId> {
        match self
            .links
            .iter_mut()
            .find(|l| !l.is_empty() && &l.ap_addr == ap_addr)
        {
            Some(slot) => {
                let link_id = slot.link_id;
                *slot = LinkInfo::empty();
                Ok(link_id)
            }
            None => {
                warn!(%ap_addr, "clear of unknown AP link");
                Err(LinkTableError::AddrNotFound(*ap_addr))
            }
        }
    }

    pub fn reset_all(&mut self) {
        for slot in self.links.iter_mut() {
            *slot = LinkInfo::empty();
        }
    }

    /// Marks a link active or inactive.
    ///
    /// An instance carries at most one active link.
    pub fn set_link_active(&mut self, link_id: LinkId, active: bool) -> Result<()> {
        if active {
            let instance = self.slot_mut(link_id)?.instance;
            if let Some(existing) = self
                .active_links()
                .find(|l| l.instance == instance && l.link_id != link_id)
            {
                return Err(LinkTableError::ActiveConflict {
                    instance,
                    existing: existing.link_id,
                });
            }
        }
        self.slot_mut(link_id)?.is_active = active;
        Ok(())
    }

    pub fn record_rejection(&mut self, link_id: LinkId, status_code: u16) -> Result<()> {
        self.slot_mut(link_id)?.status_code = status_code;
        Ok(())
    }

    pub fn active_links(&self) -> impl Iterator<Item = &LinkInfo> {
        self.partner_links().filter(|l| l.is_active)
    }

    pub fn partner_links(&self) -> impl Iterator<Item = &LinkInfo> {
        self.links.iter().filter(|l| !l.is_empty())
    }
}

impl Default for LinkInfoTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlo_types::{ChannelWidth, HwLinkId};
    use pretty_assertions::assert_eq;

    fn link(id: u8, instance: u8, freq: u32) -> LinkInfo {
        LinkInfo::new(
            LinkId::new(id).unwrap(),
            InstanceId(instance),
            HwLinkId(id as u16),
            MacAddress::new([0x02, 0, 0, 0, 0, id]),
            MacAddress::new([0x02, 0xaa, 0, 0, 0, id]),
            Channel::new(freq, ChannelWidth::Mhz80, 20),
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let mut table = LinkInfoTable::new();
        table.add_partner_link(link(0, 0, 2437)).unwrap();
        table.add_partner_link(link(1, 1, 5180)).unwrap();

        assert_eq!(table.len(), 2);
        let l1 = table.get_link_by_id(LinkId::new(1).unwrap()).unwrap();
        assert_eq!(l1.freq_mhz(), Some(5180));
        assert!(table.get_link_by_id(LinkId::INVALID).is_none());
        assert!(table
            .get_link_by_ap_addr(&MacAddress::new([0x02, 0xaa, 0, 0, 0, 0]))
            .is_some());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut table = LinkInfoTable::new();
        table.add_partner_link(link(0, 0, 2437)).unwrap();
        assert_eq!(
            table.add_partner_link(link(0, 1, 5180)),
            Err(LinkTableError::Duplicate(LinkId::new(0).unwrap()))
        );

        for id in 1..MAX_MLO_LINKS as u8 {
            table.add_partner_link(link(id, 0, 5180)).unwrap();
        }
        assert_eq!(table.len(), MAX_MLO_LINKS);
        assert_eq!(
            table.add_partner_link(link(15, 1, 5955)),
            Err(LinkTableError::Duplicate(LinkId::new(15).unwrap()))
        );
    }

    #[test]
    fn test_update_reports_channel_change() {
        let mut table = LinkInfoTable::new();
        table.add_partner_link(link(2, 2, 5955)).unwrap();
        let id = LinkId::new(2).unwrap();
        let ap = MacAddress::new([0x02, 0xaa, 0, 0, 0, 2]);

        let same = Channel::new(5955, ChannelWidth::Mhz80, 20);
        assert!(!table.update_ap_link(id, ap, same).unwrap());

        let moved = Channel::new(6035, ChannelWidth::Mhz160, 23);
        assert!(table.update_ap_link(id, ap, moved).unwrap());
        assert_eq!(table.get_link_by_id(id).unwrap().freq_mhz(), Some(6035));
    }

    #[test]
    fn test_unknown_link_is_not_found() {
        let mut table = LinkInfoTable::new();
        let id = LinkId::new(4).unwrap();
        let ch = Channel::new(5180, ChannelWidth::Mhz20, 20);
        assert_eq!(
            table.update_ap_link(id, MacAddress::ZERO, ch),
            Err(LinkTableError::NotFound(id))
        );
        assert_eq!(
            table.record_rejection(id, 17),
            Err(LinkTableError::NotFound(id))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_clear_and_reset() {
        let mut table = LinkInfoTable::new();
        table.add_partner_link(link(0, 0, 2437)).unwrap();
        table.add_partner_link(link(1, 1, 5180)).unwrap();

        let cleared = table
            .clear_link(&MacAddress::new([0x02, 0xaa, 0, 0, 0, 1]))
            .unwrap();
        assert_eq!(cleared, LinkId::new(1).unwrap());
        assert_eq!(table.len(), 1);
        assert!(table.clear_link(&MacAddress::ZERO).is_err());

        table.reset_all();
        assert!(table.is_empty());
    }

    #[test]
    fn test_one_active_link_per_instance() {
        let mut table = LinkInfoTable::new();
        table.add_partner_link(link(0, 0, 2437)).unwrap();
        table.add_partner_link(link(1, 0, 5180)).unwrap();
        table.add_partner_link(link(2, 1, 5955)).unwrap();

        let l0 = LinkId::new(0).unwrap();
        let l1 = LinkId::new(1).unwrap();
        table.set_link_active(l0, true).unwrap();
        table.set_link_active(LinkId::new(2).unwrap(), true).unwrap();
        assert_eq!(
            table.set_link_active(l1, true),
            Err(LinkTableError::ActiveConflict {
                instance: InstanceId(0),
                existing: l0
            })
        );

        table.set_link_active(l0, false).unwrap();
        table.set_link_active(l1, true).unwrap();
        assert_eq!(table.active_links().count(), 2);
    }
}
