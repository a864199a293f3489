//! Identifier newtypes for links, hardware instances and MLO objects.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of links an MLD can carry.
pub const MAX_MLO_LINKS: usize = 16;

/// Upper bound (exclusive) for ML peer ids; sizes the pending-peer bitmaps.
pub const MAX_MLO_PEER_ID: u16 = 1024;

/// IEEE 802.11be link identifier advertised in the multi-link element.
///
/// [`LinkId::INVALID`] marks an empty slot in a link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(u8);

impl LinkId {
    /// Marker for "no link".
    pub const INVALID: LinkId = LinkId(0xff);

    /// Creates a link id, rejecting values that cannot index a link table.
    pub const fn new(id: u8) -> Result<Self, ParseError> {
        if (id as usize) < MAX_MLO_LINKS {
            Ok(LinkId(id))
        } else {
            Err(ParseError::InvalidLinkId(id))
        }
    }

    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        (self.0 as usize) < MAX_MLO_LINKS
    }
}

impl Default for LinkId {
    fn default() -> Self {
        LinkId::INVALID
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// Device-wide identifier of a physical radio (one per hardware link).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HwLinkId(pub u16);

impl fmt::Display for HwLinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw{}", self.0)
    }
}

/// Hardware/firmware instance ("SoC" / "UMAC") terminating one or more links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u8);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "soc{}", self.0)
    }
}

/// Virtual device (one per affiliated link of a local MLD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VdevId(pub u8);

impl fmt::Display for VdevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vdev{}", self.0)
    }
}

/// Logical MLD identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mld{}", self.0)
    }
}

/// ML peer identifier, unique per host and below [`MAX_MLO_PEER_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(u16);

impl PeerId {
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id < MAX_MLO_PEER_ID {
            Ok(PeerId(id))
        } else {
            Err(ParseError::InvalidPeerId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Bit index of this peer in a pending-peer bitmap.
    pub const fn bit(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}
