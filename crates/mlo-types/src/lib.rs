//! Common types for multi-link (MLO) device management.
//!
//! This crate provides type-safe representations of the identifiers and
//! radio primitives shared by the link-switch and primary-anchor code:
//!
//! - [`MacAddress`]: 48-bit link or MLD address
//! - [`LinkId`], [`HwLinkId`], [`InstanceId`]: link and hardware identifiers
//! - [`VdevId`], [`DeviceId`], [`PeerId`]: object identifiers
//! - [`Channel`]: operating channel of a link (frequency, width, phymode)

mod channel;
mod ids;
mod mac;

pub use channel::{Band, Channel, ChannelWidth, PhyMode};
pub use ids::{DeviceId, HwLinkId, InstanceId, LinkId, PeerId, VdevId, MAX_MLO_LINKS, MAX_MLO_PEER_ID};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid link id: {0} (must be below {})", MAX_MLO_LINKS)]
    InvalidLinkId(u8),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(u16),

    #[error("invalid channel width: {0}")]
    InvalidChannelWidth(String),

    #[error("invalid phymode: {0}")]
    InvalidPhyMode(String),

    #[error("frequency {0} MHz is outside every supported band")]
    InvalidFrequency(u32),
}
