//! MLO link manager.
//!
//! Runs the link-switch state machine, primary-anchor (PTQM) selection and
//! peer/link migration for multi-link (802.11be) devices. Hardware is only
//! reached through the collaborator traits in [`gateway`].
//!
//! # Architecture
//!
//! ```text
//! host / firmware events
//!          │
//!          ↓
//!    [MloManager] ──> [LinkSwitchOrch] ──┐
//!          │                             ├──> [SerializationGateway]
//!          ├───────> [LinkMigrationOrch] ┘
//!          │                │
//!          ↓                ↓
//!    [SelectionEngine] <── [PeerMigrationOrch] ──> FirmwareGateway
//! ```
//!
//! # Key Components
//!
//! - [`manager::MloManager`]: device registry and request routing
//! - [`link_switch`]: per-device link-switch state machine and observers
//! - [`selection`]: initial primary selection and migration targets
//! - [`peer_migration`]: per-peer request reduction and execution
//! - [`link_migration`]: bulk migration away from one hardware link
//! - [`config`]: TOML configuration
//! - [`audit`]: structured logging and audit records

pub mod audit;
pub mod config;
pub mod device;
pub mod gateway;
pub mod link_info;
pub mod link_migration;
pub mod link_switch;
pub mod manager;
pub mod peer;
pub mod peer_migration;
pub mod selection;

pub use config::MloConfig;
pub use device::{ConnectionState, DeviceRole, MldDevice, VdevInfo};
pub use manager::{
    ManagerError, MigrationCallbacks, MigrationTarget, MloCollaborators, MloManager,
};
