//! Common plumbing for the MLO link manager.
//!
//! This crate provides the pieces the link-switch and migration code share
//! but that do not depend on MLO semantics themselves:
//!
//! - [`SerializationGateway`]: one active command per device, FIFO pending
//!   queue, cancellation by composite key
//! - [`ActiveCommand`]: RAII guard for the executing command; dropping it
//!   activates the next pending command
//! - [`HandleMap`]: registry handing out reference-counted handles that
//!   never auto-creates entries

mod handle_map;
mod serializer;

pub use handle_map::{HandleMap, HandleMapError};
pub use serializer::{
    ActiveCommand, Command, CommandKey, CommandType, SerializationError, SerializationGateway,
};
