//! Link-switch state machine.
//!
//! Moves an MLD's association from its current link to a partner link
//! without tearing down the MLD. One switch per device at a time; the
//! switch itself runs as a serialized command.

mod observer;
mod orch;
mod types;

pub use observer::{LinkSwitchObserver, ObserverRegistry, SubsystemId};
pub use orch::{DisconnectOutcome, LinkSwitchCallbacks, LinkSwitchOrch, LinkSwitchTicket};
pub use types::{
    Initiator, LinkSwitchError, LinkSwitchReason, LinkSwitchRequest, LinkSwitchState,
    LinkSwitchStats, LinkSwitchStatus, NotifyReason, StateTransitionError,
};
