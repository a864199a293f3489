//! Link-switch state machine types.

use chrono::{DateTime, Utc};
use mlo_common::SerializationError;
use mlo_types::{DeviceId, InstanceId, LinkId, PhyMode, VdevId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::observer::SubsystemId;
use crate::gateway::GatewayError;
use crate::link_info::LinkTableError;

/// Link-switch states.
///
/// Forward path: `Idle → Init → DisconnectCurrLink → SetMacAddr →
/// ConnectNewLink → CompleteSuccess → Idle`. `AbortTrans` is reachable
/// from every other state and is left only through
/// [`LinkSwitchRequest::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkSwitchState {
    #[default]
    Idle,
    Init,
    DisconnectCurrLink,
    SetMacAddr,
    ConnectNewLink,
    CompleteSuccess,
    AbortTrans,
}

impl LinkSwitchState {
    pub fn can_transition_to(self, to: LinkSwitchState) -> bool {
        use LinkSwitchState::*;
        match (self, to) {
            (AbortTrans, _) => false,
            (_, AbortTrans) => true,
            (Idle, Init)
            | (Init, DisconnectCurrLink)
            | (DisconnectCurrLink, SetMacAddr)
            | (SetMacAddr, ConnectNewLink)
            | (ConnectNewLink, CompleteSuccess)
            | (CompleteSuccess, Idle) => true,
            _ => false,
        }
    }

    /// The current link has been torn down in this state.
    pub fn is_past_disconnect(self) -> bool {
        matches!(
            self,
            LinkSwitchState::SetMacAddr
                | LinkSwitchState::ConnectNewLink
                | LinkSwitchState::CompleteSuccess
        )
    }
}

impl fmt::Display for LinkSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkSwitchState::Idle => "IDLE",
            LinkSwitchState::Init => "INIT",
            LinkSwitchState::DisconnectCurrLink => "DISCONNECT_CURR_LINK",
            LinkSwitchState::SetMacAddr => "SET_MAC_ADDR",
            LinkSwitchState::ConnectNewLink => "CONNECT_NEW_LINK",
            LinkSwitchState::CompleteSuccess => "COMPLETE_SUCCESS",
            LinkSwitchState::AbortTrans => "ABORT_TRANS",
        };
        write!(f, "{}", s)
    }
}

/// Illegal state machine edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal link-switch transition {from} -> {to}")]
pub struct StateTransitionError {
    pub from: LinkSwitchState,
    pub to: LinkSwitchState,
}

/// Why a link switch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSwitchReason {
    /// Target link offers better signal.
    RssiChange,
    /// Current link is being removed by the AP.
    LinkRemoval,
    /// Current link is being disabled (e.g. TTLM).
    LinkDisable,
    /// Host or user forced the switch.
    HostForced,
    Unspecified,
}

impl fmt::Display for LinkSwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkSwitchReason::RssiChange => "rssi_change",
            LinkSwitchReason::LinkRemoval => "link_removal",
            LinkSwitchReason::LinkDisable => "link_disable",
            LinkSwitchReason::HostForced => "host_forced",
            LinkSwitchReason::Unspecified => "unspecified",
        };
        write!(f, "{}", s)
    }
}

/// Origin of a link-switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initiator {
    Host,
    Firmware,
}

/// The device's single in-flight link switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSwitchRequest {
    pub device_id: DeviceId,
    pub vdev_id: VdevId,
    pub curr_link_id: LinkId,
    pub new_link_id: LinkId,
    pub new_freq_mhz: u32,
    pub phymode: PhyMode,
    pub reason: LinkSwitchReason,
    pub initiator: Initiator,
    pub started_at: DateTime<Utc>,
    state: LinkSwitchState,
    confirm_sent: bool,
}

impl LinkSwitchRequest {
    pub fn new(
        device_id: DeviceId,
        vdev_id: VdevId,
        curr_link_id: LinkId,
        new_link_id: LinkId,
        new_freq_mhz: u32,
        phymode: PhyMode,
        reason: LinkSwitchReason,
        initiator: Initiator,
    ) -> Self {
        Self {
            device_id,
            vdev_id,
            curr_link_id,
            new_link_id,
            new_freq_mhz,
            phymode,
            reason,
            initiator,
            started_at: Utc::now(),
            state: LinkSwitchState::Idle,
            confirm_sent: false,
        }
    }

    pub fn state(&self) -> LinkSwitchState {
        self.state
    }

    pub fn transition(&mut self, to: LinkSwitchState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(to) {
            warn!(
                device = %self.device_id,
                from = %self.state,
                to = %to,
                "illegal link-switch transition"
            );
            return Err(StateTransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Returns to `Idle` from any state.
    pub fn reset(&mut self) {
        self.state = LinkSwitchState::Idle;
    }

    pub fn confirm_sent(&self) -> bool {
        self.confirm_sent
    }

    /// Claims the one confirmation of this attempt. False if already claimed.
    pub(crate) fn claim_confirm(&mut self) -> bool {
        !std::mem::replace(&mut self.confirm_sent, true)
    }
}

/// Phase at which observers are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyReason {
    /// Before the request is queued; a veto drops it.
    PreStartPreSerialize,
    /// Request became active; a veto aborts with a reject confirmation.
    PreStartPostSerialize,
    StopSuccess,
    StopFailure,
}

impl fmt::Display for NotifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyReason::PreStartPreSerialize => "pre-start-pre-serialize",
            NotifyReason::PreStartPostSerialize => "pre-start-post-serialize",
            NotifyReason::StopSuccess => "stop-success",
            NotifyReason::StopFailure => "stop-failure",
        };
        write!(f, "{}", s)
    }
}

/// Observer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSwitchStatus {
    Success,
    Failure,
}

/// Link-switch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkSwitchError {
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("Vdev {0} not found")]
    VdevNotFound(VdevId),
    #[error("Invalid link id")]
    InvalidLinkId,
    #[error("Link {0} is not a partner link")]
    TargetNotPartner(LinkId),
    #[error("Link {0} left the link table")]
    UnknownLink(LinkId),
    #[error("Link {link} is already active on {vdev}")]
    TargetActive { link: LinkId, vdev: VdevId },
    #[error("Link {active} is already active on {instance}")]
    InstanceBusy { instance: InstanceId, active: LinkId },
    #[error("Target link equals current link {0}")]
    SameLink(LinkId),
    #[error("Device is not connected")]
    NotConnected,
    #[error("Link switch already in progress")]
    InProgress,
    #[error("Current link {requested} does not match live link {actual}")]
    CurrentLinkMismatch { requested: LinkId, actual: LinkId },
    #[error("Frequency {requested} MHz does not match known channel {known} MHz")]
    FrequencyMismatch { requested: u32, known: u32 },
    #[error("Vetoed by {0}")]
    Vetoed(SubsystemId),
    #[error("Observer {0} already registered")]
    ObserverExists(SubsystemId),
    #[error("Observer limit {0} reached")]
    ObserverLimit(usize),
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
    #[error("{state} failed: {error}")]
    Step {
        state: LinkSwitchState,
        error: GatewayError,
    },
    #[error("Link table rejected the switch: {0}")]
    LinkTable(#[from] LinkTableError),
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transition(#[from] StateTransitionError),
    #[error("Link switch task aborted")]
    Aborted,
}

/// Link-switch statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSwitchStats {
    pub requests: u64,
    /// Refused by validation before `Init`.
    pub rejected: u64,
    pub vetoed: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub confirms_sent: u64,
    pub deferred_disconnects: u64,
}
