//! Outbound collaborator interfaces.
//!
//! The manager never talks to hardware directly. Connection management,
//! firmware messaging, CSA bookkeeping and host diagnostics are reached
//! through the traits below; the host process supplies implementations.

use async_trait::async_trait;
use mlo_common::CommandKey;
use mlo_types::{Channel, DeviceId, HwLinkId, LinkId, MacAddress, PeerId, VdevId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::error_log;
use crate::link_switch::LinkSwitchReason;

/// Collaborator call failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Firmware answered with a failure status.
    #[error("Rejected by firmware: {0}")]
    Rejected(String),
    /// No answer within the allowed time.
    #[error("No response within {0:?}")]
    Timeout(Duration),
    /// The connection manager refused or failed the request.
    #[error("Connection manager error: {0}")]
    ConnectionManager(String),
    /// Message could not be delivered.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Who asked for a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectSource {
    /// Disconnect of the current link as a link-switch step.
    LinkSwitch,
    /// Full MLD disconnect after a failed link switch.
    LinkSwitchRollback,
    /// Host or user request.
    Host,
    /// Firmware indication.
    Firmware,
}

impl fmt::Display for DisconnectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectSource::LinkSwitch => write!(f, "link_switch"),
            DisconnectSource::LinkSwitchRollback => write!(f, "link_switch_rollback"),
            DisconnectSource::Host => write!(f, "host"),
            DisconnectSource::Firmware => write!(f, "firmware"),
        }
    }
}

/// Reason attached to a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Link is being replaced by another link of the same MLD.
    LinkSwitch,
    /// Link switch failed after the current link was torn down.
    LinkSwitchFailure,
    /// Requested by the user.
    UserRequested,
    Unspecified,
}

/// Parameters for bringing up a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub vdev_id: VdevId,
    pub link_id: LinkId,
    /// AP link address of the target link.
    pub bssid: MacAddress,
    pub channel: Channel,
    /// Local link address the vdev now uses.
    pub self_link_addr: MacAddress,
    pub mld_addr: MacAddress,
}

/// Link-level connection control.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Disconnects the link served by `vdev` from `bssid`.
    ///
    /// With [`DisconnectSource::LinkSwitchRollback`] or
    /// [`DisconnectSource::Host`] the whole MLD association is torn down
    /// and `bssid` is the AP MLD address.
    async fn disconnect(
        &self,
        vdev: VdevId,
        source: DisconnectSource,
        reason: DisconnectReason,
        bssid: MacAddress,
    ) -> Result<(), GatewayError>;

    /// Starts association on a new link and resolves when it completes.
    async fn start_connect(&self, vdev: VdevId, params: ConnectParams) -> Result<(), GatewayError>;
}

/// Final verdict reported to firmware for a link switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmStatus {
    Accept,
    Reject,
}

impl fmt::Display for ConfirmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmStatus::Accept => write!(f, "ACCEPT"),
            ConfirmStatus::Reject => write!(f, "REJECT"),
        }
    }
}

/// One peer in a PTQM migrate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtqmPeerEntry {
    pub peer_id: PeerId,
    pub src_hw_link: HwLinkId,
    pub dst_hw_link: HwLinkId,
}

/// Firmware messaging.
#[async_trait]
pub trait FirmwareGateway: Send + Sync {
    /// Moves the vdev from its current link address to a new one.
    async fn send_set_mac_addr(
        &self,
        old_addr: MacAddress,
        new_addr: MacAddress,
        vdev: VdevId,
    ) -> Result<(), GatewayError>;

    /// Moves the primary anchor of each listed peer.
    async fn send_ptqm_migrate(
        &self,
        vdev: VdevId,
        peers: &[PtqmPeerEntry],
    ) -> Result<(), GatewayError>;

    /// Closes a link-switch attempt.
    async fn send_link_switch_confirm(
        &self,
        device: DeviceId,
        status: ConfirmStatus,
        reason: LinkSwitchReason,
    ) -> Result<(), GatewayError>;
}

/// Channel-switch bookkeeping hook.
pub trait CsaTracker: Send + Sync {
    /// Called after a partner link's channel changed, outside the device lock.
    fn on_link_channel_update(&self, device: DeviceId, link_id: LinkId, channel: &Channel);
}

/// Fatal condition reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalEvent {
    pub device_id: DeviceId,
    pub command: CommandKey,
    pub elapsed: Duration,
    pub detail: String,
}

/// Host-level diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn raise_fatal(&self, event: FatalEvent);
}

/// Diagnostic sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnosticSink;

impl DiagnosticSink for LogDiagnosticSink {
    fn raise_fatal(&self, event: FatalEvent) {
        error_log!(
            "DiagnosticSink",
            device = %event.device_id,
            command = %event.command,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "fatal: {}",
            event.detail
        );
    }
}
