//! LinkSwitchOrch: drives one link switch per device through its states.
//!
//! A request is validated and parked in the device's link-switch slot in
//! `Init`, then a spawned driver waits for the device's serialized command
//! slot and walks `DisconnectCurrLink → SetMacAddr → ConnectNewLink →
//! CompleteSuccess`. Every attempt that reaches the driver ends with exactly
//! one confirmation to firmware.

use mlo_common::{Command, CommandKey, CommandType, SerializationGateway};
use mlo_types::{DeviceId, LinkId, MacAddress, VdevId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::observer::{LinkSwitchObserver, ObserverRegistry, SubsystemId};
use super::types::{
    Initiator, LinkSwitchError, LinkSwitchReason, LinkSwitchRequest, LinkSwitchState,
    LinkSwitchStats, NotifyReason,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::device::{ConnectionState, DeferredDisconnect, MldDevice};
use crate::gateway::{
    ConfirmStatus, ConnectParams, ConnectionManager, DiagnosticSink, DisconnectReason,
    DisconnectSource, FatalEvent, FirmwareGateway, GatewayError,
};

pub type Result<T> = std::result::Result<T, LinkSwitchError>;

/// What happened to a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectOutcome {
    Issued,
    /// Held until the in-flight link switch retires.
    Deferred,
}

/// Handle to a queued link switch.
#[derive(Debug)]
pub struct LinkSwitchTicket {
    key: CommandKey,
    handle: JoinHandle<Result<()>>,
}

impl LinkSwitchTicket {
    pub fn key(&self) -> CommandKey {
        self.key
    }

    /// Waits for the switch to finish.
    pub async fn wait(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(LinkSwitchError::Aborted),
        }
    }
}

/// Dependencies of a [`LinkSwitchOrch`].
pub struct LinkSwitchCallbacks {
    pub connection: Arc<dyn ConnectionManager>,
    pub firmware: Arc<dyn FirmwareGateway>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

/// Link-switch orchestrator.
pub struct LinkSwitchOrch {
    conn: Arc<dyn ConnectionManager>,
    firmware: Arc<dyn FirmwareGateway>,
    diag: Arc<dyn DiagnosticSink>,
    serializer: Arc<SerializationGateway>,
    observers: ObserverRegistry,
    command_timeout: Duration,
    response_timeout: Duration,
    stats: Mutex<LinkSwitchStats>,
}

impl fmt::Debug for LinkSwitchOrch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSwitchOrch")
            .field("observers", &self.observers)
            .field("command_timeout", &self.command_timeout)
            .field("response_timeout", &self.response_timeout)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

fn command_key(request: &LinkSwitchRequest) -> CommandKey {
    CommandKey::link_switch(request.device_id, request.curr_link_id, request.new_link_id)
}

/// Addresses and channel resolved once the command is active.
struct SwitchPlan {
    curr_ap_addr: MacAddress,
    curr_local_addr: MacAddress,
    target_ap_addr: MacAddress,
    target_local_addr: MacAddress,
    target_channel: mlo_types::Channel,
}

impl LinkSwitchOrch {
    pub fn new(
        callbacks: LinkSwitchCallbacks,
        serializer: Arc<SerializationGateway>,
        max_observers: usize,
        command_timeout: Duration,
        response_timeout: Duration,
    ) -> Self {
        Self {
            conn: callbacks.connection,
            firmware: callbacks.firmware,
            diag: callbacks.diagnostics,
            serializer,
            observers: ObserverRegistry::new(max_observers),
            command_timeout,
            response_timeout,
            stats: Mutex::new(LinkSwitchStats::default()),
        }
    }

    pub fn stats(&self) -> LinkSwitchStats {
        self.stats.lock().clone()
    }

    pub fn register_observer(
        &self,
        id: SubsystemId,
        observer: Arc<dyn LinkSwitchObserver>,
    ) -> Result<()> {
        self.observers.register(id, observer)
    }

    pub fn unregister_observer(&self, id: SubsystemId) -> bool {
        self.observers.unregister(id)
    }

    /// Validates a link switch and queues it.
    ///
    /// Fails without touching the device if any entry guard fails or a
    /// pre-serialize observer vetoes. Must be called from within a tokio
    /// runtime.
    pub fn request(
        self: &Arc<Self>,
        device: &Arc<MldDevice>,
        vdev_id: VdevId,
        curr_link_id: LinkId,
        new_link_id: LinkId,
        new_freq_mhz: u32,
        reason: LinkSwitchReason,
        initiator: Initiator,
    ) -> Result<LinkSwitchTicket> {
        self.stats.lock().requests += 1;

        let request = match self.admit(
            device,
            vdev_id,
            curr_link_id,
            new_link_id,
            new_freq_mhz,
            reason,
            initiator,
        ) {
            Ok(request) => request,
            Err(e) => {
                self.stats.lock().rejected += 1;
                audit_log!(AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "request")
                    .with_outcome(AuditOutcome::Denied)
                    .with_object_id(format!("{}/{}", device.id(), vdev_id))
                    .with_object_type("vdev")
                    .with_error(e.to_string()));
                return Err(e);
            }
        };

        if let Err(id) = self
            .observers
            .notify(vdev_id, &request, NotifyReason::PreStartPreSerialize)
        {
            let held = {
                let mut inner = device.lock();
                inner.link_switch = None;
                inner.deferred_disconnect.take()
            };
            self.stats.lock().vetoed += 1;
            audit_log!(AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "request")
                .with_outcome(AuditOutcome::Denied)
                .with_object_id(format!("{}/{}", device.id(), vdev_id))
                .with_object_type("vdev")
                .with_error(format!("vetoed by {}", id)));
            if let Some(disconnect) = held {
                self.spawn_disconnect(device, disconnect);
            }
            return Err(LinkSwitchError::Vetoed(id));
        }

        info!(
            device = %device.id(),
            vdev = %vdev_id,
            curr = %curr_link_id,
            new = %new_link_id,
            %reason,
            "link switch queued"
        );

        let key = command_key(&request);
        let orch = Arc::clone(self);
        let device = Arc::clone(device);
        let handle = tokio::spawn(async move { orch.drive(device, request).await });
        Ok(LinkSwitchTicket { key, handle })
    }

    /// Runs the entry guards and parks the request in `Init`.
    fn admit(
        &self,
        device: &MldDevice,
        vdev_id: VdevId,
        curr_link_id: LinkId,
        new_link_id: LinkId,
        new_freq_mhz: u32,
        reason: LinkSwitchReason,
        initiator: Initiator,
    ) -> Result<LinkSwitchRequest> {
        if !curr_link_id.is_valid() || !new_link_id.is_valid() {
            return Err(LinkSwitchError::InvalidLinkId);
        }

        let mut inner = device.lock();
        let vdev = inner
            .vdevs
            .iter()
            .find(|v| v.vdev_id == vdev_id)
            .ok_or(LinkSwitchError::VdevNotFound(vdev_id))?;
        if inner.conn_state != ConnectionState::Connected {
            return Err(LinkSwitchError::NotConnected);
        }
        if inner.link_switch.is_some() {
            return Err(LinkSwitchError::InProgress);
        }
        if vdev.link_id != curr_link_id {
            return Err(LinkSwitchError::CurrentLinkMismatch {
                requested: curr_link_id,
                actual: vdev.link_id,
            });
        }
        if new_link_id == curr_link_id {
            return Err(LinkSwitchError::SameLink(new_link_id));
        }
        let target = inner
            .link_table
            .get_link_by_id(new_link_id)
            .ok_or(LinkSwitchError::TargetNotPartner(new_link_id))?;
        if inner.link_table.get_link_by_id(curr_link_id).is_none() {
            return Err(LinkSwitchError::UnknownLink(curr_link_id));
        }
        if let Some(other) = inner
            .vdevs
            .iter()
            .find(|v| v.vdev_id != vdev_id && v.link_id == new_link_id)
        {
            return Err(LinkSwitchError::TargetActive {
                link: new_link_id,
                vdev: other.vdev_id,
            });
        }
        if let Some(active) = inner
            .link_table
            .active_links()
            .find(|l| l.instance == target.instance && l.link_id != curr_link_id)
        {
            return Err(LinkSwitchError::InstanceBusy {
                instance: target.instance,
                active: active.link_id,
            });
        }
        let channel = match target.channel {
            Some(channel) if channel.freq_mhz == new_freq_mhz => channel,
            _ => {
                return Err(LinkSwitchError::FrequencyMismatch {
                    requested: new_freq_mhz,
                    known: target.freq_mhz().unwrap_or(0),
                })
            }
        };

        let mut request = LinkSwitchRequest::new(
            device.id(),
            vdev_id,
            curr_link_id,
            new_link_id,
            new_freq_mhz,
            channel.phymode,
            reason,
            initiator,
        );
        request.transition(LinkSwitchState::Init)?;
        inner.link_switch = Some(request.clone());
        Ok(request)
    }

    async fn drive(self: Arc<Self>, device: Arc<MldDevice>, request: LinkSwitchRequest) -> Result<()> {
        let key = command_key(&request);
        let cmd = Command::new(CommandType::LinkSwitch, key, self.command_timeout);

        let result = match self.serializer.acquire(cmd).await {
            Ok(active) => {
                let budget = active.timeout();
                let result = match timeout(budget, self.run_steps(&device, &request)).await {
                    Ok(result) => result.and_then(|()| self.commit(&device, &request)),
                    Err(_) => {
                        self.stats.lock().timeouts += 1;
                        self.diag.raise_fatal(FatalEvent {
                            device_id: device.id(),
                            command: *active.key(),
                            elapsed: budget,
                            detail: format!("link switch stuck in {}", device.link_switch_state()),
                        });
                        Err(LinkSwitchError::Timeout(budget))
                    }
                };
                match &result {
                    Ok(()) => self.finish_success(&device, &request).await,
                    Err(e) => self.finish_failure(&device, &request, e).await,
                }
                drop(active);
                result
            }
            Err(e) => {
                let e = LinkSwitchError::from(e);
                self.finish_failure(&device, &request, &e).await;
                Err(e)
            }
        };

        self.flush_deferred_disconnect(&device).await;
        result
    }

    async fn run_steps(&self, device: &MldDevice, request: &LinkSwitchRequest) -> Result<()> {
        let vdev = request.vdev_id;
        if let Err(id) = self
            .observers
            .notify(vdev, request, NotifyReason::PreStartPostSerialize)
        {
            self.stats.lock().vetoed += 1;
            return Err(LinkSwitchError::Vetoed(id));
        }

        let plan = self.plan(device, request)?;

        self.step(device, LinkSwitchState::DisconnectCurrLink)?;
        self.conn
            .disconnect(
                vdev,
                DisconnectSource::LinkSwitch,
                DisconnectReason::LinkSwitch,
                plan.curr_ap_addr,
            )
            .await
            .map_err(|error| LinkSwitchError::Step {
                state: LinkSwitchState::DisconnectCurrLink,
                error,
            })?;

        self.step(device, LinkSwitchState::SetMacAddr)?;
        let set_mac = timeout(
            self.response_timeout,
            self.firmware
                .send_set_mac_addr(plan.curr_local_addr, plan.target_local_addr, vdev),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout(self.response_timeout)));
        set_mac.map_err(|error| LinkSwitchError::Step {
            state: LinkSwitchState::SetMacAddr,
            error,
        })?;

        self.step(device, LinkSwitchState::ConnectNewLink)?;
        let params = ConnectParams {
            vdev_id: vdev,
            link_id: request.new_link_id,
            bssid: plan.target_ap_addr,
            channel: plan.target_channel,
            self_link_addr: plan.target_local_addr,
            mld_addr: device.mld_addr(),
        };
        self.conn
            .start_connect(vdev, params)
            .await
            .map_err(|error| LinkSwitchError::Step {
                state: LinkSwitchState::ConnectNewLink,
                error,
            })?;

        self.step(device, LinkSwitchState::CompleteSuccess)
    }

    fn plan(&self, device: &MldDevice, request: &LinkSwitchRequest) -> Result<SwitchPlan> {
        let inner = device.lock();
        let curr = inner
            .link_table
            .get_link_by_id(request.curr_link_id)
            .ok_or(LinkSwitchError::UnknownLink(request.curr_link_id))?;
        let target = inner
            .link_table
            .get_link_by_id(request.new_link_id)
            .ok_or(LinkSwitchError::UnknownLink(request.new_link_id))?;
        let target_channel = target
            .channel
            .ok_or(LinkSwitchError::UnknownLink(request.new_link_id))?;
        Ok(SwitchPlan {
            curr_ap_addr: curr.ap_addr,
            curr_local_addr: curr.local_addr,
            target_ap_addr: target.ap_addr,
            target_local_addr: target.local_addr,
            target_channel,
        })
    }

    /// Moves the device's request to `to`.
    fn step(&self, device: &MldDevice, to: LinkSwitchState) -> Result<()> {
        let (from, key) = {
            let mut inner = device.lock();
            let request = inner.link_switch.as_mut().ok_or(LinkSwitchError::Aborted)?;
            let from = request.state();
            request.transition(to)?;
            (from, command_key(request))
        };
        debug!(device = %device.id(), %from, %to, "link switch step");
        audit_log!(AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "transition")
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id(device.id().to_string())
            .with_object_type("mld_device")
            .with_correlation_id(key.to_string())
            .with_details(serde_json::json!({
                "from": from.to_string(),
                "to": to.to_string(),
            })));
        Ok(())
    }

    /// Moves the active flag and the vdev onto the new link.
    ///
    /// Nothing changes if the new link cannot be activated.
    fn commit(&self, device: &MldDevice, request: &LinkSwitchRequest) -> Result<()> {
        let mut inner = device.lock();
        let target_addr = inner
            .link_table
            .get_link_by_id(request.new_link_id)
            .map(|l| l.local_addr)
            .ok_or(LinkSwitchError::UnknownLink(request.new_link_id))?;
        let was_active = inner
            .link_table
            .get_link_by_id(request.curr_link_id)
            .is_some_and(|l| l.is_active);
        if let Err(e) = inner.link_table.set_link_active(request.curr_link_id, false) {
            debug!(device = %device.id(), error = %e, "old link already gone");
        }
        if let Err(e) = inner.link_table.set_link_active(request.new_link_id, true) {
            warn!(device = %device.id(), error = %e, "failed to activate new link");
            if was_active {
                let _ = inner.link_table.set_link_active(request.curr_link_id, true);
            }
            return Err(e.into());
        }
        if let Some(vdev) = inner.vdevs.iter_mut().find(|v| v.vdev_id == request.vdev_id) {
            vdev.link_id = request.new_link_id;
            vdev.link_addr = target_addr;
        }
        Ok(())
    }

    async fn finish_success(&self, device: &MldDevice, request: &LinkSwitchRequest) {
        let (snapshot, claimed) = {
            let mut inner = device.lock();
            match inner.link_switch.as_mut() {
                Some(r) => (r.clone(), r.claim_confirm()),
                None => (request.clone(), true),
            }
        };

        let _ = self
            .observers
            .notify(request.vdev_id, &snapshot, NotifyReason::StopSuccess);
        if claimed {
            self.send_confirm(device.id(), ConfirmStatus::Accept, request.reason)
                .await;
        }

        {
            let mut inner = device.lock();
            if let Some(r) = inner.link_switch.as_mut() {
                if r.transition(LinkSwitchState::Idle).is_err() {
                    r.reset();
                }
            }
            inner.link_switch = None;
        }

        self.stats.lock().successes += 1;
        audit_log!(AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "complete")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(format!("{}/{}", device.id(), request.vdev_id))
            .with_object_type("vdev")
            .with_correlation_id(command_key(request).to_string())
            .with_details(serde_json::json!({
                "from_link": request.curr_link_id.as_u8(),
                "to_link": request.new_link_id.as_u8(),
                "reason": request.reason.to_string(),
            })));
    }

    async fn finish_failure(&self, device: &MldDevice, request: &LinkSwitchRequest, error: &LinkSwitchError) {
        let (snapshot, claimed, rollback) = {
            let mut inner = device.lock();
            let rollback_bssid = inner
                .ap_mld_addr
                .or_else(|| {
                    inner
                        .link_table
                        .get_link_by_id(request.curr_link_id)
                        .map(|l| l.ap_addr)
                })
                .unwrap_or(MacAddress::ZERO);
            let (snapshot, claimed, past_disconnect) = match inner.link_switch.as_mut() {
                Some(r) => {
                    let past_disconnect = r.state().is_past_disconnect();
                    if r.state() != LinkSwitchState::AbortTrans {
                        let _ = r.transition(LinkSwitchState::AbortTrans);
                    }
                    (r.clone(), r.claim_confirm(), past_disconnect)
                }
                None => (request.clone(), true, false),
            };
            if past_disconnect {
                if let Err(e) = inner.link_table.set_link_active(request.curr_link_id, false) {
                    debug!(device = %device.id(), error = %e, "old link already inactive");
                }
            }
            let rollback = past_disconnect.then_some(DeferredDisconnect {
                vdev_id: request.vdev_id,
                source: DisconnectSource::LinkSwitchRollback,
                reason: DisconnectReason::LinkSwitchFailure,
                bssid: rollback_bssid,
            });
            (snapshot, claimed, rollback)
        };

        let _ = self
            .observers
            .notify(request.vdev_id, &snapshot, NotifyReason::StopFailure);

        if let Some(rollback) = rollback {
            if device.defer_disconnect(rollback) {
                self.stats.lock().deferred_disconnects += 1;
            }
        }

        if claimed {
            self.send_confirm(device.id(), ConfirmStatus::Reject, request.reason)
                .await;
        }

        {
            let mut inner = device.lock();
            if let Some(r) = inner.link_switch.as_mut() {
                r.reset();
            }
            inner.link_switch = None;
        }

        self.stats.lock().failures += 1;
        audit_log!(AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "complete")
            .with_object_id(format!("{}/{}", device.id(), request.vdev_id))
            .with_object_type("vdev")
            .with_correlation_id(command_key(request).to_string())
            .with_details(serde_json::json!({
                "from_link": request.curr_link_id.as_u8(),
                "to_link": request.new_link_id.as_u8(),
                "failed_in": snapshot.state().to_string(),
                "rollback": rollback.is_some(),
            }))
            .with_error(error.to_string()));
    }

    /// Sends the link-switch confirmation for `device_id`.
    pub async fn send_confirm(&self, device_id: DeviceId, status: ConfirmStatus, reason: LinkSwitchReason) {
        self.stats.lock().confirms_sent += 1;
        let sent = timeout(
            self.response_timeout,
            self.firmware
                .send_link_switch_confirm(device_id, status, reason),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout(self.response_timeout)));

        let record = AuditRecord::new(AuditCategory::FirmwareConfirm, "LinkSwitchOrch", "confirm")
            .with_object_id(device_id.to_string())
            .with_object_type("mld_device")
            .with_details(serde_json::json!({ "status": status.to_string() }));
        match sent {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                audit_log!(record.with_error(e.to_string()));
            }
        }
    }

    /// Disconnects now, or defers while a link switch is in flight.
    pub async fn disconnect(
        &self,
        device: &MldDevice,
        disconnect: DeferredDisconnect,
    ) -> std::result::Result<DisconnectOutcome, GatewayError> {
        {
            let mut inner = device.lock();
            if inner.link_switch.is_some() {
                if inner.deferred_disconnect.is_none() {
                    inner.deferred_disconnect = Some(disconnect);
                    drop(inner);
                    self.stats.lock().deferred_disconnects += 1;
                } else {
                    debug!(device = %device.id(), "disconnect already deferred");
                }
                return Ok(DisconnectOutcome::Deferred);
            }
        }
        self.issue_disconnect(device, disconnect).await?;
        Ok(DisconnectOutcome::Issued)
    }

    fn spawn_disconnect(self: &Arc<Self>, device: &Arc<MldDevice>, disconnect: DeferredDisconnect) {
        info!(device = %device.id(), source = %disconnect.source, "issuing deferred disconnect");
        let orch = Arc::clone(self);
        let device = Arc::clone(device);
        tokio::spawn(async move {
            if let Err(e) = orch.issue_disconnect(&device, disconnect).await {
                warn!(device = %device.id(), error = %e, "deferred disconnect failed");
            }
        });
    }

    async fn flush_deferred_disconnect(&self, device: &MldDevice) {
        if let Some(disconnect) = device.take_deferred_disconnect() {
            info!(device = %device.id(), source = %disconnect.source, "issuing deferred disconnect");
            if let Err(e) = self.issue_disconnect(device, disconnect).await {
                warn!(device = %device.id(), error = %e, "deferred disconnect failed");
            }
        }
    }

    async fn issue_disconnect(
        &self,
        device: &MldDevice,
        disconnect: DeferredDisconnect,
    ) -> std::result::Result<(), GatewayError> {
        self.conn
            .disconnect(
                disconnect.vdev_id,
                disconnect.source,
                disconnect.reason,
                disconnect.bssid,
            )
            .await?;

        let mut inner = device.lock();
        inner.conn_state = ConnectionState::Disconnected;
        for vdev in inner.vdevs.iter_mut() {
            vdev.link_id = LinkId::INVALID;
        }
        let active: Vec<LinkId> = inner.link_table.active_links().map(|l| l.link_id).collect();
        for link_id in active {
            let _ = inner.link_table.set_link_active(link_id, false);
        }
        Ok(())
    }

    /// Cancels a link switch still waiting for the device's command slot.
    pub fn cancel(&self, key: &CommandKey) -> bool {
        self.serializer.cancel(key)
    }
}
