//! Per-device command serialization.
//!
//! Link-switch and bulk link-migration requests are serialized commands:
//! at most one command executes per device, the rest wait in FIFO order.
//! Commands are matched (for duplicate detection and cancellation) by the
//! composite key `(device_id, target_link_id, current_link_id)`.
//!
//! Activation is modelled as a future: [`SerializationGateway::acquire`]
//! resolves once the command becomes active and yields an
//! [`ActiveCommand`] guard. Dropping the guard retires the command and
//! activates the next pending one.

use mlo_types::{DeviceId, HwLinkId, LinkId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Serialization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("Command {0} already queued or active")]
    Duplicate(CommandKey),
    #[error("Pending queue full for {0}")]
    QueueFull(DeviceId),
    #[error("Command {0} cancelled before activation")]
    Cancelled(CommandKey),
}

/// Kind of serialized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    LinkSwitch,
    LinkMigration,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::LinkSwitch => write!(f, "link_switch"),
            CommandType::LinkMigration => write!(f, "link_migration"),
        }
    }
}

/// Composite key identifying a serialized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub device_id: DeviceId,
    pub target_link_id: u16,
    pub current_link_id: u16,
}

impl CommandKey {
    pub fn link_switch(device_id: DeviceId, current: LinkId, target: LinkId) -> Self {
        Self {
            device_id,
            target_link_id: target.as_u8() as u16,
            current_link_id: current.as_u8() as u16,
        }
    }

    /// Bulk migration away from one hardware link; the target is open.
    pub fn link_migration(device_id: DeviceId, link: HwLinkId) -> Self {
        Self {
            device_id,
            target_link_id: u16::MAX,
            current_link_id: link.0,
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.device_id, self.current_link_id, self.target_link_id
        )
    }
}

/// A command submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cmd_type: CommandType,
    pub key: CommandKey,
    /// Execution budget once active. Exceeding it is fatal for the caller.
    pub timeout: Duration,
}

impl Command {
    pub fn new(cmd_type: CommandType, key: CommandKey, timeout: Duration) -> Self {
        Self {
            cmd_type,
            key,
            timeout,
        }
    }
}

struct PendingCommand {
    id: u64,
    cmd: Command,
    activate: oneshot::Sender<()>,
}

#[derive(Default)]
struct DeviceQueue {
    active: Option<(u64, Command)>,
    pending: VecDeque<PendingCommand>,
}

impl DeviceQueue {
    fn holds(&self, key: &CommandKey) -> bool {
        self.active.as_ref().map(|(_, c)| &c.key == key).unwrap_or(false)
            || self.pending.iter().any(|p| &p.cmd.key == key)
    }
}

/// Single-active-command execution queue, keyed by device.
pub struct SerializationGateway {
    queues: Mutex<HashMap<DeviceId, DeviceQueue>>,
    next_id: AtomicU64,
    max_pending: usize,
}

impl fmt::Debug for SerializationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationGateway")
            .field("devices", &self.queues.lock().len())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl SerializationGateway {
    /// Creates a gateway allowing `max_pending` waiting commands per device.
    pub fn new(max_pending: usize) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_pending,
        })
    }

    /// Queues a command and resolves once it is the device's active command.
    pub async fn acquire(self: &Arc<Self>, cmd: Command) -> Result<ActiveCommand, SerializationError> {
        let device_id = cmd.key.device_id;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let rx = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(device_id).or_default();

            if queue.holds(&cmd.key) {
                return Err(SerializationError::Duplicate(cmd.key));
            }

            if queue.active.is_none() {
                debug!(key = %cmd.key, cmd = %cmd.cmd_type, "command activated immediately");
                queue.active = Some((id, cmd.clone()));
                return Ok(ActiveCommand {
                    gateway: Arc::clone(self),
                    id,
                    cmd,
                });
            }

            if queue.pending.len() >= self.max_pending {
                return Err(SerializationError::QueueFull(device_id));
            }

            let (tx, rx) = oneshot::channel();
            queue.pending.push_back(PendingCommand {
                id,
                cmd: cmd.clone(),
                activate: tx,
            });
            debug!(key = %cmd.key, depth = queue.pending.len(), "command queued");
            rx
        };

        let mut waiter = PendingWait {
            gateway: Arc::clone(self),
            device_id,
            id,
            armed: true,
        };

        match rx.await {
            Ok(()) => {
                waiter.armed = false;
                Ok(ActiveCommand {
                    gateway: Arc::clone(self),
                    id,
                    cmd,
                })
            }
            Err(_) => {
                waiter.armed = false;
                Err(SerializationError::Cancelled(cmd.key))
            }
        }
    }

    /// Cancels a pending (not yet active) command. Returns true if found.
    pub fn cancel(&self, key: &CommandKey) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&key.device_id) else {
            return false;
        };
        let before = queue.pending.len();
        // Dropping the sender wakes the waiter with `Cancelled`.
        queue.pending.retain(|p| &p.cmd.key != key);
        before != queue.pending.len()
    }

    /// Returns the active command of a device, if any.
    pub fn active_command(&self, device_id: DeviceId) -> Option<Command> {
        self.queues
            .lock()
            .get(&device_id)
            .and_then(|q| q.active.as_ref().map(|(_, c)| c.clone()))
    }

    /// Number of commands waiting behind the active one.
    pub fn pending_count(&self, device_id: DeviceId) -> usize {
        self.queues
            .lock()
            .get(&device_id)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    fn release(&self, device_id: DeviceId, id: u64) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&device_id) else {
            return;
        };

        match &queue.active {
            Some((active_id, _)) if *active_id == id => {}
            _ => {
                warn!(%device_id, id, "release of a command that is not active");
                return;
            }
        }
        queue.active = None;

        while let Some(next) = queue.pending.pop_front() {
            let next_id = next.id;
            let next_cmd = next.cmd.clone();
            queue.active = Some((next_id, next_cmd));
            if next.activate.send(()).is_ok() {
                debug!(key = %next.cmd.key, "pending command activated");
                break;
            }
            // Waiter vanished between queueing and activation.
            queue.active = None;
        }

        if queue.active.is_none() && queue.pending.is_empty() {
            queues.remove(&device_id);
        }
    }

    fn abandon(&self, device_id: DeviceId, id: u64) {
        let is_active = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(&device_id) else {
                return;
            };
            queue.pending.retain(|p| p.id != id);
            matches!(&queue.active, Some((active_id, _)) if *active_id == id)
        };
        if is_active {
            self.release(device_id, id);
        }
    }
}

/// Guard for a waiter that may be dropped while still queued.
struct PendingWait {
    gateway: Arc<SerializationGateway>,
    device_id: DeviceId,
    id: u64,
    armed: bool,
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.armed {
            self.gateway.abandon(self.device_id, self.id);
        }
    }
}

/// The device's currently executing command.
///
/// Dropping the guard retires the command.
pub struct ActiveCommand {
    gateway: Arc<SerializationGateway>,
    id: u64,
    cmd: Command,
}

impl ActiveCommand {
    pub fn command(&self) -> &Command {
        &self.cmd
    }

    pub fn key(&self) -> &CommandKey {
        &self.cmd.key
    }

    pub fn timeout(&self) -> Duration {
        self.cmd.timeout
    }
}

impl fmt::Debug for ActiveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCommand")
            .field("id", &self.id)
            .field("cmd", &self.cmd)
            .finish()
    }
}

impl Drop for ActiveCommand {
    fn drop(&mut self) {
        self.gateway.release(self.cmd.key.device_id, self.id);
    }
}
