//! Link-switch observers.

use mlo_types::VdevId;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::types::{LinkSwitchError, LinkSwitchRequest, LinkSwitchStatus, NotifyReason};

/// Identifies a subsystem that registered an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubsystemId(pub u8);

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsys{}", self.0)
    }
}

/// Policy module told about link-switch progress.
///
/// Returning [`LinkSwitchStatus::Failure`] for a pre-start reason vetoes the
/// switch; the verdict is ignored for stop reasons.
pub trait LinkSwitchObserver: Send + Sync {
    fn notify(&self, vdev: VdevId, request: &LinkSwitchRequest, reason: NotifyReason) -> LinkSwitchStatus;
}

/// Registered observers, invoked in registration order.
pub struct ObserverRegistry {
    max_observers: usize,
    observers: RwLock<Vec<(SubsystemId, Arc<dyn LinkSwitchObserver>)>>,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<SubsystemId> = self.observers.read().iter().map(|(id, _)| *id).collect();
        f.debug_struct("ObserverRegistry")
            .field("max_observers", &self.max_observers)
            .field("observers", &ids)
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new(max_observers: usize) -> Self {
        Self {
            max_observers,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        id: SubsystemId,
        observer: Arc<dyn LinkSwitchObserver>,
    ) -> Result<(), LinkSwitchError> {
        let mut observers = self.observers.write();
        if observers.iter().any(|(existing, _)| *existing == id) {
            return Err(LinkSwitchError::ObserverExists(id));
        }
        if observers.len() >= self.max_observers {
            return Err(LinkSwitchError::ObserverLimit(self.max_observers));
        }
        observers.push((id, observer));
        Ok(())
    }

    pub fn unregister(&self, id: SubsystemId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every observer.
    ///
    /// For pre-start reasons the first veto stops the walk and names the
    /// vetoing subsystem. Observers run without any registry lock held.
    pub fn notify(
        &self,
        vdev: VdevId,
        request: &LinkSwitchRequest,
        reason: NotifyReason,
    ) -> Result<(), SubsystemId> {
        let observers = self.observers.read().clone();
        let can_veto = matches!(
            reason,
            NotifyReason::PreStartPreSerialize | NotifyReason::PreStartPostSerialize
        );
        for (id, observer) in observers {
            let status = observer.notify(vdev, request, reason);
            if can_veto && status == LinkSwitchStatus::Failure {
                return Err(id);
            }
        }
        Ok(())
    }
}
