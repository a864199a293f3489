//! Per-instance primary-anchor load.

use mlo_types::InstanceId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Load seen by one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceLoad {
    /// Peers whose primary anchor sits on the instance.
    pub num_peers: u32,
    /// Average RSSI (dBm) of those peers, 0 when there are none.
    pub avg_rssi: i32,
}

/// Source of per-instance load, injected into the selection engine.
pub trait InstanceDirectory: Send + Sync {
    fn load(&self, instance: InstanceId) -> InstanceLoad;

    /// A peer's primary anchor landed on `instance`.
    fn record_primary(&self, instance: InstanceId, rssi: i8);

    /// A peer's primary anchor left `instance`.
    fn release_primary(&self, instance: InstanceId, rssi: i8);
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    peers: u32,
    rssi_sum: i64,
}

/// In-process [`InstanceDirectory`] fed by the manager.
#[derive(Debug, Default)]
pub struct LoadTracker {
    instances: RwLock<HashMap<InstanceId, Counters>>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every instance that has carried load.
    pub fn snapshot(&self) -> Vec<(InstanceId, InstanceLoad)> {
        let mut out: Vec<_> = self
            .instances
            .read()
            .iter()
            .map(|(i, c)| (*i, c.as_load()))
            .collect();
        out.sort_by_key(|(i, _)| *i);
        out
    }
}

impl Counters {
    fn as_load(&self) -> InstanceLoad {
        if self.peers == 0 {
            return InstanceLoad::default();
        }
        InstanceLoad {
            num_peers: self.peers,
            avg_rssi: (self.rssi_sum / self.peers as i64) as i32,
        }
    }
}

impl InstanceDirectory for LoadTracker {
    fn load(&self, instance: InstanceId) -> InstanceLoad {
        self.instances
            .read()
            .get(&instance)
            .map(Counters::as_load)
            .unwrap_or_default()
    }

    fn record_primary(&self, instance: InstanceId, rssi: i8) {
        let mut instances = self.instances.write();
        let c = instances.entry(instance).or_default();
        c.peers += 1;
        c.rssi_sum += rssi as i64;
    }

    fn release_primary(&self, instance: InstanceId, rssi: i8) {
        let mut instances = self.instances.write();
        if let Some(c) = instances.get_mut(&instance) {
            if c.peers > 0 {
                c.peers -= 1;
                c.rssi_sum -= rssi as i64;
            }
            if c.peers == 0 {
                c.rssi_sum = 0;
            }
        }
    }
}
