//! Hardware topology policies.

use mlo_types::InstanceId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{TopologyConfig, TopologyKind};

/// Hardware constraints on where a primary anchor may live.
///
/// Chosen once per device at creation time.
pub trait TopologyPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Instance that must hold the primary role for a peer spanning
    /// `instances`, if the topology forces one.
    fn forced_primary(&self, instances: &[InstanceId]) -> Option<InstanceId>;

    /// Whether the primary role may move directly between two instances.
    fn is_migration_allowed(&self, from: InstanceId, to: InstanceId) -> bool;
}

/// Any instance may host the primary anchor.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconstrainedTopology;

impl TopologyPolicy for UnconstrainedTopology {
    fn name(&self) -> &'static str {
        "unconstrained"
    }

    fn forced_primary(&self, _instances: &[InstanceId]) -> Option<InstanceId> {
        None
    }

    fn is_migration_allowed(&self, _from: InstanceId, _to: InstanceId) -> bool {
        true
    }
}

/// Chain topologies where the primary must sit on the instance adjacent
/// to both others.
#[derive(Debug, Clone, Default)]
pub struct CentralInstanceTopology {
    adjacency: HashSet<(u8, u8)>,
}

impl CentralInstanceTopology {
    pub fn new<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (InstanceId, InstanceId)>,
    {
        let adjacency = pairs
            .into_iter()
            .map(|(a, b)| Self::key(a, b))
            .collect();
        Self { adjacency }
    }

    fn key(a: InstanceId, b: InstanceId) -> (u8, u8) {
        (a.0.min(b.0), a.0.max(b.0))
    }

    pub fn is_adjacent(&self, a: InstanceId, b: InstanceId) -> bool {
        self.adjacency.contains(&Self::key(a, b))
    }
}

impl TopologyPolicy for CentralInstanceTopology {
    fn name(&self) -> &'static str {
        "central"
    }

    fn forced_primary(&self, instances: &[InstanceId]) -> Option<InstanceId> {
        let &[a, b, c] = instances else {
            return None;
        };
        if !self.is_adjacent(a, b) {
            Some(c)
        } else if !self.is_adjacent(a, c) {
            Some(b)
        } else if !self.is_adjacent(b, c) {
            Some(a)
        } else {
            None
        }
    }

    fn is_migration_allowed(&self, from: InstanceId, to: InstanceId) -> bool {
        from == to || self.is_adjacent(from, to)
    }
}

/// Builds the policy named by the configuration.
pub fn topology_from_config(config: &TopologyConfig) -> Arc<dyn TopologyPolicy> {
    match config.kind {
        TopologyKind::Unconstrained => Arc::new(UnconstrainedTopology),
        TopologyKind::Central => Arc::new(CentralInstanceTopology::new(
            config
                .adjacency
                .iter()
                .map(|[a, b]| (InstanceId(*a), InstanceId(*b))),
        )),
    }
}
