//! Primary-anchor selection engine.

use mlo_types::{HwLinkId, InstanceId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::load::{InstanceDirectory, InstanceLoad};
use super::rssi::PathLossTable;
use super::topology::TopologyPolicy;
use crate::config::SelectionConfig;
use crate::debug_log;
use crate::peer::LinkPeerEntry;

/// Selection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No candidate links")]
    NoCandidates,
    #[error("Peer has no association link")]
    NoAssocLink,
    #[error("Source link {0} not found on peer")]
    UnknownSource(HwLinkId),
}

pub type Result<T> = std::result::Result<T, SelectionError>;

/// Rule that decided a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionRule {
    /// Single instance or single link: the association link.
    AssocOnly,
    /// Policy keeps the primary off the association instance.
    ForceNonAssoc,
    /// Topology forced the central instance.
    Topology,
    /// Only one candidate instance carries no peers.
    SingleFree,
    /// Several idle instances; bandwidth decided.
    FreeBandwidth,
    /// Only one instance is below its capacity quota.
    NotFull,
    /// Closest average RSSI.
    RssiBalance,
}

impl fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectionRule::AssocOnly => "assoc_only",
            SelectionRule::ForceNonAssoc => "force_non_assoc",
            SelectionRule::Topology => "topology",
            SelectionRule::SingleFree => "single_free",
            SelectionRule::FreeBandwidth => "free_bandwidth",
            SelectionRule::NotFull => "not_full",
            SelectionRule::RssiBalance => "rssi_balance",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub hw_link_id: HwLinkId,
    pub instance: InstanceId,
    pub rule: SelectionRule,
}

impl Selection {
    fn of(entry: &LinkPeerEntry, rule: SelectionRule) -> Self {
        Self {
            hw_link_id: entry.hw_link_id,
            instance: entry.instance,
            rule,
        }
    }
}

/// Picks the instance that should hold a peer's primary anchor.
pub struct SelectionEngine {
    config: SelectionConfig,
    path_loss: PathLossTable,
    directory: Arc<dyn InstanceDirectory>,
}

impl fmt::Debug for SelectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig, directory: Arc<dyn InstanceDirectory>) -> Self {
        let path_loss = PathLossTable::new(config.path_loss.clone());
        Self {
            config,
            path_loss,
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<dyn InstanceDirectory> {
        &self.directory
    }

    /// Chooses the primary for a new peer.
    ///
    /// `single_instance_device` is true when every link of the local MLD
    /// terminates on the same instance.
    pub fn select_initial_primary(
        &self,
        entries: &[LinkPeerEntry],
        single_instance_device: bool,
        topology: &dyn TopologyPolicy,
    ) -> Result<Selection> {
        if entries.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let assoc = entries
            .iter()
            .find(|e| e.is_assoc)
            .ok_or(SelectionError::NoAssocLink)?;

        let single_instance_peer = entries.iter().all(|e| e.instance == assoc.instance);
        if single_instance_device || single_instance_peer {
            return Ok(Selection::of(assoc, SelectionRule::AssocOnly));
        }

        if self.config.force_non_assoc_primary {
            if let Some(e) = entries.iter().find(|e| e.instance != assoc.instance) {
                return Ok(Selection::of(e, SelectionRule::ForceNonAssoc));
            }
        }

        let instances: Vec<InstanceId> = entries.iter().map(|e| e.instance).collect();
        if let Some(forced) = topology.forced_primary(&instances) {
            if let Some(e) = entries.iter().find(|e| e.instance == forced) {
                debug_log!("SelectionEngine", topology = topology.name(), instance = %forced, "primary forced by topology");
                return Ok(Selection::of(e, SelectionRule::Topology));
            }
        }

        let candidates: Vec<&LinkPeerEntry> = entries.iter().collect();
        Ok(self.balance(assoc, &candidates))
    }

    /// Chooses where to move a peer's primary away from `src`.
    pub fn select_migration_target(
        &self,
        entries: &[LinkPeerEntry],
        src: HwLinkId,
        topology: &dyn TopologyPolicy,
    ) -> Result<Selection> {
        let source = entries
            .iter()
            .find(|e| e.hw_link_id == src)
            .ok_or(SelectionError::UnknownSource(src))?;

        let candidates: Vec<&LinkPeerEntry> = entries
            .iter()
            .filter(|e| e.hw_link_id != src)
            .filter(|e| topology.is_migration_allowed(source.instance, e.instance))
            .collect();
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        let instances: Vec<InstanceId> = entries.iter().map(|e| e.instance).collect();
        if let Some(forced) = topology.forced_primary(&instances) {
            if let Some(e) = candidates.iter().find(|e| e.instance == forced) {
                return Ok(Selection::of(e, SelectionRule::Topology));
            }
        }

        let reference = entries.iter().find(|e| e.is_assoc).unwrap_or(source);
        Ok(self.balance(reference, &candidates))
    }

    /// RSSI/bandwidth balancing over `candidates`.
    ///
    /// `reference` is the link whose RSSI the peer reported.
    fn balance(&self, reference: &LinkPeerEntry, candidates: &[&LinkPeerEntry]) -> Selection {
        let loads: Vec<(&LinkPeerEntry, InstanceLoad)> = candidates
            .iter()
            .map(|e| (*e, self.directory.load(e.instance)))
            .collect();

        let free: Vec<&LinkPeerEntry> = loads
            .iter()
            .filter(|(_, l)| l.num_peers == 0)
            .map(|(e, _)| *e)
            .collect();

        if free.len() == 1 {
            return Selection::of(free[0], SelectionRule::SingleFree);
        }

        if free.len() >= 2 {
            // Keep the widest channel for capacity when another idle one exists.
            let max_bw = candidates
                .iter()
                .map(|e| e.channel.bandwidth_mhz())
                .max()
                .unwrap_or(0);
            let below: Vec<&LinkPeerEntry> = free
                .iter()
                .copied()
                .filter(|e| e.channel.bandwidth_mhz() < max_bw)
                .collect();
            let pool = if below.is_empty() { &free } else { &below };
            let pick = widest(pool).unwrap_or(free[0]);
            return Selection::of(pick, SelectionRule::FreeBandwidth);
        }

        let factor = 100u64.saturating_sub(self.config.congestion_pct as u64);
        let caps: Vec<u64> = loads
            .iter()
            .map(|(e, _)| e.channel.bandwidth_mhz() as u64 * factor)
            .collect();
        let sum_cap: u64 = caps.iter().sum();
        let total: u64 = loads.iter().map(|(_, l)| l.num_peers as u64).sum::<u64>() + 1;

        let not_full: Vec<usize> = (0..loads.len())
            .filter(|&i| {
                let quota = if sum_cap == 0 {
                    0
                } else {
                    (total * caps[i]).div_ceil(sum_cap)
                };
                (loads[i].1.num_peers as u64) < quota
            })
            .collect();

        if not_full.len() == 1 {
            return Selection::of(loads[not_full[0]].0, SelectionRule::NotFull);
        }

        let pool: Vec<usize> = if not_full.len() >= 2 {
            not_full
        } else {
            (0..loads.len()).collect()
        };

        let mut best: Option<(usize, i32)> = None;
        for i in pool {
            let (entry, load) = &loads[i];
            let adjusted = self
                .path_loss
                .adjusted_rssi(reference.rssi, &reference.channel, &entry.channel);
            let diff = (adjusted - load.avg_rssi).abs();
            if best.map(|(_, d)| diff < d).unwrap_or(true) {
                best = Some((i, diff));
            }
        }
        let idx = best.map(|(i, _)| i).unwrap_or(0);
        debug_log!(
            "SelectionEngine",
            instance = %loads[idx].0.instance,
            "primary chosen by rssi balance"
        );
        Selection::of(loads[idx].0, SelectionRule::RssiBalance)
    }
}

/// Widest channel, first one on ties.
fn widest<'a>(entries: &[&'a LinkPeerEntry]) -> Option<&'a LinkPeerEntry> {
    let mut best: Option<&'a LinkPeerEntry> = None;
    for e in entries {
        match best {
            Some(b) if e.channel.bandwidth_mhz() <= b.channel.bandwidth_mhz() => {}
            _ => best = Some(*e),
        }
    }
    best
}
