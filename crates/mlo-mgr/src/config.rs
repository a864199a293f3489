//! Manager configuration.
//!
//! Loaded from a TOML file (default location: /etc/mlo/mlo_mgr.toml).
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [selection]
//! congestion_pct = 30
//! force_non_assoc_primary = false
//!
//! [[selection.path_loss]]
//! min_ratio_pct = 250
//! loss_db = 8
//!
//! [topology]
//! kind = "central"
//! adjacency = [[0, 1], [1, 2]]
//!
//! [serialization]
//! command_timeout_ms = 5000
//!
//! [firmware]
//! response_timeout_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mlo/mlo_mgr.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One bucket of the path-loss correction table.
///
/// Applies when `candidate_freq * 100 / assoc_freq >= min_ratio_pct`.
/// The table is an empirically tuned heuristic; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathLossBucket {
    pub min_ratio_pct: u32,
    pub loss_db: u8,
}

/// Primary-anchor selection tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Fixed congestion estimate (percent) used in group capacity.
    #[serde(default = "default_congestion_pct")]
    pub congestion_pct: u8,

    /// Always place the primary on an instance other than the assoc link's.
    #[serde(default)]
    pub force_non_assoc_primary: bool,

    /// Path-loss buckets, sorted by descending `min_ratio_pct`.
    #[serde(default = "default_path_loss")]
    pub path_loss: Vec<PathLossBucket>,
}

/// Hardware topology policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Any instance may be primary.
    Unconstrained,
    /// 3-instance topologies where the primary must sit on the central instance.
    Central,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_topology_kind")]
    pub kind: TopologyKind,

    /// Pairs of instance ids that are directly adjacent.
    #[serde(default)]
    pub adjacency: Vec<[u8; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationConfig {
    /// Budget for one serialized command once it is active.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Waiting commands allowed per device.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Wait for a single firmware round-trip (set-mac-addr, PTQM migrate).
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSwitchConfig {
    #[serde(default = "default_max_observers")]
    pub max_observers: usize,
}

/// Complete manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MloConfig {
    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub serialization: SerializationConfig,

    #[serde(default)]
    pub firmware: FirmwareConfig,

    #[serde(default)]
    pub link_switch: LinkSwitchConfig,
}

fn default_congestion_pct() -> u8 {
    30
}

fn default_path_loss() -> Vec<PathLossBucket> {
    vec![
        PathLossBucket { min_ratio_pct: 250, loss_db: 8 },
        PathLossBucket { min_ratio_pct: 200, loss_db: 6 },
        PathLossBucket { min_ratio_pct: 150, loss_db: 4 },
        PathLossBucket { min_ratio_pct: 115, loss_db: 2 },
        PathLossBucket { min_ratio_pct: 100, loss_db: 0 },
    ]
}

fn default_topology_kind() -> TopologyKind {
    TopologyKind::Unconstrained
}

fn default_command_timeout() -> u64 {
    5000
}

fn default_max_pending() -> usize {
    8
}

fn default_response_timeout() -> u64 {
    2000
}

fn default_max_observers() -> usize {
    8
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            congestion_pct: default_congestion_pct(),
            force_non_assoc_primary: false,
            path_loss: default_path_loss(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            kind: default_topology_kind(),
            adjacency: Vec::new(),
        }
    }
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout(),
        }
    }
}

impl Default for LinkSwitchConfig {
    fn default() -> Self {
        Self {
            max_observers: default_max_observers(),
        }
    }
}

impl SerializationConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl FirmwareConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl MloConfig {
    /// Loads and validates a configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Loads the default file, falling back to defaults when it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MloConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selection.congestion_pct >= 100 {
            return Err(ConfigError::Invalid(format!(
                "selection.congestion_pct must be below 100, got {}",
                self.selection.congestion_pct
            )));
        }

        if self.selection.path_loss.is_empty() {
            return Err(ConfigError::Invalid(
                "selection.path_loss must not be empty".to_string(),
            ));
        }

        let sorted = self
            .selection
            .path_loss
            .windows(2)
            .all(|w| w[0].min_ratio_pct > w[1].min_ratio_pct);
        if !sorted {
            return Err(ConfigError::Invalid(
                "selection.path_loss must be sorted by descending min_ratio_pct".to_string(),
            ));
        }

        if let Some(pair) = self.topology.adjacency.iter().find(|p| p[0] == p[1]) {
            return Err(ConfigError::Invalid(format!(
                "topology.adjacency pair [{}, {}] names the same instance twice",
                pair[0], pair[1]
            )));
        }

        if self.serialization.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serialization.command_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.firmware.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "firmware.response_timeout_ms must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
