//! Structured audit logging for link ownership changes.
//!
//! Every decision that changes which link or instance owns an association
//! (primary assignment, PTQM migration, link switch) and every firmware
//! confirmation is recorded as an [`AuditRecord`] and emitted through
//! `tracing` under the `audit` target. Records serialize to JSON so they
//! can be shipped next to the host's other structured logs.
//!
//! | Outcome | Level |
//! |---------|-------|
//! | Success | info |
//! | InProgress | debug |
//! | Failure / Denied | warn |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// MLD device creation/teardown
    DeviceLifecycle,
    /// Link info table changes (partner links, channel updates)
    LinkTable,
    /// Initial primary anchor assignment
    PrimaryAssignment,
    /// Per-peer PTQM migration
    PeerMigration,
    /// Bulk link-level migration
    LinkMigration,
    /// Link-switch state machine progress
    LinkSwitch,
    /// Confirmation messages sent to firmware
    FirmwareConfirm,
    /// Error and failure events
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::DeviceLifecycle => write!(f, "DEVICE_LIFECYCLE"),
            AuditCategory::LinkTable => write!(f, "LINK_TABLE"),
            AuditCategory::PrimaryAssignment => write!(f, "PRIMARY_ASSIGNMENT"),
            AuditCategory::PeerMigration => write!(f, "PEER_MIGRATION"),
            AuditCategory::LinkMigration => write!(f, "LINK_MIGRATION"),
            AuditCategory::LinkSwitch => write!(f, "LINK_SWITCH"),
            AuditCategory::FirmwareConfirm => write!(f, "FIRMWARE_CONFIRM"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    /// Rejected by validation or by an observer veto
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// One audit record.
///
/// Built with the `with_*` methods and handed to [`audit_log!`](crate::audit_log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Module emitting the record (e.g. "LinkSwitchOrch")
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Affected object, e.g. "mld1/vdev0" or "mld1/peer12"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Groups the records of one link-switch attempt or one bulk migration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current UTC time.
    ///
    /// The outcome defaults to `InProgress`.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Serializes the record; never fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Debug-level log tagged with the emitting module.
///
/// # Usage
/// ```ignore
/// debug_log!("SelectionEngine", instance = 2, "free instance chosen");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(
            source = $source,
            $($arg)*
        )
    };
}

/// Info-level log tagged with the emitting module.
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(
            source = $source,
            $($arg)*
        )
    };
}

/// Warn-level log tagged with the emitting module.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(
            source = $source,
            $($arg)*
        )
    };
}

/// Error-level log tagged with the emitting module.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(
            source = $source,
            $($arg)*
        )
    };
}

/// Emits an [`AuditRecord`] at a level derived from its outcome.
///
/// # Usage
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "complete")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("mld1/vdev0");
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Installs a JSON tracing subscriber honoring `RUST_LOG`.
///
/// Call once at host startup; `log_level` is used when `RUST_LOG` is unset.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Installs a human-readable subscriber, for development and tests.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(AuditCategory::LinkSwitch, "LinkSwitchOrch", "start")
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id("mld1/vdev0")
            .with_object_type("link_switch");

        assert_eq!(record.category, AuditCategory::LinkSwitch);
        assert_eq!(record.source, "LinkSwitchOrch");
        assert_eq!(record.outcome, AuditOutcome::InProgress);
        assert_eq!(record.object_id.as_deref(), Some("mld1/vdev0"));
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::PeerMigration, "PeerMigrationOrch", "migrate")
            .with_outcome(AuditOutcome::Success)
            .with_error("firmware timeout");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("firmware timeout"));
    }

    #[test]
    fn test_json_serialization() {
        let record = AuditRecord::new(
            AuditCategory::PrimaryAssignment,
            "SelectionEngine",
            "assign_primary",
        )
        .with_outcome(AuditOutcome::Success)
        .with_correlation_id("peer12")
        .with_details(serde_json::json!({ "instance": 2 }));

        let json = record.to_json();
        assert!(json.contains("PRIMARY_ASSIGNMENT"));
        assert!(json.contains("\"instance\":2"));
        assert!(json.contains("peer12"));
    }

    #[test]
    fn test_display() {
        assert_eq!(AuditCategory::LinkMigration.to_string(), "LINK_MIGRATION");
        assert_eq!(AuditOutcome::Denied.to_string(), "denied");
    }
}
