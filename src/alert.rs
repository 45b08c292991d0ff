//! Alert domain types (C2): severity, category, lifecycle status, and the
//! alert record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Severity assigned to an alert at creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no threshold was breached.
    Info,
    /// A warning threshold was breached.
    Warning,
    /// A non-threshold operational error (e.g. a failed sample, a lost
    /// connection to a dependency) worth surfacing as an alert.
    Error,
    /// A critical threshold was breached.
    Critical,
}

/// Subsystem that originated an alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// CPU utilization.
    Cpu,
    /// Memory utilization.
    Memory,
    /// Disk utilization.
    Disk,
    /// A monitored service's health or liveness.
    Service,
    /// Pending package/apt updates (reserved for future samplers).
    Apt,
    /// Known-vulnerability advisories (reserved for future samplers).
    Cve,
    /// General system-level conditions not covered by a more specific
    /// category.
    System,
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Newly raised, not yet reviewed.
    Active,
    /// Reviewed by an operator but not yet resolved.
    Acknowledged,
    /// Condition cleared or operator dismissed it.
    Dismissed,
}

/// A single alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier, assigned at creation.
    pub id: Uuid,
    /// Severity at creation time; never changes after creation.
    pub severity: Severity,
    /// Originating subsystem.
    pub category: Category,
    /// Lifecycle status; mutated by acknowledge/dismiss operations.
    pub status: Status,
    /// Identifier of the monitored entity that produced the alert (e.g. a
    /// disk mount point or service name).
    pub source: String,
    /// Short human-readable description.
    pub message: String,
    /// Longer description, optionally extended by an `AlertEnricher`.
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the acknowledge transition, if it has occurred.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Timestamp of the dismiss transition, if it has occurred.
    pub dismissed_at: Option<DateTime<Utc>>,
}

/// Key used to deduplicate alerts: at most one active alert may exist for a
/// given `(category, severity, source)` triple sharing the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    /// Originating subsystem.
    pub category: Category,
    /// Severity at creation time.
    pub severity: Severity,
    /// Identifier of the monitored entity.
    pub source: String,
    /// Human-readable description.
    pub message: String,
}

impl DedupKey {
    /// Builds the dedup key for an alert about to be raised.
    pub fn new(category: Category, severity: Severity, source: &str, message: &str) -> Self {
        Self {
            category,
            severity,
            source: source.to_string(),
            message: message.to_string(),
        }
    }

    /// Builds the dedup key matching an existing alert.
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            category: alert.category,
            severity: alert.severity,
            source: alert.source.clone(),
            message: alert.message.clone(),
        }
    }
}

impl Alert {
    /// Constructs a new active alert with a freshly assigned id and
    /// creation timestamp. `description` defaults to `message` and may be
    /// extended afterward by an `AlertEnricher`.
    pub fn new(severity: Severity, category: Category, source: &str, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            category,
            status: Status::Active,
            source: source.to_string(),
            message: message.to_string(),
            description: message.to_string(),
            created_at: Utc::now(),
            acknowledged_at: None,
            dismissed_at: None,
        }
    }

    /// Marks the alert acknowledged, recording the transition timestamp.
    /// `created_at <= acknowledged_at` always holds since the clock is
    /// monotonic across the call.
    pub fn acknowledge(&mut self) {
        self.status = Status::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
    }

    /// Marks the alert dismissed, recording the transition timestamp.
    pub fn dismiss(&mut self) {
        self.status = Status::Dismissed;
        self.dismissed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_from_alert_matches_new_alert_with_same_fields() {
        let alert = Alert::new(Severity::Warning, Category::Cpu, "cpu0", "load high");
        let key = DedupKey::new(Category::Cpu, Severity::Warning, "cpu0", "load high");
        assert_eq!(DedupKey::from_alert(&alert), key);
    }

    #[test]
    fn severity_round_trips_through_serde() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn new_alert_starts_active_with_no_transition_timestamps() {
        let alert = Alert::new(Severity::Info, Category::Service, "sshd", "restarted");
        assert_eq!(alert.status, Status::Active);
        assert!(alert.acknowledged_at.is_none());
        assert!(alert.dismissed_at.is_none());
        assert_eq!(alert.description, alert.message);
    }

    #[test]
    fn acknowledge_then_dismiss_orders_timestamps() {
        let mut alert = Alert::new(Severity::Warning, Category::Memory, "mem", "high");
        alert.acknowledge();
        alert.dismiss();
        assert!(alert.acknowledged_at.unwrap() <= alert.dismissed_at.unwrap());
        assert!(alert.created_at <= alert.acknowledged_at.unwrap());
    }
}
