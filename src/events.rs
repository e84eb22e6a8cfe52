//! Core event types and enums for the compliance monitoring engine
//!
//! This module defines the fundamental data structures used throughout the application
//! for representing audit events, validation results, and related types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity level for audit events and alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational record, no action required
    Info,
    /// Warning that may require attention
    Warning,
    /// Critical issue requiring immediate attention
    Critical,
}

/// Category of a record in the audit ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A completed compliance validation of one (organization, framework) pair
    ControlCheck,
    /// An alert rule crossed into violation
    AlertGenerated,
    /// A previously raised alert cleared
    AlertResolved,
    /// A validation attempt exhausted its retries
    ValidationError,
    /// An operational change to the engine itself (monitor lifecycle, capacity warnings)
    SystemChange,
}

/// Risk classification reported by the external validator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No significant exposure
    Low,
    /// Exposure worth tracking
    Medium,
    /// Exposure requiring remediation
    High,
    /// Exposure requiring immediate remediation
    Critical,
}

impl RiskLevel {
    /// Numeric score used by alert rules (low=1 through critical=4)
    pub fn score(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 2.0,
            RiskLevel::High => 3.0,
            RiskLevel::Critical => 4.0,
        }
    }
}

/// Outcome of a single control evaluation within an assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResult {
    /// Identifier of the control within the framework
    pub control_id: String,
    /// Whether the control passed validation
    pub passed: bool,
    /// Optional human-readable detail about the outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one compliance validation, produced by the external validator
///
/// Treated as opaque input: the engine never inspects individual controls
/// beyond counting failures and reading the aggregate figures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentResult {
    /// Regulatory framework that was validated
    pub framework: String,
    /// Organization the assessment belongs to
    pub organization_id: String,
    /// Aggregate compliance score (0-100)
    pub compliance_percentage: f64,
    /// Overall risk classification
    pub risk_level: RiskLevel,
    /// Per-control outcomes
    pub per_control_results: Vec<ControlResult>,
}

impl AssessmentResult {
    /// Number of controls that failed validation
    pub fn failed_controls(&self) -> usize {
        self.per_control_results.iter().filter(|c| !c.passed).count()
    }
}

/// What caused a validation task to be enqueued
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Enqueued by the scheduler because the monitor was due
    Scheduled,
    /// Enqueued by an external trigger call
    Event,
}

/// Ephemeral work item for the validation worker pool
///
/// Created by the scheduler or an external trigger, consumed exactly once
/// by a worker, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationTask {
    /// Monitor the task was enqueued for
    pub monitor_id: String,
    /// Organization to validate
    pub organization_id: String,
    /// Framework to validate against
    pub framework: String,
    /// What caused the enqueue
    pub trigger_kind: TriggerKind,
}

impl ValidationTask {
    pub fn new(
        monitor_id: impl Into<String>,
        organization_id: impl Into<String>,
        framework: impl Into<String>,
        trigger_kind: TriggerKind,
    ) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            organization_id: organization_id.into(),
            framework: framework.into(),
            trigger_kind,
        }
    }
}

/// Immutable record appended to the audit ledger
///
/// Field order is fixed and the metadata map is sorted, so serializing an
/// event always yields the same bytes. The ledger's hash chain depends on
/// this stability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Unique identifier, "evt-" followed by a v4 UUID
    pub event_id: String,
    /// Category of the record
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Timestamp,
    /// Organization the event concerns
    pub organization_id: String,
    /// Regulatory framework the event concerns
    pub framework: String,
    /// Specific control, when the event concerns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    /// Severity of the recorded fact
    pub severity: Severity,
    /// Short machine-oriented action name (e.g. "validation_completed")
    pub action: String,
    /// Human-readable description
    pub description: String,
    /// Entity state before the change, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_state: Option<serde_json::Value>,
    /// Entity state after the change, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_state: Option<serde_json::Value>,
    /// Additional key-value context, sorted for stable serialization
    pub metadata: BTreeMap<String, String>,
    /// Hash of attached evidence, when the event carries any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_hash: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        organization_id: impl Into<String>,
        framework: impl Into<String>,
        severity: Severity,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_id: format!("evt-{}", Uuid::new_v4()),
            event_type,
            timestamp: Utc::now(),
            organization_id: organization_id.into(),
            framework: framework.into(),
            control_id: None,
            severity,
            action: action.into(),
            description: description.into(),
            before_state: None,
            after_state: None,
            metadata: BTreeMap::new(),
            evidence_hash: None,
        }
    }

    pub fn with_control_id(mut self, control_id: impl Into<String>) -> Self {
        self.control_id = Some(control_id.into());
        self
    }

    pub fn with_after_state(mut self, state: serde_json::Value) -> Self {
        self.after_state = Some(state);
        self
    }

    pub fn with_before_state(mut self, state: serde_json::Value) -> Self {
        self.before_state = Some(state);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_evidence_hash(mut self, hash: impl Into<String>) -> Self {
        self.evidence_hash = Some(hash.into());
        self
    }
}

/// Kind of summary event broadcast to subscribers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    /// A validation finished and its assessment was recorded
    ValidationCompleted,
    /// A validation exhausted its retries
    ValidationFailed,
    /// An alert was created
    AlertRaised,
    /// An alert was resolved
    AlertResolved,
    /// A monitor was registered or resumed
    MonitorStarted,
    /// A monitor was paused
    MonitorStopped,
    /// A task was dropped because the worker queue was full
    QueueOverflow,
}

/// Summary event delivered to event publisher subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    /// Unique identifier, "evt-" followed by a v4 UUID
    pub id: String,
    /// What happened
    pub kind: EngineEventKind,
    /// When it happened
    pub timestamp: Timestamp,
    /// Organization concerned
    pub organization_id: String,
    /// Framework concerned
    pub framework: String,
    /// One-line human-readable summary
    pub summary: String,
    /// Additional key-value context
    pub details: BTreeMap<String, String>,
}

impl EngineEvent {
    pub fn new(
        kind: EngineEventKind,
        organization_id: impl Into<String>,
        framework: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            kind,
            timestamp: Utc::now(),
            organization_id: organization_id.into(),
            framework: framework.into(),
            summary: summary.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(
            EventType::ControlCheck,
            "acme",
            "NCA",
            Severity::Info,
            "validation_completed",
            "Compliance validation completed",
        )
        .with_control_id("NCA-1.2")
        .with_metadata("compliance_percentage", "82.5");

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_audit_event_optional_fields_omitted() {
        let event = AuditEvent::new(
            EventType::SystemChange,
            "acme",
            "NCA",
            Severity::Info,
            "monitor_started",
            "Monitoring started",
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("control_id"));
        assert!(!json.contains("before_state"));
        assert!(!json.contains("after_state"));
        assert!(!json.contains("evidence_hash"));
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&EventType::ControlCheck).unwrap(),
            "\"CONTROL_CHECK\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::AlertGenerated).unwrap(),
            "\"ALERT_GENERATED\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::AlertResolved).unwrap(),
            "\"ALERT_RESOLVED\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::ValidationError).unwrap(),
            "\"VALIDATION_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::SystemChange).unwrap(),
            "\"SYSTEM_CHANGE\""
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Info < Severity::Critical);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::Info).unwrap(), "\"info\"");
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_risk_level_ordering_and_score() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::Low.score(), 1.0);
        assert_eq!(RiskLevel::Critical.score(), 4.0);
    }

    #[test]
    fn test_failed_controls_count() {
        let assessment = AssessmentResult {
            framework: "NCA".to_string(),
            organization_id: "acme".to_string(),
            compliance_percentage: 66.7,
            risk_level: RiskLevel::Medium,
            per_control_results: vec![
                ControlResult {
                    control_id: "NCA-1.1".to_string(),
                    passed: true,
                    detail: None,
                },
                ControlResult {
                    control_id: "NCA-1.2".to_string(),
                    passed: false,
                    detail: Some("TLS 1.0 still enabled".to_string()),
                },
                ControlResult {
                    control_id: "NCA-1.3".to_string(),
                    passed: false,
                    detail: None,
                },
            ],
        };

        assert_eq!(assessment.failed_controls(), 2);
    }

    #[test]
    fn test_engine_event_id_prefix() {
        let event = EngineEvent::new(
            EngineEventKind::ValidationCompleted,
            "acme",
            "NCA",
            "Validation completed",
        );
        assert!(event.id.starts_with("evt-"));
    }

    #[test]
    fn test_trigger_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&TriggerKind::Scheduled).unwrap(),
            "\"scheduled\""
        );
        assert_eq!(
            serde_json::to_string(&TriggerKind::Event).unwrap(),
            "\"event\""
        );
    }
}
