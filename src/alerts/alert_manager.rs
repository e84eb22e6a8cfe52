//! Alert lifecycle management for compliance violations
//!
//! The alert manager turns assessments into alerts: each incoming
//! `AssessmentResult` is checked against every configured rule, newly
//! violated rules raise alerts and cleared rules resolve them. Every
//! transition is appended to the audit ledger, published to event
//! subscribers and reflected in the metrics gauges.

use crate::alerts::{AlertRule, RuleMetric};
use crate::events::{
    AssessmentResult, AuditEvent, EngineEvent, EngineEventKind, EventType, Severity, Timestamp,
};
use crate::ledger::AuditLedger;
use crate::metrics::MetricsAggregator;
use crate::publisher::EventPublisher;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A raised compliance alert
///
/// Alerts are resolved, never deleted: a resolved alert keeps its
/// `resolved_at` timestamp and moves to the recent-history buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Unique identifier, "alt-" followed by a v4 UUID
    pub id: String,
    /// Rule that raised this alert
    pub rule_name: String,
    /// Human-readable title, unique per (rule, tenant, framework)
    pub title: String,
    /// Metric the rule compared
    pub metric: RuleMetric,
    /// Metric value at the time the alert was raised
    pub observed_value: f64,
    /// Threshold the rule compared against
    pub threshold: f64,
    /// Severity inherited from the rule
    pub severity: Severity,
    /// Organization the alert concerns
    pub organization_id: String,
    /// Regulatory framework the alert concerns
    pub framework: String,
    /// When the alert was raised
    pub triggered_at: Timestamp,
    /// When the alert was resolved, if it has been
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<Timestamp>,
    /// Whether the alert is still active
    pub active: bool,
}

/// Evaluates assessments against configured rules and manages alert state
///
/// Active alerts are deduplicated on `(rule_name, title)`: while an alert
/// for that key is unresolved, further violating assessments do not raise
/// a second one. When the condition clears, the alert is resolved and the
/// next violation raises a fresh alert.
///
/// Ledger or delivery failures inside the alert path are logged and never
/// propagated, so a broken audit disk cannot stop monitoring.
pub struct AlertManager {
    /// Rules evaluated against every assessment
    rules: Vec<AlertRule>,
    /// Unresolved alerts keyed by (rule_name, title)
    active: Mutex<HashMap<(String, String), Alert>>,
    /// Most recently resolved alerts, oldest first
    resolved: Mutex<VecDeque<Alert>>,
    /// Maximum number of resolved alerts to retain
    max_resolved_history: usize,
    ledger: Arc<AuditLedger>,
    publisher: Arc<EventPublisher>,
    metrics: Arc<MetricsAggregator>,
}

impl AlertManager {
    /// Create a new alert manager with the default resolved-history size
    ///
    /// # Arguments
    ///
    /// * `rules` - Rules to evaluate against every assessment
    /// * `ledger` - Audit ledger that records alert transitions
    /// * `publisher` - Publisher notified of raised and resolved alerts
    /// * `metrics` - Aggregator tracking the active-alert gauge
    pub fn new(
        rules: Vec<AlertRule>,
        ledger: Arc<AuditLedger>,
        publisher: Arc<EventPublisher>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self::with_history_size(rules, ledger, publisher, metrics, 100)
    }

    /// Create a new alert manager with a configurable resolved-history size
    pub fn with_history_size(
        rules: Vec<AlertRule>,
        ledger: Arc<AuditLedger>,
        publisher: Arc<EventPublisher>,
        metrics: Arc<MetricsAggregator>,
        max_resolved_history: usize,
    ) -> Self {
        for rule in &rules {
            if !rule.operator.is_known() {
                warn!(
                    "Alert rule {} carries an unknown operator and will never fire",
                    rule.rule_name
                );
            }
        }
        Self {
            rules,
            active: Mutex::new(HashMap::new()),
            resolved: Mutex::new(VecDeque::new()),
            max_resolved_history,
            ledger,
            publisher,
            metrics,
        }
    }

    /// Evaluate an assessment against every configured rule
    ///
    /// Raises an alert for each rule whose condition holds and has no
    /// active alert yet, and resolves the active alert of each rule whose
    /// condition no longer holds. The active-alert map stays locked for
    /// the whole evaluation, so concurrent workers assessing the same
    /// tenant cannot race a duplicate past the dedup check.
    ///
    /// # Arguments
    ///
    /// * `assessment` - The validation result to evaluate
    ///
    /// # Returns
    ///
    /// The alerts newly raised by this evaluation.
    pub fn evaluate(&self, assessment: &AssessmentResult) -> Vec<Alert> {
        let mut raised = Vec::new();
        let mut active = self.active.lock().unwrap();

        for rule in &self.rules {
            let title = Self::title_for(rule, assessment);
            let key = (rule.rule_name.clone(), title.clone());

            if rule.evaluate(assessment) {
                if active.contains_key(&key) {
                    debug!("Alert already active, not raising a duplicate: {}", title);
                    continue;
                }

                let alert = Alert {
                    id: format!("alt-{}", Uuid::new_v4()),
                    rule_name: rule.rule_name.clone(),
                    title,
                    metric: rule.metric,
                    observed_value: rule.observed_value(assessment),
                    threshold: rule.threshold,
                    severity: rule.severity,
                    organization_id: assessment.organization_id.clone(),
                    framework: assessment.framework.clone(),
                    triggered_at: Utc::now(),
                    resolved_at: None,
                    active: true,
                };

                self.record_raised(&alert);
                active.insert(key, alert.clone());
                raised.push(alert);
            } else if let Some(mut alert) = active.remove(&key) {
                alert.resolved_at = Some(Utc::now());
                alert.active = false;
                self.record_resolved(&alert);

                let mut resolved = self.resolved.lock().unwrap();
                if resolved.len() >= self.max_resolved_history {
                    resolved.pop_front();
                }
                resolved.push_back(alert);
            }
        }

        raised
    }

    /// Currently active alerts, ordered by the time they were raised
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.lock().unwrap().values().cloned().collect();
        alerts.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at));
        alerts
    }

    /// Number of currently active alerts
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Recently resolved alerts, oldest first
    pub fn resolved_alerts(&self) -> Vec<Alert> {
        self.resolved.lock().unwrap().iter().cloned().collect()
    }

    /// Title shared by an alert and its dedup key
    fn title_for(rule: &AlertRule, assessment: &AssessmentResult) -> String {
        format!(
            "{}: {}/{}",
            rule.rule_name, assessment.organization_id, assessment.framework
        )
    }

    /// Record a raised alert in the ledger, metrics and publisher
    fn record_raised(&self, alert: &Alert) {
        info!(
            "Raised {} alert {} ({} {} vs threshold {})",
            format!("{:?}", alert.severity).to_lowercase(),
            alert.title,
            alert.metric,
            alert.observed_value,
            alert.threshold
        );

        let mut event = AuditEvent::new(
            EventType::AlertGenerated,
            &alert.organization_id,
            &alert.framework,
            alert.severity,
            "alert_generated",
            format!("Alert raised: {}", alert.title),
        )
        .with_metadata("rule_name", &alert.rule_name)
        .with_metadata("metric", alert.metric.as_str())
        .with_metadata("observed_value", alert.observed_value.to_string())
        .with_metadata("threshold", alert.threshold.to_string());
        match serde_json::to_value(alert) {
            Ok(state) => event = event.with_after_state(state),
            Err(e) => warn!("Failed to serialize alert state for the audit trail: {}", e),
        }
        if let Err(e) = self.ledger.append(event) {
            error!(
                "Failed to record alert {} in the audit ledger: {}",
                alert.id, e
            );
        }

        self.metrics.alert_raised();
        self.publisher.publish(
            &EngineEvent::new(
                EngineEventKind::AlertRaised,
                &alert.organization_id,
                &alert.framework,
                format!("Alert raised: {}", alert.title),
            )
            .with_detail("alert_id", &alert.id)
            .with_detail("rule_name", &alert.rule_name)
            .with_detail("severity", format!("{:?}", alert.severity).to_lowercase()),
        );
    }

    /// Record a resolved alert in the ledger, metrics and publisher
    fn record_resolved(&self, alert: &Alert) {
        info!("Resolved alert {}", alert.title);

        let mut event = AuditEvent::new(
            EventType::AlertResolved,
            &alert.organization_id,
            &alert.framework,
            Severity::Info,
            "alert_resolved",
            format!("Alert resolved: {}", alert.title),
        )
        .with_metadata("rule_name", &alert.rule_name)
        .with_metadata("alert_id", &alert.id);
        match serde_json::to_value(alert) {
            Ok(state) => event = event.with_after_state(state),
            Err(e) => warn!("Failed to serialize alert state for the audit trail: {}", e),
        }
        if let Err(e) = self.ledger.append(event) {
            error!(
                "Failed to record alert resolution {} in the audit ledger: {}",
                alert.id, e
            );
        }

        self.metrics.alert_resolved();
        self.publisher.publish(
            &EngineEvent::new(
                EngineEventKind::AlertResolved,
                &alert.organization_id,
                &alert.framework,
                format!("Alert resolved: {}", alert.title),
            )
            .with_detail("alert_id", &alert.id)
            .with_detail("rule_name", &alert.rule_name),
        );
    }
}
