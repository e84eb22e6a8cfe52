//! Threshold rules evaluated against compliance assessments
//!
//! Rules are declarative data loaded from configuration. Each rule names a
//! metric derived from the assessment, a comparison operator and a threshold;
//! the alert manager evaluates every configured rule against every incoming
//! assessment.

use crate::events::{AssessmentResult, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assessment-derived metric a rule can compare against
///
/// Metric names outside this set are rejected when the configuration is
/// deserialized, so a typo in a rule definition fails at startup rather
/// than silently never firing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleMetric {
    /// Aggregate compliance score (0-100)
    CompliancePercentage,
    /// Count of per-control results that did not pass
    FailedControls,
    /// Numeric mapping of the risk classification (low=1 through critical=4)
    RiskScore,
}

impl RuleMetric {
    /// Extract this metric's current value from an assessment
    pub fn extract(&self, assessment: &AssessmentResult) -> f64 {
        match self {
            RuleMetric::CompliancePercentage => assessment.compliance_percentage,
            RuleMetric::FailedControls => assessment.failed_controls() as f64,
            RuleMetric::RiskScore => assessment.risk_level.score(),
        }
    }

    /// Configuration name of this metric
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleMetric::CompliancePercentage => "compliance_percentage",
            RuleMetric::FailedControls => "failed_controls",
            RuleMetric::RiskScore => "risk_score",
        }
    }
}

impl fmt::Display for RuleMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operator applied between the observed value and the threshold
///
/// Operators are written as their symbol in configuration (`">"`, `"<="`,
/// ...). A symbol that matches none of the six known operators parses to
/// `Unknown`, which never matches any value; configuration validation
/// additionally rejects rules carrying it before the engine starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// Any operator string that is not one of the six known symbols
    Unknown,
}

impl Operator {
    /// Compare an observed value against a threshold
    ///
    /// `Unknown` compares false for every input, so a rule with an
    /// unrecognized operator can never raise an alert.
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::GreaterThan => value > threshold,
            Operator::GreaterOrEqual => value >= threshold,
            Operator::LessThan => value < threshold,
            Operator::LessOrEqual => value <= threshold,
            Operator::Equal => value == threshold,
            Operator::NotEqual => value != threshold,
            Operator::Unknown => false,
        }
    }

    /// Whether this operator is one of the six known symbols
    pub fn is_known(&self) -> bool {
        !matches!(self, Operator::Unknown)
    }

    /// The configuration symbol for this operator
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Unknown => "?",
        }
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.trim() {
            ">" => Operator::GreaterThan,
            ">=" => Operator::GreaterOrEqual,
            "<" => Operator::LessThan,
            "<=" => Operator::LessOrEqual,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            _ => Operator::Unknown,
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A configured alerting rule
///
/// Read from the `[[alerts.rules]]` tables of the configuration file. The
/// rule fires when `<metric> <operator> <threshold>` holds for an incoming
/// assessment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    /// Name of the rule, used in alert titles and dedup keys
    pub rule_name: String,
    /// Which assessment metric to compare
    pub metric: RuleMetric,
    /// How to compare it
    pub operator: Operator,
    /// Value to compare against
    pub threshold: f64,
    /// Severity assigned to alerts raised by this rule
    pub severity: Severity,
}

impl AlertRule {
    /// Create a new alert rule
    ///
    /// # Arguments
    ///
    /// * `rule_name` - Name used in alert titles and dedup keys
    /// * `metric` - Assessment metric to compare
    /// * `operator` - Comparison operator
    /// * `threshold` - Value to compare against
    /// * `severity` - Severity assigned to raised alerts
    pub fn new(
        rule_name: impl Into<String>,
        metric: RuleMetric,
        operator: Operator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            metric,
            operator,
            threshold,
            severity,
        }
    }

    /// Whether this rule's condition holds for the given assessment
    pub fn evaluate(&self, assessment: &AssessmentResult) -> bool {
        self.operator
            .compare(self.observed_value(assessment), self.threshold)
    }

    /// The current value of this rule's metric for the given assessment
    pub fn observed_value(&self, assessment: &AssessmentResult) -> f64 {
        self.metric.extract(assessment)
    }

    /// Default rule set used when the configuration defines none
    ///
    /// A single rule raising a critical alert when the compliance score
    /// drops below 70 percent.
    pub fn default_rules() -> Vec<AlertRule> {
        vec![AlertRule::new(
            "low-compliance",
            RuleMetric::CompliancePercentage,
            Operator::LessThan,
            70.0,
            Severity::Critical,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ControlResult, RiskLevel};

    fn create_test_assessment(
        compliance: f64,
        risk: RiskLevel,
        failed_controls: usize,
    ) -> AssessmentResult {
        let mut controls = vec![ControlResult {
            control_id: "AC-1".to_string(),
            passed: true,
            detail: None,
        }];
        for i in 0..failed_controls {
            controls.push(ControlResult {
                control_id: format!("AC-{}", i + 2),
                passed: false,
                detail: Some("control check failed".to_string()),
            });
        }
        AssessmentResult {
            framework: "NCA".to_string(),
            organization_id: "acme".to_string(),
            compliance_percentage: compliance,
            risk_level: risk,
            per_control_results: controls,
        }
    }

    #[test]
    fn test_operator_parses_known_symbols() {
        assert_eq!(Operator::from(">".to_string()), Operator::GreaterThan);
        assert_eq!(Operator::from(">=".to_string()), Operator::GreaterOrEqual);
        assert_eq!(Operator::from("<".to_string()), Operator::LessThan);
        assert_eq!(Operator::from("<=".to_string()), Operator::LessOrEqual);
        assert_eq!(Operator::from("==".to_string()), Operator::Equal);
        assert_eq!(Operator::from("!=".to_string()), Operator::NotEqual);
    }

    #[test]
    fn test_operator_unknown_symbol_never_matches() {
        let op = Operator::from("~=".to_string());
        assert_eq!(op, Operator::Unknown);
        assert!(!op.is_known());

        // Fail closed: no combination of inputs makes an unknown operator fire
        assert!(!op.compare(0.0, 0.0));
        assert!(!op.compare(100.0, 0.0));
        assert!(!op.compare(-100.0, 0.0));
    }

    #[test]
    fn test_operator_comparisons() {
        assert!(Operator::GreaterThan.compare(5.0, 4.0));
        assert!(!Operator::GreaterThan.compare(4.0, 4.0));

        assert!(Operator::GreaterOrEqual.compare(4.0, 4.0));
        assert!(!Operator::GreaterOrEqual.compare(3.9, 4.0));

        assert!(Operator::LessThan.compare(3.0, 4.0));
        assert!(!Operator::LessThan.compare(4.0, 4.0));

        assert!(Operator::LessOrEqual.compare(4.0, 4.0));
        assert!(!Operator::LessOrEqual.compare(4.1, 4.0));

        assert!(Operator::Equal.compare(4.0, 4.0));
        assert!(!Operator::Equal.compare(4.1, 4.0));

        assert!(Operator::NotEqual.compare(4.1, 4.0));
        assert!(!Operator::NotEqual.compare(4.0, 4.0));
    }

    #[test]
    fn test_rule_evaluates_compliance_percentage() {
        let rule = AlertRule::new(
            "low-compliance",
            RuleMetric::CompliancePercentage,
            Operator::LessThan,
            70.0,
            Severity::Critical,
        );

        let failing = create_test_assessment(40.0, RiskLevel::High, 3);
        let passing = create_test_assessment(85.0, RiskLevel::Low, 0);

        assert!(rule.evaluate(&failing));
        assert!(!rule.evaluate(&passing));
        assert_eq!(rule.observed_value(&failing), 40.0);
    }

    #[test]
    fn test_rule_evaluates_failed_controls() {
        let rule = AlertRule::new(
            "control-failures",
            RuleMetric::FailedControls,
            Operator::GreaterThan,
            0.0,
            Severity::Warning,
        );

        let failing = create_test_assessment(90.0, RiskLevel::Medium, 2);
        let passing = create_test_assessment(90.0, RiskLevel::Medium, 0);

        assert!(rule.evaluate(&failing));
        assert_eq!(rule.observed_value(&failing), 2.0);
        assert!(!rule.evaluate(&passing));
    }

    #[test]
    fn test_rule_evaluates_risk_score() {
        let rule = AlertRule::new(
            "high-risk",
            RuleMetric::RiskScore,
            Operator::GreaterOrEqual,
            3.0,
            Severity::Critical,
        );

        assert!(rule.evaluate(&create_test_assessment(80.0, RiskLevel::High, 0)));
        assert!(rule.evaluate(&create_test_assessment(80.0, RiskLevel::Critical, 0)));
        assert!(!rule.evaluate(&create_test_assessment(80.0, RiskLevel::Medium, 0)));
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let rule: AlertRule = toml::from_str(
            r#"
            rule_name = "low-compliance"
            metric = "compliance_percentage"
            operator = "<"
            threshold = 70.0
            severity = "critical"
            "#,
        )
        .unwrap();

        assert_eq!(rule.rule_name, "low-compliance");
        assert_eq!(rule.metric, RuleMetric::CompliancePercentage);
        assert_eq!(rule.operator, Operator::LessThan);
        assert_eq!(rule.threshold, 70.0);
        assert_eq!(rule.severity, Severity::Critical);
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let result: Result<AlertRule, _> = toml::from_str(
            r#"
            rule_name = "bad"
            metric = "uptime_percentage"
            operator = "<"
            threshold = 70.0
            severity = "critical"
            "#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_operator_deserializes_to_unknown() {
        // Parsing succeeds so the error can be reported by configuration
        // validation with the offending rule name attached
        let rule: AlertRule = toml::from_str(
            r#"
            rule_name = "bad"
            metric = "compliance_percentage"
            operator = "=<"
            threshold = 70.0
            severity = "critical"
            "#,
        )
        .unwrap();

        assert_eq!(rule.operator, Operator::Unknown);
        assert!(!rule.evaluate(&create_test_assessment(0.0, RiskLevel::Critical, 5)));
    }

    #[test]
    fn test_operator_display_roundtrip() {
        for op in [
            Operator::GreaterThan,
            Operator::GreaterOrEqual,
            Operator::LessThan,
            Operator::LessOrEqual,
            Operator::Equal,
            Operator::NotEqual,
        ] {
            assert_eq!(Operator::from(op.symbol().to_string()), op);
        }
    }

    #[test]
    fn test_default_rules() {
        let rules = AlertRule::default_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_name, "low-compliance");
        assert_eq!(rules[0].metric, RuleMetric::CompliancePercentage);
        assert_eq!(rules[0].operator, Operator::LessThan);
        assert_eq!(rules[0].severity, Severity::Critical);
    }
}
