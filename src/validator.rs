//! Compliance validator backends
//!
//! A validator executes one compliance assessment for an (organization,
//! framework) pair against the current system configuration and returns the
//! resulting `AssessmentResult`. The engine treats the validator as an
//! external service: calls run under a timeout, failures are classified as
//! transient or permanent, and the worker pool decides about retries.

use crate::error::{ConfigError, ValidationError};
use crate::events::{AssessmentResult, ControlResult, RiskLevel};
use log::debug;
use reqwest::Client;
use serde_json::json;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// System configuration document handed to the validator with each request
pub type SystemConfig = serde_json::Value;

/// Source of the system configuration describing the monitored environment
pub trait SystemConfigProvider: Send + Sync {
    /// Current system configuration for an organization
    fn system_config(&self, organization_id: &str) -> Result<SystemConfig, ValidationError>;
}

/// Provider serving one fixed JSON document for every organization
pub struct StaticSystemConfigProvider {
    config: SystemConfig,
}

impl StaticSystemConfigProvider {
    pub fn new(config: SystemConfig) -> Self {
        Self { config }
    }

    /// Load the document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self {
            config: serde_json::from_str(&content)?,
        })
    }
}

impl Default for StaticSystemConfigProvider {
    fn default() -> Self {
        Self::new(json!({}))
    }
}

impl SystemConfigProvider for StaticSystemConfigProvider {
    fn system_config(&self, _organization_id: &str) -> Result<SystemConfig, ValidationError> {
        Ok(self.config.clone())
    }
}

/// Trait for validator backend implementations
pub trait Validator: Send + Sync {
    /// Run one compliance assessment
    fn assess<'a>(
        &'a self,
        organization_id: &'a str,
        framework: &'a str,
        system_config: &'a SystemConfig,
    ) -> Pin<Box<dyn Future<Output = Result<AssessmentResult, ValidationError>> + Send + 'a>>;

    /// Short backend name for logging
    fn name(&self) -> &str;
}

/// Validator that calls an external compliance-validation HTTP service
///
/// POSTs `{organization_id, framework, system_config}` to the configured
/// endpoint and expects an `AssessmentResult` back as JSON.
pub struct HttpValidator {
    client: Client,
    endpoint: String,
}

impl HttpValidator {
    /// Create a new HTTP validator
    ///
    /// # Arguments
    ///
    /// * `endpoint` - URL of the validation service
    /// * `timeout` - Per-request timeout applied at the HTTP client level
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("Failed to create HTTP client");

        Self { client, endpoint }
    }

    /// Reject assessments whose aggregate figures are out of range
    fn check_assessment(assessment: AssessmentResult) -> Result<AssessmentResult, ValidationError> {
        if !(0.0..=100.0).contains(&assessment.compliance_percentage) {
            return Err(ValidationError::InvalidResponse(format!(
                "compliance percentage {} out of range",
                assessment.compliance_percentage
            )));
        }
        Ok(assessment)
    }
}

impl Validator for HttpValidator {
    fn assess<'a>(
        &'a self,
        organization_id: &'a str,
        framework: &'a str,
        system_config: &'a SystemConfig,
    ) -> Pin<Box<dyn Future<Output = Result<AssessmentResult, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            debug!(
                "Requesting {} assessment for {} from {}",
                framework, organization_id, self.endpoint
            );

            let request = json!({
                "organization_id": organization_id,
                "framework": framework,
                "system_config": system_config,
            });

            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ValidationError::Timeout
                    } else {
                        ValidationError::HttpError(format!("HTTP request failed: {}", e))
                    }
                })?;

            if !response.status().is_success() {
                return Err(ValidationError::Transient(format!(
                    "validator returned HTTP {}",
                    response.status()
                )));
            }

            let assessment: AssessmentResult = response.json().await.map_err(|e| {
                ValidationError::InvalidResponse(format!("failed to parse assessment: {}", e))
            })?;

            Self::check_assessment(assessment)
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Validator that returns a configured fixed assessment
///
/// Used for local runs and demos where no validation service is available;
/// the organization and framework of each request are echoed back in the
/// assessment.
pub struct StaticValidator {
    compliance_percentage: f64,
    risk_level: RiskLevel,
    controls: Vec<ControlResult>,
}

impl StaticValidator {
    pub fn new(compliance_percentage: f64, risk_level: RiskLevel) -> Self {
        Self {
            compliance_percentage,
            risk_level,
            controls: vec![
                ControlResult {
                    control_id: "baseline-1".to_string(),
                    passed: true,
                    detail: None,
                },
                ControlResult {
                    control_id: "baseline-2".to_string(),
                    passed: true,
                    detail: None,
                },
            ],
        }
    }

    /// Replace the default per-control results
    pub fn with_controls(mut self, controls: Vec<ControlResult>) -> Self {
        self.controls = controls;
        self
    }
}

impl Default for StaticValidator {
    fn default() -> Self {
        Self::new(95.0, RiskLevel::Low)
    }
}

impl Validator for StaticValidator {
    fn assess<'a>(
        &'a self,
        organization_id: &'a str,
        framework: &'a str,
        _system_config: &'a SystemConfig,
    ) -> Pin<Box<dyn Future<Output = Result<AssessmentResult, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(AssessmentResult {
                framework: framework.to_string(),
                organization_id: organization_id.to_string(),
                compliance_percentage: self.compliance_percentage,
                risk_level: self.risk_level,
                per_control_results: self.controls.clone(),
            })
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Mock validator for testing and development
///
/// Provides scripted responses and can simulate delays and failures.
/// Responses are returned in order and cycle back to the first after the
/// last one.
pub struct MockValidator {
    responses: Vec<Result<AssessmentResult, ValidationError>>,
    current_index: Arc<Mutex<usize>>,
    delay: Option<Duration>,
    call_count: Arc<Mutex<usize>>,
}

impl MockValidator {
    /// Create a mock validator with a single scripted response
    pub fn with_response(response: Result<AssessmentResult, ValidationError>) -> Self {
        Self::with_responses(vec![response])
    }

    /// Create a mock validator with multiple scripted responses
    pub fn with_responses(responses: Vec<Result<AssessmentResult, ValidationError>>) -> Self {
        Self {
            responses,
            current_index: Arc::new(Mutex::new(0)),
            delay: None,
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Create a mock validator that always reports the given compliance score
    pub fn reporting(organization_id: &str, framework: &str, compliance_percentage: f64) -> Self {
        let risk_level = if compliance_percentage < 50.0 {
            RiskLevel::Critical
        } else if compliance_percentage < 70.0 {
            RiskLevel::High
        } else if compliance_percentage < 90.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        Self::with_response(Ok(AssessmentResult {
            framework: framework.to_string(),
            organization_id: organization_id.to_string(),
            compliance_percentage,
            risk_level,
            per_control_results: vec![ControlResult {
                control_id: format!("{}-1.1", framework),
                passed: compliance_percentage >= 70.0,
                detail: None,
            }],
        }))
    }

    /// Create a mock validator that always returns a transient error
    pub fn error(message: String) -> Self {
        Self::with_response(Err(ValidationError::Transient(message)))
    }

    /// Create a mock validator that always reports a timeout
    pub fn timeout() -> Self {
        Self::with_response(Err(ValidationError::Timeout))
    }

    /// Add a delay to all responses (useful for testing timeout behavior)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times assess() has been called
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Reset the call count and response cycling
    pub fn reset(&self) {
        *self.call_count.lock().unwrap() = 0;
        *self.current_index.lock().unwrap() = 0;
    }
}

impl Validator for MockValidator {
    fn assess<'a>(
        &'a self,
        _organization_id: &'a str,
        _framework: &'a str,
        _system_config: &'a SystemConfig,
    ) -> Pin<Box<dyn Future<Output = Result<AssessmentResult, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            *self.call_count.lock().unwrap() += 1;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let mut index = self.current_index.lock().unwrap();
            let response_index = *index % self.responses.len();
            *index += 1;

            self.responses[response_index].clone()
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SystemConfig {
        json!({"environment": "test"})
    }

    #[tokio::test]
    async fn test_static_validator_echoes_request_key() {
        let validator = StaticValidator::new(88.0, RiskLevel::Medium);

        let assessment = validator
            .assess("acme", "NCA", &test_config())
            .await
            .unwrap();

        assert_eq!(assessment.organization_id, "acme");
        assert_eq!(assessment.framework, "NCA");
        assert_eq!(assessment.compliance_percentage, 88.0);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert!(!assessment.per_control_results.is_empty());
    }

    #[tokio::test]
    async fn test_mock_validator_cycles_responses() {
        let validator = MockValidator::with_responses(vec![
            Err(ValidationError::Timeout),
            Ok(MockValidator::reporting("acme", "NCA", 80.0)
                .assess("acme", "NCA", &test_config())
                .await
                .unwrap()),
        ]);

        assert!(matches!(
            validator.assess("acme", "NCA", &test_config()).await,
            Err(ValidationError::Timeout)
        ));
        assert!(validator
            .assess("acme", "NCA", &test_config())
            .await
            .is_ok());
        // Cycles back to the first response
        assert!(validator
            .assess("acme", "NCA", &test_config())
            .await
            .is_err());
        assert_eq!(validator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_validator_delay_supports_timeout_testing() {
        let validator =
            MockValidator::reporting("acme", "NCA", 90.0).with_delay(Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_millis(10),
            validator.assess("acme", "NCA", &test_config()),
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_compliance_is_rejected() {
        let mut assessment = AssessmentResult {
            framework: "NCA".to_string(),
            organization_id: "acme".to_string(),
            compliance_percentage: 140.0,
            risk_level: RiskLevel::Low,
            per_control_results: vec![],
        };

        assert!(matches!(
            HttpValidator::check_assessment(assessment.clone()),
            Err(ValidationError::InvalidResponse(_))
        ));

        assessment.compliance_percentage = 100.0;
        assert!(HttpValidator::check_assessment(assessment).is_ok());
    }

    #[test]
    fn test_error_transience_classification() {
        assert!(ValidationError::Timeout.is_transient());
        assert!(ValidationError::Transient("server hiccup".to_string()).is_transient());
        assert!(ValidationError::HttpError("connection refused".to_string()).is_transient());
        assert!(!ValidationError::InvalidResponse("bad payload".to_string()).is_transient());
    }

    #[test]
    fn test_static_system_config_provider() {
        let provider = StaticSystemConfigProvider::new(json!({"region": "eu-central-1"}));
        assert_eq!(
            provider.system_config("acme").unwrap(),
            json!({"region": "eu-central-1"})
        );

        let empty = StaticSystemConfigProvider::default();
        assert_eq!(empty.system_config("acme").unwrap(), json!({}));
    }

    #[test]
    fn test_system_config_provider_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("system.json");
        std::fs::write(&path, r#"{"hosts": 12}"#).unwrap();

        let provider = StaticSystemConfigProvider::from_file(&path).unwrap();
        assert_eq!(provider.system_config("any").unwrap(), json!({"hosts": 12}));

        assert!(StaticSystemConfigProvider::from_file(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_mock_validator_scripting_by_compliance() {
        let low = MockValidator::reporting("acme", "NCA", 40.0);
        let high = MockValidator::reporting("acme", "NCA", 95.0);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let low_result = rt
            .block_on(low.assess("acme", "NCA", &test_config()))
            .unwrap();
        assert_eq!(low_result.risk_level, RiskLevel::Critical);
        assert_eq!(low_result.failed_controls(), 1);

        let high_result = rt
            .block_on(high.assess("acme", "NCA", &test_config()))
            .unwrap();
        assert_eq!(high_result.risk_level, RiskLevel::Low);
        assert_eq!(high_result.failed_controls(), 0);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(StaticValidator::default().name(), "static");
        assert_eq!(MockValidator::timeout().name(), "mock");
        assert_eq!(
            HttpValidator::new(
                "http://localhost:9000/validate".to_string(),
                Duration::from_secs(5)
            )
            .name(),
            "http"
        );
    }
}
