//! Engine configuration
//!
//! Loaded from a TOML file at startup and validated before any component is
//! wired up. Every section has defaults that produce a runnable local
//! configuration, so a missing file or a partial file is fine; an invalid
//! file is not.

use crate::alerts::{AlertRule, Operator};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Monitors the run command registers before the loops start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monitors: Vec<MonitorConfig>,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

/// Scheduling, worker pool and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the scheduler looks for due monitors, in seconds
    pub tick_interval_seconds: u64,
    /// How often the metrics loop logs a snapshot, in seconds
    pub metrics_interval_seconds: u64,
    /// Number of validation worker threads
    pub worker_count: usize,
    /// Queue capacity of each worker
    pub queue_capacity: usize,
    /// Consecutive failures after which a monitor is marked failed
    pub max_consecutive_failures: u32,
    /// Retries allowed after the initial validation attempt
    pub max_retry_attempts: u32,
    /// Delay before the first retry, doubled for each further retry
    pub retry_base_delay_ms: u64,
    /// Timeout applied to each validator call, in seconds
    pub validator_timeout_seconds: u64,
    /// Monitor interval used when start-monitoring gives none, in minutes
    pub default_monitor_interval_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            metrics_interval_seconds: 60,
            worker_count: 4,
            queue_capacity: 64,
            max_consecutive_failures: 3,
            max_retry_attempts: 2,
            retry_base_delay_ms: 500,
            validator_timeout_seconds: 30,
            default_monitor_interval_minutes: 60,
        }
    }
}

/// Locations of the persistent ledger and registry files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub ledger_path: PathBuf,
    pub monitors_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("warden-ledger.jsonl"),
            monitors_path: PathBuf::from("warden-monitors.json"),
        }
    }
}

/// Which validator backend to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorBackend {
    /// Fixed assessment, for local runs and demos
    Static,
    /// External validation service over HTTP
    Http,
}

/// Validator backend selection and its settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub backend: ValidatorBackend,
    /// URL of the validation service (http backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Optional JSON document describing the monitored systems
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config_path: Option<PathBuf>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            backend: ValidatorBackend::Static,
            endpoint: None,
            system_config_path: None,
        }
    }
}

/// Event publisher settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PublisherConfig {
    /// Optional webhook that receives every engine event as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// A monitor declared in the configuration file
///
/// Registered through the same idempotent `start_monitoring` path as the
/// CLI, so re-declaring an already active monitor changes nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub organization_id: String,
    pub framework: String,
    /// Falls back to `default_monitor_interval_minutes` when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<i64>,
}

/// Alert rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "AlertRule::default_rules")]
    pub rules: Vec<AlertRule>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: AlertRule::default_rules(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid TOML,
    /// or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.tick_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "tick_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.engine.metrics_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "metrics_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.engine.worker_count == 0 {
            return Err(ConfigError::ValidationError(
                "worker_count must be greater than zero".to_string(),
            ));
        }
        if self.engine.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.engine.max_consecutive_failures == 0 {
            return Err(ConfigError::ValidationError(
                "max_consecutive_failures must be greater than zero".to_string(),
            ));
        }
        if self.engine.validator_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "validator_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.engine.default_monitor_interval_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "default_monitor_interval_minutes must be greater than zero".to_string(),
            ));
        }

        if self.validator.backend == ValidatorBackend::Http && self.validator.endpoint.is_none() {
            return Err(ConfigError::ValidationError(
                "validator backend 'http' requires an endpoint".to_string(),
            ));
        }

        for monitor in &self.monitors {
            if monitor.organization_id.trim().is_empty() || monitor.framework.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "declared monitors must have a non-empty organization_id and framework"
                        .to_string(),
                ));
            }
            if let Some(interval) = monitor.interval_minutes {
                if interval <= 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "declared monitor {}/{} has a non-positive interval",
                        monitor.organization_id, monitor.framework
                    )));
                }
            }
        }

        for rule in &self.alerts.rules {
            if rule.rule_name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "alert rules must have a non-empty rule_name".to_string(),
                ));
            }
            if rule.operator == Operator::Unknown {
                return Err(ConfigError::ValidationError(format!(
                    "alert rule '{}' uses an unknown operator",
                    rule.rule_name
                )));
            }
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.engine.tick_interval_seconds)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.engine.metrics_interval_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.engine.retry_base_delay_ms)
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.validator_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.worker_count, 4);
        assert_eq!(config.engine.max_consecutive_failures, 3);
        assert_eq!(config.validator.backend, ValidatorBackend::Static);
        assert_eq!(config.alerts.rules.len(), 1);
        assert_eq!(config.alerts.rules[0].rule_name, "low-compliance");
    }

    #[test]
    fn test_full_config_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [engine]
            tick_interval_seconds = 10
            metrics_interval_seconds = 30
            worker_count = 2
            queue_capacity = 16
            max_consecutive_failures = 5
            max_retry_attempts = 1
            retry_base_delay_ms = 250
            validator_timeout_seconds = 15
            default_monitor_interval_minutes = 30

            [storage]
            ledger_path = "/tmp/audit.jsonl"
            monitors_path = "/tmp/monitors.json"

            [validator]
            backend = "http"
            endpoint = "http://localhost:9000/validate"

            [publisher]
            webhook_url = "https://hooks.example.com/warden"

            [[monitors]]
            organization_id = "acme"
            framework = "NCA"
            interval_minutes = 15

            [[monitors]]
            organization_id = "globex"
            framework = "SAMA"

            [[alerts.rules]]
            rule_name = "low-compliance"
            metric = "compliance_percentage"
            operator = "<"
            threshold = 70.0
            severity = "critical"

            [[alerts.rules]]
            rule_name = "control-failures"
            metric = "failed_controls"
            operator = ">"
            threshold = 0.0
            severity = "warning"
            "#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.tick_interval_seconds, 10);
        assert_eq!(config.engine.worker_count, 2);
        assert_eq!(config.storage.ledger_path, PathBuf::from("/tmp/audit.jsonl"));
        assert_eq!(config.validator.backend, ValidatorBackend::Http);
        assert_eq!(
            config.validator.endpoint.as_deref(),
            Some("http://localhost:9000/validate")
        );
        assert_eq!(
            config.publisher.webhook_url.as_deref(),
            Some("https://hooks.example.com/warden")
        );
        assert_eq!(config.alerts.rules.len(), 2);
        assert_eq!(config.alerts.rules[1].severity, Severity::Warning);
        assert_eq!(config.monitors.len(), 2);
        assert_eq!(config.monitors[0].organization_id, "acme");
        assert_eq!(config.monitors[0].interval_minutes, Some(15));
        assert_eq!(config.monitors[1].interval_minutes, None);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [engine]
            worker_count = 8
            "#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.worker_count, 8);
        // Remaining fields and sections fall back to defaults
        assert_eq!(config.engine.tick_interval_seconds, 30);
        assert_eq!(config.storage.monitors_path, PathBuf::from("warden-monitors.json"));
        assert_eq!(config.alerts.rules.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[engine\nworker_count = 4");
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let mut config = Config::default();
        config.engine.tick_interval_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tick_interval_seconds"));
    }

    #[test]
    fn test_zero_workers_and_capacity_rejected() {
        let mut config = Config::default();
        config.engine.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let mut config = Config::default();
        config.validator.backend = ValidatorBackend::Http;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("endpoint"));

        config.validator.endpoint = Some("http://localhost:9000/validate".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_operator_rejected_with_rule_name() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [[alerts.rules]]
            rule_name = "odd-rule"
            metric = "compliance_percentage"
            operator = "~="
            threshold = 70.0
            severity = "critical"
            "#,
        );

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("odd-rule"));
    }

    #[test]
    fn test_unknown_metric_fails_to_parse() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [[alerts.rules]]
            rule_name = "bad-metric"
            metric = "nonexistent_metric"
            operator = "<"
            threshold = 1.0
            severity = "warning"
            "#,
        );

        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_empty_rule_name_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [[alerts.rules]]
            rule_name = "  "
            metric = "compliance_percentage"
            operator = "<"
            threshold = 70.0
            severity = "critical"
            "#,
        );

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("rule_name"));
    }

    #[test]
    fn test_declared_monitor_validation() {
        let mut config = Config::default();
        config.monitors.push(MonitorConfig {
            organization_id: "acme".to_string(),
            framework: "".to_string(),
            interval_minutes: None,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("organization_id and framework"));

        let mut config = Config::default();
        config.monitors.push(MonitorConfig {
            organization_id: "acme".to_string(),
            framework: "NCA".to_string(),
            interval_minutes: Some(0),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("acme/NCA"));
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.metrics_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_base_delay(), Duration::from_millis(500));
        assert_eq!(config.validator_timeout(), Duration::from_secs(30));
    }
}
