use thiserror::Error;

/// Errors that can occur in the audit ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur while validating a monitor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Transient validation failure: {0}")]
    Transient(String),

    #[error("Validator call timed out")]
    Timeout,

    #[error("Invalid validator response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Validation queue is full")]
    QueueOverflow,
}

impl ValidationError {
    /// Whether retrying the same call could plausibly succeed
    ///
    /// Timeouts and transport failures are worth retrying; a response the
    /// engine cannot interpret will not improve on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ValidationError::Transient(_) | ValidationError::Timeout | ValidationError::HttpError(_)
        )
    }
}

/// Errors that can occur in the monitor registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No monitor registered for {0}")]
    UnknownMonitor(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur when delivering events to subscribers
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to deliver event: {0}")]
    DeliveryFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}
