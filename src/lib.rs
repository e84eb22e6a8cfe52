/// Error types for the compliance engine
pub mod error;

/// Core event types and enums
pub mod events;

/// Tamper-evident audit ledger
pub mod ledger;

/// Monitor registry and scheduling
pub mod registry;

/// Compliance validator backends
pub mod validator;

/// Validation worker pool
pub mod workers;

/// Alert rules and lifecycle management
pub mod alerts;

/// Engine metrics aggregation
pub mod metrics;

/// Event fan-out to subscribers
pub mod publisher;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{AlertError, ConfigError, LedgerError, RegistryError, ValidationError};
