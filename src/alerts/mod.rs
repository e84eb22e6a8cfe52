/// Alert rules and lifecycle management
pub mod alert_manager;
pub mod rules;

pub use alert_manager::{Alert, AlertManager};
pub use rules::{AlertRule, Operator, RuleMetric};
