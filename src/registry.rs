//! Monitor registry and validation scheduling
//!
//! A monitor is one (organization, framework) pair under continuous
//! compliance watch. The registry owns every monitor's schedule state and is
//! the engine's only shared mutable structure: callers wrap it in
//! `Arc<Mutex<...>>` and all mutation goes through its methods.
//!
//! Scheduling is pull-based: `tick` scans for due monitors and advances each
//! one's `next_validation_at` before the task is handed out, so a monitor is
//! enqueued at most once per interval no matter how slow processing is or
//! how often the scheduler polls.

use crate::error::RegistryError;
use crate::events::{Timestamp, TriggerKind, ValidationTask};
use chrono::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle state of a monitor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// Scheduled for periodic validation
    Active,
    /// Manually stopped; retained but never ticked
    Paused,
    /// Excluded from scheduling after repeated consecutive failures
    Failed,
}

/// One (organization, framework) pair under continuous monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    /// Unique identifier, "mon-" followed by a v4 UUID
    pub id: String,
    /// Organization being monitored
    pub organization_id: String,
    /// Regulatory framework validated on each run
    pub framework: String,
    /// Minutes between scheduled validations
    pub interval_minutes: i64,
    /// Current lifecycle state
    pub status: MonitorStatus,
    /// When the next validation is due
    pub next_validation_at: Timestamp,
    /// When the last successful validation finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validation_at: Option<Timestamp>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When the monitor was first registered
    pub created_at: Timestamp,
}

impl Monitor {
    pub fn new(
        organization_id: impl Into<String>,
        framework: impl Into<String>,
        interval_minutes: i64,
        now: Timestamp,
    ) -> Self {
        Self {
            id: format!("mon-{}", Uuid::new_v4()),
            organization_id: organization_id.into(),
            framework: framework.into(),
            interval_minutes,
            status: MonitorStatus::Active,
            next_validation_at: now,
            last_validation_at: None,
            consecutive_failures: 0,
            created_at: now,
        }
    }
}

/// Registry of all monitors, persisted as a JSON file
///
/// The registry itself is not synchronized; the engine shares it as
/// `Arc<Mutex<MonitorRegistry>>` so that `tick` and the CLI-facing
/// start/stop operations serialize against each other.
#[derive(Debug)]
pub struct MonitorRegistry {
    path: PathBuf,
    monitors: HashMap<(String, String), Monitor>,
    max_consecutive_failures: u32,
}

impl MonitorRegistry {
    /// Load the registry from `path`, starting empty if the file is missing
    ///
    /// A present but unreadable file is an error: silently dropping the
    /// monitor set would stop compliance coverage without anyone noticing.
    pub fn load(
        path: impl AsRef<Path>,
        max_consecutive_failures: u32,
    ) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut monitors = HashMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let loaded: Vec<Monitor> = serde_json::from_str(&content)?;
            for monitor in loaded {
                let key = (monitor.organization_id.clone(), monitor.framework.clone());
                monitors.insert(key, monitor);
            }
            debug!("Loaded {} monitors from {}", monitors.len(), path.display());
        }

        Ok(Self {
            path,
            monitors,
            max_consecutive_failures,
        })
    }

    /// Persist the current monitor set to the registry file
    pub fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut monitors: Vec<&Monitor> = self.monitors.values().collect();
        monitors.sort_by(|a, b| {
            (&a.organization_id, &a.framework).cmp(&(&b.organization_id, &b.framework))
        });
        let json = serde_json::to_string_pretty(&monitors)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Register a monitor, or resume one that was paused or failed
    ///
    /// Idempotent: calling this for an already active monitor changes
    /// nothing. Resuming resets the failure count and schedules the next
    /// validation immediately.
    ///
    /// # Arguments
    ///
    /// * `organization_id` - Organization to monitor
    /// * `framework` - Framework to validate against
    /// * `interval_minutes` - Minutes between scheduled validations
    /// * `now` - Current time, used as the first due time
    pub fn start_monitoring(
        &mut self,
        organization_id: &str,
        framework: &str,
        interval_minutes: i64,
        now: Timestamp,
    ) -> &Monitor {
        let key = (organization_id.to_string(), framework.to_string());
        match self.monitors.entry(key) {
            Entry::Occupied(entry) => {
                let monitor = entry.into_mut();
                if monitor.status == MonitorStatus::Active {
                    debug!(
                        "Monitor for {}/{} is already active",
                        organization_id, framework
                    );
                } else {
                    info!(
                        "Resuming monitor for {}/{} (previous status {:?})",
                        organization_id, framework, monitor.status
                    );
                    monitor.status = MonitorStatus::Active;
                    monitor.consecutive_failures = 0;
                    monitor.interval_minutes = interval_minutes;
                    monitor.next_validation_at = now;
                }
                monitor
            }
            Entry::Vacant(entry) => {
                info!(
                    "Registered monitor for {}/{} every {} minutes",
                    organization_id, framework, interval_minutes
                );
                entry.insert(Monitor::new(organization_id, framework, interval_minutes, now))
            }
        }
    }

    /// Pause a monitor, keeping its history
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownMonitor` when no monitor exists for
    /// the key.
    pub fn stop_monitoring(
        &mut self,
        organization_id: &str,
        framework: &str,
    ) -> Result<&Monitor, RegistryError> {
        let key = (organization_id.to_string(), framework.to_string());
        match self.monitors.get_mut(&key) {
            Some(monitor) => {
                info!("Paused monitor for {}/{}", organization_id, framework);
                monitor.status = MonitorStatus::Paused;
                Ok(monitor)
            }
            None => Err(RegistryError::UnknownMonitor(format!(
                "{}/{}",
                organization_id, framework
            ))),
        }
    }

    /// Collect one validation task per due monitor
    ///
    /// Each due monitor's `next_validation_at` is advanced by its interval
    /// before the task is returned, so a second tick at the same instant
    /// finds nothing due. Tasks come back sorted by key for a stable
    /// enqueue order.
    pub fn tick(&mut self, now: Timestamp) -> Vec<ValidationTask> {
        let mut tasks = Vec::new();
        for monitor in self.monitors.values_mut() {
            if monitor.status != MonitorStatus::Active {
                continue;
            }
            if monitor.next_validation_at <= now {
                monitor.next_validation_at = now + Duration::minutes(monitor.interval_minutes);
                tasks.push(ValidationTask::new(
                    &monitor.id,
                    &monitor.organization_id,
                    &monitor.framework,
                    TriggerKind::Scheduled,
                ));
            }
        }
        tasks.sort_by(|a, b| {
            (&a.organization_id, &a.framework).cmp(&(&b.organization_id, &b.framework))
        });
        tasks
    }

    /// Record a successful validation, clearing the failure streak
    pub fn record_success(&mut self, organization_id: &str, framework: &str, now: Timestamp) {
        let key = (organization_id.to_string(), framework.to_string());
        match self.monitors.get_mut(&key) {
            Some(monitor) => {
                monitor.last_validation_at = Some(now);
                monitor.consecutive_failures = 0;
            }
            None => warn!(
                "Validation succeeded for unregistered monitor {}/{}",
                organization_id, framework
            ),
        }
    }

    /// Record a failed validation
    ///
    /// After the configured number of consecutive failures the monitor is
    /// marked failed and excluded from scheduling until it is resumed via
    /// `start_monitoring`. `last_validation_at` is left unchanged so the
    /// gap in successful coverage stays visible.
    pub fn record_failure(&mut self, organization_id: &str, framework: &str) {
        let key = (organization_id.to_string(), framework.to_string());
        match self.monitors.get_mut(&key) {
            Some(monitor) => {
                monitor.consecutive_failures += 1;
                if monitor.status == MonitorStatus::Active
                    && monitor.consecutive_failures >= self.max_consecutive_failures
                {
                    warn!(
                        "Monitor for {}/{} marked failed after {} consecutive failures",
                        organization_id, framework, monitor.consecutive_failures
                    );
                    monitor.status = MonitorStatus::Failed;
                }
            }
            None => warn!(
                "Validation failed for unregistered monitor {}/{}",
                organization_id, framework
            ),
        }
    }

    /// Look up a monitor by key
    pub fn get(&self, organization_id: &str, framework: &str) -> Option<&Monitor> {
        self.monitors
            .get(&(organization_id.to_string(), framework.to_string()))
    }

    /// Number of monitors in each lifecycle state: (active, paused, failed)
    pub fn monitor_counts(&self) -> (usize, usize, usize) {
        let mut active = 0;
        let mut paused = 0;
        let mut failed = 0;
        for monitor in self.monitors.values() {
            match monitor.status {
                MonitorStatus::Active => active += 1,
                MonitorStatus::Paused => paused += 1,
                MonitorStatus::Failed => failed += 1,
            }
        }
        (active, paused, failed)
    }

    /// Total number of registered monitors
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Whether the registry holds no monitors
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
