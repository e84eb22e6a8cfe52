//! Engine-wide metrics aggregation
//!
//! This module tracks the counters and gauges that describe how the engine
//! itself is doing: validation throughput, outstanding alerts, failed
//! monitors, and an aggregate health score. Metrics are rebuilt from live
//! state on restart and never persisted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;

use crate::events::Timestamp;

/// Point-in-time snapshot of the engine's counters and gauges
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Validations completed in the sliding window, scaled to one minute
    pub validations_per_minute: f64,
    /// Average validator call latency over recent samples, in milliseconds
    pub avg_validation_latency_ms: f64,
    /// Monitors currently in active status
    pub active_monitors: u64,
    /// Monitors parked after repeated failures
    pub failed_monitors: u64,
    /// Total control failures observed since start
    pub policy_violations: u64,
    /// Alerts raised and not yet resolved
    pub active_alerts: u64,
    /// Tasks dropped because the validation queue was full
    pub queue_overflows: u64,
    /// Validations that exhausted their retries
    pub failed_validations: u64,
    /// Aggregate health score (0-100)
    pub system_health: u8,
    /// Seconds since the aggregator was created
    pub uptime_seconds: u64,
    /// Resident memory of the process in megabytes
    pub memory_usage_mb: u64,
    /// When this snapshot was taken
    pub timestamp: Timestamp,
}

/// Health penalty per active alert and its cap
const ALERT_PENALTY: u64 = 5;
const ALERT_PENALTY_CAP: u64 = 40;
/// Health penalty per failed monitor and its cap
const MONITOR_PENALTY: u64 = 10;
const MONITOR_PENALTY_CAP: u64 = 40;

/// Shared metrics aggregator
///
/// Updated from worker threads, the scheduler loop, and the alert manager;
/// reads are eventually consistent across them.
#[derive(Debug)]
pub struct MetricsAggregator {
    /// Timestamps of recent completed validations (sliding window)
    validation_times: Mutex<VecDeque<Timestamp>>,
    /// Recent validator call latencies (last 100 samples)
    validation_latencies: Mutex<VecDeque<Duration>>,
    policy_violations: AtomicU64,
    active_alerts: AtomicU64,
    active_monitors: AtomicU64,
    failed_monitors: AtomicU64,
    queue_overflows: AtomicU64,
    failed_validations: AtomicU64,
    rate_window: Duration,
    max_latency_samples: usize,
    started_at: Instant,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an aggregator with the default 60 second rate window
    pub fn new() -> Self {
        Self::with_rate_window(Duration::from_secs(60))
    }

    pub fn with_rate_window(rate_window: Duration) -> Self {
        Self {
            validation_times: Mutex::new(VecDeque::new()),
            validation_latencies: Mutex::new(VecDeque::new()),
            policy_violations: AtomicU64::new(0),
            active_alerts: AtomicU64::new(0),
            active_monitors: AtomicU64::new(0),
            failed_monitors: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            failed_validations: AtomicU64::new(0),
            rate_window,
            max_latency_samples: 100,
            started_at: Instant::now(),
        }
    }

    /// Record one completed validation
    pub fn record_validation(&self) {
        self.record_validation_at(Utc::now());
    }

    /// Record a completed validation with an explicit timestamp
    ///
    /// Timestamps are expected in roughly chronological order; the window
    /// prune only walks from the oldest end.
    pub fn record_validation_at(&self, timestamp: Timestamp) {
        let mut times = self.validation_times.lock().unwrap();
        times.push_back(timestamp);
        Self::prune_window(&mut times, self.rate_window);
        debug!("Validation recorded, {} in window", times.len());
    }

    /// Record `n` policy violations observed in an assessment
    pub fn record_violation(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.policy_violations.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a validation that exhausted its retries
    pub fn record_failed_validation(&self) {
        self.failed_validations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task dropped on queue overflow
    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the latency of one validator call
    pub fn record_validation_latency(&self, duration: Duration) {
        let mut latencies = self.validation_latencies.lock().unwrap();
        latencies.push_back(duration);
        while latencies.len() > self.max_latency_samples {
            latencies.pop_front();
        }
    }

    /// An alert was raised and is now outstanding
    pub fn alert_raised(&self) {
        self.active_alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// An outstanding alert was resolved
    pub fn alert_resolved(&self) {
        let _ = self
            .active_alerts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Refresh the monitor gauges from the registry
    pub fn set_monitor_counts(&self, active: u64, failed: u64) {
        self.active_monitors.store(active, Ordering::Relaxed);
        self.failed_monitors.store(failed, Ordering::Relaxed);
    }

    fn prune_window(times: &mut VecDeque<Timestamp>, window: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(60));
        while let Some(front) = times.front() {
            if *front < cutoff {
                times.pop_front();
            } else {
                break;
            }
        }
    }

    fn validations_per_minute(&self) -> f64 {
        let mut times = self.validation_times.lock().unwrap();
        Self::prune_window(&mut times, self.rate_window);
        let window_secs = self.rate_window.as_secs_f64().max(1.0);
        times.len() as f64 * (60.0 / window_secs)
    }

    fn avg_validation_latency_ms(&self) -> f64 {
        let latencies = self.validation_latencies.lock().unwrap();
        if latencies.is_empty() {
            return 0.0;
        }
        let total_ms: f64 = latencies.iter().map(|l| l.as_millis() as f64).sum();
        total_ms / latencies.len() as f64
    }

    /// Health starts at 100 and loses a capped penalty per outstanding alert
    /// and per failed monitor. Caps keep one noisy tenant from zeroing the
    /// score, and the subtraction saturates so it can never go negative.
    fn system_health(active_alerts: u64, failed_monitors: u64) -> u8 {
        let alert_penalty = (active_alerts * ALERT_PENALTY).min(ALERT_PENALTY_CAP);
        let monitor_penalty = (failed_monitors * MONITOR_PENALTY).min(MONITOR_PENALTY_CAP);
        100u64.saturating_sub(alert_penalty + monitor_penalty) as u8
    }

    /// Take a snapshot of all counters and gauges
    pub fn snapshot(&self) -> EngineMetrics {
        let active_alerts = self.active_alerts.load(Ordering::Relaxed);
        let failed_monitors = self.failed_monitors.load(Ordering::Relaxed);

        EngineMetrics {
            validations_per_minute: self.validations_per_minute(),
            avg_validation_latency_ms: self.avg_validation_latency_ms(),
            active_monitors: self.active_monitors.load(Ordering::Relaxed),
            failed_monitors,
            policy_violations: self.policy_violations.load(Ordering::Relaxed),
            active_alerts,
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            failed_validations: self.failed_validations.load(Ordering::Relaxed),
            system_health: Self::system_health(active_alerts, failed_monitors),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage() / 1024 / 1024,
            timestamp: Utc::now(),
        }
    }

    /// Snapshot plus the periodic log line the metrics loop emits
    pub fn log_snapshot(&self) -> EngineMetrics {
        let metrics = self.snapshot();

        info!(
            "Engine metrics: health={}, validations/min={:.1}, active_monitors={}, failed_monitors={}, active_alerts={}, violations={}, memory={}MB",
            metrics.system_health,
            metrics.validations_per_minute,
            metrics.active_monitors,
            metrics.failed_monitors,
            metrics.active_alerts,
            metrics.policy_violations,
            metrics.memory_usage_mb
        );

        if metrics.system_health < 50 {
            warn!(
                "Degraded system health: {} (active_alerts={}, failed_monitors={})",
                metrics.system_health, metrics.active_alerts, metrics.failed_monitors
            );
        }

        if metrics.memory_usage_mb > 500 {
            warn!("High memory usage: {}MB", metrics.memory_usage_mb);
        }

        metrics
    }
}

/// Current resident memory of the process in bytes
fn get_memory_usage() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return kb * 1024;
                        }
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    {
        // getrusage reports peak rather than current usage, acceptable as a fallback
        unsafe {
            let mut usage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                #[cfg(target_os = "macos")]
                return usage.ru_maxrss as u64;

                #[cfg(not(target_os = "macos"))]
                return (usage.ru_maxrss * 1024) as u64;
            }
        }
    }

    0
}

/// Measures one validator call and records its latency when finished
pub struct ValidationTimer {
    start_time: Instant,
    aggregator: Arc<MetricsAggregator>,
}

impl ValidationTimer {
    pub fn start(aggregator: Arc<MetricsAggregator>) -> Self {
        Self {
            start_time: Instant::now(),
            aggregator,
        }
    }

    pub fn finish(self) {
        let duration = self.start_time.elapsed();
        self.aggregator.record_validation_latency(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_initial_snapshot_is_healthy() {
        let metrics = MetricsAggregator::new().snapshot();
        assert_eq!(metrics.system_health, 100);
        assert_eq!(metrics.validations_per_minute, 0.0);
        assert_eq!(metrics.policy_violations, 0);
        assert_eq!(metrics.active_alerts, 0);
        assert_eq!(metrics.queue_overflows, 0);
    }

    #[test]
    fn test_validation_rate_counts_window_only() {
        let aggregator = MetricsAggregator::new();

        // Outside the 60s window, must be pruned
        aggregator.record_validation_at(Utc::now() - ChronoDuration::seconds(120));
        aggregator.record_validation();
        aggregator.record_validation();

        let metrics = aggregator.snapshot();
        assert_eq!(metrics.validations_per_minute, 2.0);
    }

    #[test]
    fn test_validation_rate_scales_to_one_minute() {
        let aggregator = MetricsAggregator::with_rate_window(Duration::from_secs(30));
        aggregator.record_validation();
        let metrics = aggregator.snapshot();
        assert_eq!(metrics.validations_per_minute, 2.0);
    }

    #[test]
    fn test_health_penalties() {
        let aggregator = MetricsAggregator::new();

        aggregator.alert_raised();
        aggregator.alert_raised();
        assert_eq!(aggregator.snapshot().system_health, 90);

        aggregator.set_monitor_counts(5, 1);
        assert_eq!(aggregator.snapshot().system_health, 80);
    }

    #[test]
    fn test_health_penalties_are_capped() {
        let aggregator = MetricsAggregator::new();

        for _ in 0..50 {
            aggregator.alert_raised();
        }
        // 50 alerts would be 250 points uncapped
        assert_eq!(aggregator.snapshot().system_health, 60);

        aggregator.set_monitor_counts(0, 20);
        // Both penalties at their caps
        assert_eq!(aggregator.snapshot().system_health, 20);
    }

    #[test]
    fn test_alert_gauge_round_trip() {
        let aggregator = MetricsAggregator::new();

        aggregator.alert_raised();
        aggregator.alert_raised();
        aggregator.alert_resolved();
        assert_eq!(aggregator.snapshot().active_alerts, 1);

        aggregator.alert_resolved();
        aggregator.alert_resolved(); // extra resolve saturates at zero
        assert_eq!(aggregator.snapshot().active_alerts, 0);
        assert_eq!(aggregator.snapshot().system_health, 100);
    }

    #[test]
    fn test_violations_accumulate() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_violation(3);
        aggregator.record_violation(0);
        aggregator.record_violation(2);
        assert_eq!(aggregator.snapshot().policy_violations, 5);
    }

    #[test]
    fn test_latency_average() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_validation_latency(Duration::from_millis(100));
        aggregator.record_validation_latency(Duration::from_millis(300));
        let metrics = aggregator.snapshot();
        assert!((metrics.avg_validation_latency_ms - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_latency_sample_limit() {
        let aggregator = MetricsAggregator::new();
        for i in 0..150 {
            aggregator.record_validation_latency(Duration::from_millis(i));
        }
        let latencies = aggregator.validation_latencies.lock().unwrap();
        assert_eq!(latencies.len(), aggregator.max_latency_samples);
    }

    #[test]
    fn test_validation_timer() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let timer = ValidationTimer::start(Arc::clone(&aggregator));
        std::thread::sleep(Duration::from_millis(10));
        timer.finish();

        let metrics = aggregator.snapshot();
        assert!(metrics.avg_validation_latency_ms >= 10.0);
    }

    #[test]
    fn test_memory_usage_collection() {
        // Might legitimately be 0 on exotic platforms; just must not panic
        let _ = MetricsAggregator::new().snapshot().memory_usage_mb;
    }
}
