//! Validation worker pool
//!
//! Tasks are routed to workers by hashing the (organization, framework)
//! pair, so tasks for the same pair always land on the same worker and run
//! in submission order. Each worker owns a bounded queue; when a queue is
//! full new tasks are dropped and recorded rather than blocking the
//! scheduler. Workers call the validator under a timeout and retry
//! transient failures with exponential backoff before giving up. On
//! shutdown the validation in flight finishes; queued tasks that have not
//! started are dropped and logged.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{
    self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError,
};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};

use crate::alerts::AlertManager;
use crate::error::ValidationError;
use crate::events::{
    AuditEvent, EngineEvent, EngineEventKind, EventType, Severity, ValidationTask,
};
use crate::ledger::AuditLedger;
use crate::metrics::{MetricsAggregator, ValidationTimer};
use crate::publisher::EventPublisher;
use crate::registry::MonitorRegistry;
use crate::validator::{SystemConfigProvider, Validator};

/// Shared state and collaborators the workers operate on
pub struct WorkerContext {
    /// Backend that executes compliance validations
    pub validator: Arc<dyn Validator>,
    /// Source of the system configuration sent with each validation
    pub config_provider: Arc<dyn SystemConfigProvider>,
    /// Registry updated with validation outcomes
    pub registry: Arc<Mutex<MonitorRegistry>>,
    /// Ledger that records completed checks and failures
    pub ledger: Arc<AuditLedger>,
    /// Alert manager evaluated after every successful validation
    pub alert_manager: Arc<AlertManager>,
    /// Publisher notified of validation outcomes
    pub publisher: Arc<EventPublisher>,
    /// Aggregator tracking throughput, latency and failures
    pub metrics: Arc<MetricsAggregator>,
    /// Timeout applied to each validator call
    pub validation_timeout: Duration,
    /// Retries allowed after the initial attempt
    pub max_retry_attempts: u32,
    /// Delay before the first retry, doubled for each further retry
    pub retry_base_delay: Duration,
}

/// Pool of validation worker threads with bounded per-worker queues
pub struct WorkerPool {
    senders: Vec<SyncSender<ValidationTask>>,
    shutdown_senders: Vec<Sender<()>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    context: Arc<WorkerContext>,
}

impl WorkerPool {
    /// Start `workers` worker threads, each with a queue of `queue_capacity`
    pub fn new(workers: usize, queue_capacity: usize, context: WorkerContext) -> Self {
        let workers = workers.max(1);
        let context = Arc::new(context);
        let mut senders = Vec::with_capacity(workers);
        let mut shutdown_senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (sender, receiver) = mpsc::sync_channel(queue_capacity);
            let (shutdown_sender, shutdown_receiver) = mpsc::channel();
            let worker_context = Arc::clone(&context);
            let handle = std::thread::spawn(move || {
                Self::worker_loop(worker_id, receiver, shutdown_receiver, worker_context);
            });
            senders.push(sender);
            shutdown_senders.push(shutdown_sender);
            handles.push(handle);
        }

        info!(
            "Validation worker pool started with {} workers, queue capacity {}",
            workers, queue_capacity
        );

        Self {
            senders,
            shutdown_senders,
            handles: Mutex::new(handles),
            context,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Worker index for an (organization, framework) pair
    ///
    /// Deterministic, so all tasks of one pair go through one queue.
    fn route(&self, organization_id: &str, framework: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        organization_id.hash(&mut hasher);
        framework.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Enqueue a validation task without blocking
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::QueueOverflow` if the responsible worker's
    /// queue is full. The dropped task is logged, counted and recorded in
    /// the audit ledger before this returns.
    pub fn try_enqueue(&self, task: ValidationTask) -> Result<(), ValidationError> {
        let index = self.route(&task.organization_id, &task.framework);
        match self.senders[index].try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.record_overflow(&task);
                Err(ValidationError::QueueOverflow)
            }
            Err(TrySendError::Disconnected(_)) => Err(ValidationError::Transient(
                "validation worker queue disconnected".to_string(),
            )),
        }
    }

    /// Stop all workers and wait for them
    ///
    /// The validation a worker is currently running finishes; queued tasks
    /// that have not started are dropped and logged. Calling this a second
    /// time is a no-op.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap();
        if handles.is_empty() {
            return;
        }

        info!("Shutting down validation worker pool");

        for sender in &self.shutdown_senders {
            if let Err(e) = sender.send(()) {
                error!("Failed to send shutdown signal to worker: {}", e);
            }
        }

        for handle in handles.drain(..) {
            if let Err(e) = handle.join() {
                error!("Worker thread failed to join: {:?}", e);
            }
        }

        info!("Validation worker pool stopped");
    }

    fn record_overflow(&self, task: &ValidationTask) {
        warn!(
            "Validation queue full, dropping task for {}/{}",
            task.organization_id, task.framework
        );

        self.context.metrics.record_queue_overflow();

        let event = AuditEvent::new(
            EventType::SystemChange,
            &task.organization_id,
            &task.framework,
            Severity::Warning,
            "queue_overflow",
            "Validation task dropped because the worker queue was full",
        )
        .with_metadata(
            "trigger",
            format!("{:?}", task.trigger_kind).to_lowercase(),
        );

        if let Err(e) = self.context.ledger.append(event) {
            error!("Failed to record queue overflow in audit ledger: {}", e);
        }

        self.context.publisher.publish(&EngineEvent::new(
            EngineEventKind::QueueOverflow,
            &task.organization_id,
            &task.framework,
            "Validation task dropped, worker queue full",
        ));
    }

    fn worker_loop(
        worker_id: usize,
        receiver: Receiver<ValidationTask>,
        shutdown_receiver: Receiver<()>,
        context: Arc<WorkerContext>,
    ) {
        info!("Validation worker {} started", worker_id);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create worker runtime");

        loop {
            // Shutdown takes priority over queued tasks
            match shutdown_receiver.try_recv() {
                Ok(()) => {
                    info!("Validation worker {} received shutdown signal", worker_id);
                    Self::drop_queued_tasks(worker_id, &receiver);
                    break;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    info!(
                        "Validation worker {} shutdown channel disconnected",
                        worker_id
                    );
                    break;
                }
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(task) => {
                    Self::process_task(&runtime, worker_id, &task, &context);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Timeout is expected, continue waiting for tasks
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Validation worker {} channel disconnected", worker_id);
                    break;
                }
            }
        }

        info!("Validation worker {} stopped", worker_id);
    }

    /// Drop tasks still queued when the worker is told to stop, logging each one
    fn drop_queued_tasks(worker_id: usize, receiver: &Receiver<ValidationTask>) {
        let mut dropped = 0usize;
        while let Ok(task) = receiver.try_recv() {
            info!(
                "Validation worker {} dropping queued task for {}/{} on shutdown",
                worker_id, task.organization_id, task.framework
            );
            dropped += 1;
        }
        if dropped > 0 {
            info!(
                "Validation worker {} dropped {} queued tasks on shutdown",
                worker_id, dropped
            );
        }
    }

    /// Run one task to completion, retrying transient failures
    fn process_task(
        runtime: &tokio::runtime::Runtime,
        worker_id: usize,
        task: &ValidationTask,
        context: &WorkerContext,
    ) {
        info!(
            "Worker {} validating {}/{} ({:?} trigger)",
            worker_id, task.organization_id, task.framework, task.trigger_kind
        );

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;

            let timer = ValidationTimer::start(Arc::clone(&context.metrics));
            let outcome = context
                .config_provider
                .system_config(&task.organization_id)
                .and_then(|system_config| {
                    runtime.block_on(async {
                        match tokio::time::timeout(
                            context.validation_timeout,
                            context.validator.assess(
                                &task.organization_id,
                                &task.framework,
                                &system_config,
                            ),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(ValidationError::Timeout),
                        }
                    })
                });
            timer.finish();

            match outcome {
                Ok(assessment) => break Ok(assessment),
                Err(e) if e.is_transient() && attempt <= context.max_retry_attempts => {
                    let delay = context.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Validation attempt {} for {}/{} failed: {}, retrying in {:?}",
                        attempt, task.organization_id, task.framework, e, delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(assessment) => Self::record_success(task, &assessment, context),
            Err(e) => Self::record_failure(task, &e, attempt, context),
        }
    }

    fn record_success(
        task: &ValidationTask,
        assessment: &crate::events::AssessmentResult,
        context: &WorkerContext,
    ) {
        let failed_controls = assessment.failed_controls();

        info!(
            "Validation completed for {}/{}: {:.1}% compliant, {} controls failed",
            task.organization_id, task.framework, assessment.compliance_percentage, failed_controls
        );

        let severity = if failed_controls > 0 {
            Severity::Warning
        } else {
            Severity::Info
        };

        let mut event = AuditEvent::new(
            EventType::ControlCheck,
            &task.organization_id,
            &task.framework,
            severity,
            "validation_completed",
            format!(
                "Compliance validation completed: {:.1}% compliant",
                assessment.compliance_percentage
            ),
        )
        .with_metadata(
            "compliance_percentage",
            format!("{:.1}", assessment.compliance_percentage),
        )
        .with_metadata("failed_controls", failed_controls.to_string())
        .with_metadata(
            "risk_level",
            format!("{:?}", assessment.risk_level).to_lowercase(),
        )
        .with_metadata(
            "trigger",
            format!("{:?}", task.trigger_kind).to_lowercase(),
        );

        match serde_json::to_value(assessment) {
            Ok(state) => event = event.with_after_state(state),
            Err(e) => warn!("Failed to serialize assessment for audit event: {}", e),
        }

        if let Err(e) = context.ledger.append(event) {
            error!(
                "Failed to record validation for {}/{} in audit ledger: {}",
                task.organization_id, task.framework, e
            );
        }

        context.metrics.record_validation();
        context.metrics.record_violation(failed_controls as u64);

        {
            let mut registry = context.registry.lock().unwrap();
            registry.record_success(&task.organization_id, &task.framework, Utc::now());
            let (active, _, failed) = registry.monitor_counts();
            context
                .metrics
                .set_monitor_counts(active as u64, failed as u64);
        }

        context.publisher.publish(
            &EngineEvent::new(
                EngineEventKind::ValidationCompleted,
                &task.organization_id,
                &task.framework,
                format!(
                    "Validation completed: {:.1}% compliant",
                    assessment.compliance_percentage
                ),
            )
            .with_detail(
                "compliance_percentage",
                format!("{:.1}", assessment.compliance_percentage),
            )
            .with_detail("failed_controls", failed_controls.to_string()),
        );

        context.alert_manager.evaluate(assessment);
    }

    fn record_failure(
        task: &ValidationTask,
        error: &ValidationError,
        attempts: u32,
        context: &WorkerContext,
    ) {
        error!(
            "Validation for {}/{} failed after {} attempts: {}",
            task.organization_id, task.framework, attempts, error
        );

        let event = AuditEvent::new(
            EventType::ValidationError,
            &task.organization_id,
            &task.framework,
            Severity::Warning,
            "validation_failed",
            format!(
                "Compliance validation failed after {} attempts: {}",
                attempts, error
            ),
        )
        .with_metadata("attempts", attempts.to_string())
        .with_metadata(
            "trigger",
            format!("{:?}", task.trigger_kind).to_lowercase(),
        );

        if let Err(e) = context.ledger.append(event) {
            error!(
                "Failed to record validation failure for {}/{} in audit ledger: {}",
                task.organization_id, task.framework, e
            );
        }

        context.metrics.record_failed_validation();

        {
            let mut registry = context.registry.lock().unwrap();
            registry.record_failure(&task.organization_id, &task.framework);
            let (active, _, failed) = registry.monitor_counts();
            context
                .metrics
                .set_monitor_counts(active as u64, failed as u64);
        }

        context.publisher.publish(
            &EngineEvent::new(
                EngineEventKind::ValidationFailed,
                &task.organization_id,
                &task.framework,
                format!("Validation failed: {}", error),
            )
            .with_detail("attempts", attempts.to_string()),
        );
    }
}
