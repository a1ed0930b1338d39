//! Composes the message handler, queue, thread manager, health monitor,
//! resource monitor, restart manager, error handler, and config store into
//! one worker's supervising facade, publishing everything onto its own
//! [`EventBus`].
//!
//! There is no process-wide singleton: every `ThreadingService` owns its own
//! event bus and config store, so multiple workers in the same process never
//! cross-talk.

use std::time::Duration;

use serde_json::{json, Value};
use supervisor_protocol::Envelope;

use crate::config_store::{ConfigSource, ConfigStore, ValidationOutcome};
use crate::error::{SupervisorError, SupervisorResult};
use crate::error_handler::{ErrorHandler, ErrorHandlerConfig, ErrorRecord, RecoveryStrategy};
use crate::event_bus::{EventBus, SupervisorEvent};
use crate::health_monitor::{HealthMonitor, HealthMonitorConfig};
use crate::message_handler::{retry_backoff, MessageHandler};
use crate::queue::{PriorityQueue, QueueConfig};
use crate::resource_monitor::{MemorySample, ResourceMonitor, ResourceMonitorConfig};
use crate::restart_manager::{CircuitState, RestartManager, RestartPolicy};
use crate::thread_manager::{ThreadManager, ThreadManagerConfig, WorkerState};
use crate::transport::WorkerTransport;

#[derive(Debug, Clone)]
pub struct ThreadingServiceConfig {
    pub queue: QueueConfig,
    pub thread_manager: ThreadManagerConfig,
    pub health_monitor: HealthMonitorConfig,
    pub resource_monitor: ResourceMonitorConfig,
    pub restart_policy: RestartPolicy,
    pub error_handler: ErrorHandlerConfig,
    pub event_bus_capacity: usize,
    pub default_timeout: Duration,
}

impl Default for ThreadingServiceConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            thread_manager: ThreadManagerConfig::default(),
            health_monitor: HealthMonitorConfig::default(),
            resource_monitor: ResourceMonitorConfig::default(),
            restart_policy: RestartPolicy::default(),
            error_handler: ErrorHandlerConfig::default(),
            event_bus_capacity: 256,
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// A point-in-time snapshot of everything an operator dashboard would want.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub worker_state: WorkerState,
    pub circuit_state: CircuitState,
    pub queue_size: usize,
    pub pending_requests: usize,
    pub consecutive_missed_health_checks: u32,
    pub is_healthy: bool,
    pub restart_attempts: u32,
    pub latest_memory_sample: Option<MemorySample>,
    pub error_total: u64,
}

pub struct ThreadingService<T: WorkerTransport> {
    config: ThreadingServiceConfig,
    message_handler: MessageHandler,
    queue: PriorityQueue,
    thread_manager: ThreadManager<T>,
    health_monitor: HealthMonitor,
    resource_monitor: ResourceMonitor,
    restart_manager: RestartManager,
    error_handler: ErrorHandler,
    config_store: ConfigStore,
    events: EventBus,
}

impl<T: WorkerTransport> ThreadingService<T> {
    pub fn new(config: ThreadingServiceConfig) -> Self {
        let events = EventBus::new(config.event_bus_capacity);
        let mut config_store = ConfigStore::new();
        register_default_sections(&mut config_store);
        Self {
            message_handler: MessageHandler::new(),
            queue: PriorityQueue::new(config.queue.clone()),
            thread_manager: ThreadManager::new(config.thread_manager.clone()),
            health_monitor: HealthMonitor::new(config.health_monitor.clone()),
            resource_monitor: ResourceMonitor::new(config.resource_monitor.clone()),
            restart_manager: RestartManager::new(config.restart_policy.clone()),
            error_handler: ErrorHandler::new(config.error_handler.clone()),
            config_store,
            events,
            config,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config_store(&mut self) -> &mut ConfigStore {
        &mut self.config_store
    }

    /// Replace a config section wholesale, publishing the matching event:
    /// `ConfigValidationFailed` on a blocking validation error, or
    /// `ConfigSectionChanged` + `ConfigUpdated` on success, and routing the
    /// accepted value down to the section's live component.
    pub async fn update_config(&mut self, section: &str, value: Value, source: ConfigSource) -> Result<Vec<String>, Vec<String>> {
        let old = self.config_store.get(section).cloned().unwrap_or(Value::Null);
        match self.config_store.set(section, value.clone(), source) {
            Ok(warnings) => {
                self.apply_section_to_components(section, &value).await;
                self.events.publish(SupervisorEvent::ConfigSectionChanged {
                    section: section.to_string(),
                    source,
                    old: old.clone(),
                    new: value.clone(),
                });
                self.events.publish(SupervisorEvent::ConfigUpdated { section: section.to_string(), old, new: value });
                Ok(warnings)
            }
            Err(errors) => {
                self.events.publish(SupervisorEvent::ConfigValidationFailed { section: section.to_string(), errors: errors.clone() });
                Err(errors)
            }
        }
    }

    /// Deep-merge a patch into a config section, publishing events and
    /// routing to the live component the same way [`Self::update_config`]
    /// does.
    pub async fn merge_config(&mut self, section: &str, patch: Value, source: ConfigSource) -> Result<Vec<String>, Vec<String>> {
        let old = self.config_store.get(section).cloned().unwrap_or(Value::Null);
        match self.config_store.merge(section, patch, source) {
            Ok(warnings) => {
                let new = self.config_store.get(section).cloned().unwrap_or(Value::Null);
                self.apply_section_to_components(section, &new).await;
                self.events.publish(SupervisorEvent::ConfigSectionChanged {
                    section: section.to_string(),
                    source,
                    old: old.clone(),
                    new: new.clone(),
                });
                self.events.publish(SupervisorEvent::ConfigUpdated { section: section.to_string(), old, new });
                Ok(warnings)
            }
            Err(errors) => {
                self.events.publish(SupervisorEvent::ConfigValidationFailed { section: section.to_string(), errors: errors.clone() });
                Err(errors)
            }
        }
    }

    /// Route an accepted config-section value down to the live component(s)
    /// it actually governs. `thread_manager`'s fields have no single live
    /// counterpart of their own; they instead tune the restart manager, the
    /// health monitor, and this service's own request timeout.
    async fn apply_section_to_components(&mut self, section: &str, value: &Value) {
        match section {
            "thread_manager" => {
                if let Some(ms) = value.get("message_timeout_ms").and_then(Value::as_u64) {
                    self.config.default_timeout = Duration::from_millis(ms);
                }
                if let Some(ms) = value.get("health_check_interval_ms").and_then(Value::as_u64) {
                    self.health_monitor.config_mut().check_interval = Duration::from_millis(ms);
                }
                if let Some(n) = value.get("max_restart_attempts").and_then(Value::as_u64) {
                    self.restart_manager.policy_mut().max_attempts = n as u32;
                }
                if let Some(ms) = value.get("restart_delay_ms").and_then(Value::as_u64) {
                    self.restart_manager.policy_mut().base_backoff_ms = ms;
                }
            }
            "health_monitor" => {
                if let Some(ms) = value.get("interval_ms").and_then(Value::as_u64) {
                    self.health_monitor.config_mut().check_interval = Duration::from_millis(ms);
                }
                if let Some(ms) = value.get("timeout_ms").and_then(Value::as_u64) {
                    self.health_monitor.config_mut().check_timeout = Duration::from_millis(ms);
                }
                if let Some(n) = value.get("max_missed_checks").and_then(Value::as_u64) {
                    self.health_monitor.config_mut().unhealthy_after_missed = n as u32;
                }
                if let Some(mb) = value.get("memory_threshold_mb").and_then(Value::as_u64) {
                    self.resource_monitor.config_mut().critical_threshold_bytes = mb * 1024 * 1024;
                }
            }
            "restart_manager" => {
                let policy = self.restart_manager.policy_mut();
                if let Some(n) = value.get("max_restart_attempts").and_then(Value::as_u64) {
                    policy.max_attempts = n as u32;
                }
                if let Some(ms) = value.get("initial_delay_ms").and_then(Value::as_u64) {
                    policy.base_backoff_ms = ms;
                }
                if let Some(ms) = value.get("max_delay_ms").and_then(Value::as_u64) {
                    policy.max_backoff_ms = ms;
                }
                if let Some(m) = value.get("backoff_multiplier").and_then(Value::as_f64) {
                    policy.backoff_multiplier = m;
                }
                if let Some(ms) = value.get("reset_counter_after_ms").and_then(Value::as_u64) {
                    policy.reset_counter_after_ms = ms;
                }
                if let Some(b) = value.get("enable_circuit_breaker").and_then(Value::as_bool) {
                    policy.enable_circuit_breaker = b;
                }
                if let Some(n) = value.get("breaker_threshold").and_then(Value::as_u64) {
                    policy.failure_threshold = n as u32;
                }
                if let Some(ms) = value.get("breaker_reset_ms").and_then(Value::as_u64) {
                    policy.open_state_cooldown = Duration::from_millis(ms);
                }
            }
            "error_handler" => {
                self.error_handler.apply_config_patch(value);
            }
            "message_queue" => {
                let queue_config = self.queue.config_mut();
                if let Some(n) = value.get("max_size").and_then(Value::as_u64) {
                    queue_config.max_size = n as usize;
                }
                if let Some(arr) = value.get("max_size_per_priority").and_then(Value::as_array) {
                    for (i, v) in arr.iter().enumerate().take(4) {
                        if let Some(n) = v.as_u64() {
                            queue_config.max_size_per_priority[i] = n as usize;
                        }
                    }
                }
                if let Some(b) = value.get("enable_backpressure").and_then(Value::as_bool) {
                    queue_config.enable_backpressure = b;
                }
                if let Some(f) = value.get("backpressure_threshold").and_then(Value::as_f64) {
                    queue_config.backpressure_threshold = f;
                }
                if let Some(ms) = value.get("processing_delay_ms").and_then(Value::as_u64) {
                    queue_config.processing_delay_ms = ms;
                }
                if let Some(n) = value.get("batch_size").and_then(Value::as_u64) {
                    queue_config.batch_size = n as usize;
                }
                if let Some(b) = value.get("enable_batching").and_then(Value::as_bool) {
                    queue_config.enable_batching = b;
                }
            }
            "worker" => {
                if let Some(mb) = value.get("max_memory_mb").and_then(Value::as_u64) {
                    self.resource_monitor.config_mut().critical_threshold_bytes = mb * 1024 * 1024;
                }
                if let Some(ms) = value.get("gc_interval_ms").and_then(Value::as_u64) {
                    self.resource_monitor.config_mut().gc_interval = Duration::from_millis(ms);
                }
                // `module_config` (and `log_level`) are opaque to the core; forward
                // the whole section to the worker best-effort, ignoring the case
                // where no worker is currently running to receive it.
                let envelope = self.message_handler.prepare_fire_and_forget(Envelope::request(
                    supervisor_protocol::EnvelopeKind::Config,
                    Some(value.clone()),
                ));
                let _ = self.thread_manager.send(&envelope).await;
            }
            _ => {}
        }
    }

    pub fn error_handler(&mut self) -> &mut ErrorHandler {
        &mut self.error_handler
    }

    pub async fn start(&mut self, transport: T) -> SupervisorResult<()> {
        self.events.publish(SupervisorEvent::WorkerStarting);
        match self.thread_manager.start(transport).await {
            Ok(()) => {
                self.health_monitor.reset();
                self.events.publish(SupervisorEvent::WorkerStarted { start_time: chrono::Utc::now() });
                Ok(())
            }
            Err(e) => {
                let record = self.error_handler.record(e.to_string());
                self.events.publish(SupervisorEvent::ErrorRecorded(record.clone()));
                self.events.publish(SupervisorEvent::WorkerErrored { reason: e.to_string() });
                self.apply_strategy(record, None).await;
                Err(e)
            }
        }
    }

    pub async fn stop(&mut self) -> SupervisorResult<()> {
        self.events.publish(SupervisorEvent::WorkerStopping);
        let result = self.thread_manager.stop().await;
        self.message_handler.clear();
        self.queue.clear();
        self.events.publish(SupervisorEvent::WorkerStopped { exit_reason: "requested".to_string() });
        result
    }

    /// Enqueue a request-response envelope; returns a future resolving to the
    /// worker's reply once the queue drains it and the transport round-trips.
    pub fn enqueue(&mut self, envelope: Envelope) -> SupervisorResult<()> {
        self.queue.enqueue(envelope).map_err(|reason| {
            self.events.publish(SupervisorEvent::MessageDropped { reason });
            SupervisorError::QueueFull
        })
    }

    /// Drain and dispatch the next queued envelope over the transport,
    /// returning a receiver for its eventual response.
    pub async fn dispatch_next(&mut self) -> SupervisorResult<Option<tokio::sync::oneshot::Receiver<Envelope>>> {
        let Some(queued) = self.queue.dequeue() else {
            return Ok(None);
        };
        let (stamped, rx) = self.message_handler.prepare_send(queued.envelope);
        self.thread_manager.send(&stamped).await?;
        Ok(Some(rx))
    }

    /// Pump one incoming envelope from the transport into the message
    /// handler's correlation table. An envelope that matches no pending
    /// request (the worker's periodic status heartbeat, chiefly) is routed
    /// to [`Self::handle_unsolicited`] instead of being dropped.
    pub async fn pump_incoming(&mut self) {
        if let Some(envelope) = self.thread_manager.recv().await {
            if let Some(unsolicited) = self.message_handler.on_incoming(envelope) {
                self.handle_unsolicited(unsolicited).await;
            }
        }
    }

    /// Handle an envelope the worker sent without a matching request. Only a
    /// `status` carries a memory sample worth recording; per §9's resolved
    /// Open Question, this path never touches `consecutive_missed_checks` —
    /// that counter only moves in response to the health monitor's own ping.
    async fn handle_unsolicited(&mut self, envelope: Envelope) {
        if envelope.kind == supervisor_protocol::EnvelopeKind::Status {
            if let Some(sample) = parse_memory_sample(envelope.payload) {
                self.events.publish(SupervisorEvent::WorkerStatusUpdate { sample });
                self.record_memory_sample(sample).await;
            }
        }
    }

    /// Sweep timed-out requests, retrying those with retries remaining and
    /// surfacing a timeout error for the rest.
    pub async fn sweep_timeouts(&mut self) {
        let expired = self.message_handler.sweep_timed_out(self.config.default_timeout);
        for envelope in expired {
            let record = self.error_handler.record(format!("request {} timed out", envelope.id));
            self.events.publish(SupervisorEvent::ErrorRecorded(record.clone()));
            self.apply_strategy(record, Some(envelope)).await;
        }
    }

    /// Carry out the recovery strategy the error handler selected for
    /// `record`. `Ignore` is a deliberate no-op (the error is already logged
    /// in `self.error_handler`'s history). `Retry` re-sends `envelope` (the
    /// original request that timed out, when one is available) after the
    /// category's configured backoff, bounded by `max_recovery_attempts`; the
    /// caller that was waiting on the original send has already had its
    /// future dropped by `sweep_timed_out`, so this is a fire-and-forget
    /// supervisor-driven resend rather than a resolution of that caller.
    async fn apply_strategy(&mut self, record: ErrorRecord, envelope: Option<Envelope>) {
        match record.strategy {
            RecoveryStrategy::Ignore => {}
            RecoveryStrategy::Retry => {
                if let Some(envelope) = envelope {
                    self.retry_envelope(record.category, envelope).await;
                }
            }
            RecoveryStrategy::Restart => {
                self.try_auto_restart(&record.message).await;
            }
            RecoveryStrategy::CircuitBreaker => {
                self.restart_manager.force_open();
                self.events.publish(SupervisorEvent::CircuitOpened);
            }
            RecoveryStrategy::Escalate => {
                self.events.publish(SupervisorEvent::Escalated { error_id: record.id, message: record.message.clone() });
            }
        }
    }

    /// Resend `original` after its category's configured retry delay, so
    /// long as it hasn't already exhausted `max_recovery_attempts` for that
    /// category. The resend is best-effort: a worker that isn't running
    /// simply drops it, same as any other fire-and-forget send.
    async fn retry_envelope(&mut self, category: crate::error_handler::ErrorCategory, original: Envelope) {
        let attempt = original.retry_count + 1;
        if attempt > self.error_handler.max_recovery_attempts(category) {
            return;
        }
        let delay = self.error_handler.retry_delay(category, attempt);
        tokio::time::sleep(delay).await;
        let retry = original.as_retry();
        let (stamped, rx) = self.message_handler.prepare_send(retry);
        if self.thread_manager.send(&stamped).await.is_ok() {
            drop(rx);
        }
    }

    /// Run one ping/pong health check cycle.
    pub async fn check_health(&mut self) -> SupervisorResult<()> {
        let ping = Envelope::request(supervisor_protocol::EnvelopeKind::Ping, None);
        let (stamped, rx) = self.message_handler.prepare_send(ping);
        self.thread_manager.send(&stamped).await?;

        match tokio::time::timeout(self.health_monitor.config().check_timeout, self.await_ping_response(rx)).await {
            Ok(Some(response)) => {
                self.health_monitor.record_success();
                if let Some(sample) = parse_memory_sample(response.payload) {
                    self.record_memory_sample(sample).await;
                }
                Ok(())
            }
            _ => {
                let outcome = self.health_monitor.record_failure();
                self.events.publish(SupervisorEvent::HealthCheckFailed { consecutive_missed: outcome.consecutive_missed });
                if outcome.became_unhealthy {
                    self.events.publish(SupervisorEvent::WorkerUnhealthy { consecutive_missed: outcome.consecutive_missed });
                    self.try_auto_restart("consecutive health checks missed").await;
                }
                Err(SupervisorError::Timeout { attempts: outcome.consecutive_missed })
            }
        }
    }

    /// Pump the transport until the ping's own reply resolves `rx`, routing
    /// any unsolicited envelope encountered along the way through
    /// [`Self::handle_unsolicited`] exactly like [`Self::pump_incoming`]
    /// would. Without this, a worker's `status` heartbeat landing between the
    /// ping and its `pong` would otherwise starve the health check.
    async fn await_ping_response(&mut self, mut rx: tokio::sync::oneshot::Receiver<Envelope>) -> Option<Envelope> {
        loop {
            tokio::select! {
                biased;
                resp = &mut rx => return resp.ok(),
                incoming = self.thread_manager.recv() => {
                    match incoming {
                        Some(envelope) => {
                            if let Some(unsolicited) = self.message_handler.on_incoming(envelope) {
                                self.handle_unsolicited(unsolicited).await;
                            }
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    /// Record a worker-reported memory sample and react to threshold/trend
    /// outcomes.
    pub async fn record_memory_sample(&mut self, sample: MemorySample) {
        let outcome = self.resource_monitor.record(sample);
        if let Some((severity, value, limit)) = outcome.alert {
            self.events.publish(SupervisorEvent::ResourceAlert { severity, metric: "rss_bytes", value, limit });
        }
        if let Some((severity, value, limit)) = outcome.heap_alert {
            self.events.publish(SupervisorEvent::ResourceAlert { severity, metric: "heap_used_bytes", value, limit });
        }
        if let Some(increasing) = outcome.trend_increasing {
            self.events.publish(SupervisorEvent::ResourceTrend { increasing });
        }
        if let Some(mb_per_min) = outcome.growth_rate_mb_per_min {
            self.events.publish(SupervisorEvent::ResourceGrowthRateAlert { mb_per_min });
        }
        if outcome.exceeded_restart_threshold {
            self.events.publish(SupervisorEvent::MemoryThresholdExceeded {
                sample,
                threshold_bytes: self.resource_monitor.config().critical_threshold_bytes,
            });
            self.try_auto_restart("memory threshold exceeded").await;
        }
        if self.resource_monitor.should_request_gc(std::time::Instant::now()) {
            self.events.publish(SupervisorEvent::GcRequested);
        }
    }

    async fn try_auto_restart(&mut self, reason: &str) {
        self.events.publish(SupervisorEvent::AutoRestartTriggered { reason: reason.to_string() });
        match self.restart_manager.request_restart(reason) {
            Ok(attempt) => {
                self.events.publish(SupervisorEvent::RestartAttempted(attempt.clone()));
                tokio::time::sleep(attempt.backoff).await;
                self.thread_manager.mark_errored(reason);
            }
            Err(refusal) => {
                self.events.publish(SupervisorEvent::RestartRefused { reason: format!("{refusal:?}") });
            }
        }
        match self.restart_manager.state() {
            CircuitState::Open => self.events.publish(SupervisorEvent::CircuitOpened),
            CircuitState::HalfOpen => self.events.publish(SupervisorEvent::CircuitHalfOpen),
            CircuitState::Closed => self.events.publish(SupervisorEvent::CircuitClosed),
        };
    }

    /// Report the outcome of a restart that was actually carried out by the
    /// caller (who owns constructing the replacement transport).
    pub fn report_restart_outcome(&mut self, succeeded: bool) {
        self.restart_manager.report_outcome(succeeded);
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        retry_backoff(attempt)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            worker_state: self.thread_manager.state(),
            circuit_state: self.restart_manager.state(),
            queue_size: self.queue.total_size(),
            pending_requests: self.message_handler.pending_count(),
            consecutive_missed_health_checks: self.health_monitor.consecutive_missed_checks(),
            is_healthy: self.health_monitor.is_healthy(),
            restart_attempts: self.restart_manager.attempt_count(),
            latest_memory_sample: self.resource_monitor.latest().copied(),
            error_total: self.error_handler.stats().total,
        }
    }
}

/// A `status` or `pong` payload deserializes straight into a [`MemorySample`]
/// when the worker included one; anything else (missing payload, malformed
/// shape) is treated as "no sample this round" rather than an error.
fn parse_memory_sample(payload: Option<Value>) -> Option<MemorySample> {
    payload.and_then(|v| serde_json::from_value(v).ok())
}

/// Register the six config sections every worker's supervising facade
/// exposes for live reconfiguration, each with its own literal validator.
fn register_default_sections(store: &mut ConfigStore) {
    store.register_section(
        "thread_manager",
        json!({
            "max_restart_attempts": 5,
            "restart_delay_ms": 1000,
            "health_check_interval_ms": 10_000,
            "message_timeout_ms": 10_000,
        }),
        Some(validate_thread_manager),
    );
    store.register_section(
        "health_monitor",
        json!({
            "interval_ms": 10_000,
            "timeout_ms": 3_000,
            "max_missed_checks": 3,
            "enable_memory_monitoring": true,
            "memory_threshold_mb": 768,
        }),
        Some(validate_health_monitor),
    );
    store.register_section(
        "restart_manager",
        json!({
            "max_restart_attempts": 5,
            "initial_delay_ms": 1000,
            "max_delay_ms": 30_000,
            "backoff_multiplier": 2.0,
            "reset_counter_after_ms": 60_000,
            "enable_circuit_breaker": true,
            "breaker_threshold": 3,
            "breaker_reset_ms": 30_000,
        }),
        Some(validate_restart_manager),
    );
    store.register_section(
        "error_handler",
        json!({
            "max_error_history": 200,
            "reporting_interval_ms": 60_000,
            "enable_aggregation": true,
            "aggregation_window_ms": 60_000,
            "retry_delays": {},
            "max_recovery_attempts": {},
            "severity_thresholds": {},
        }),
        Some(validate_error_handler),
    );
    store.register_section(
        "message_queue",
        json!({
            "max_size": 1_000,
            "max_size_per_priority": [1_000, 1_000, 1_000, 1_000],
            "enable_backpressure": true,
            "backpressure_threshold": 0.8,
            "processing_delay_ms": 0,
            "batch_size": 10,
            "enable_batching": false,
        }),
        Some(validate_message_queue),
    );
    store.register_section(
        "worker",
        json!({
            "max_memory_mb": 768,
            "gc_interval_ms": 300_000,
            "log_level": "info",
            "module_config": {},
        }),
        Some(validate_worker),
    );
}

fn validate_thread_manager(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(n) = value.get("max_restart_attempts").and_then(Value::as_u64) {
        if n < 1 {
            outcome.errors.push("max_restart_attempts must be at least 1".to_string());
        }
    }
    if let Some(ms) = value.get("message_timeout_ms").and_then(Value::as_u64) {
        if ms < 100 {
            outcome.errors.push("message_timeout_ms must be at least 100 ms".to_string());
        }
    }
    outcome
}

fn validate_health_monitor(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(ms) = value.get("timeout_ms").and_then(Value::as_u64) {
        if ms < 100 {
            outcome.errors.push("healthCheckTimeout must be at least 100 ms".to_string());
        }
    }
    if let Some(n) = value.get("max_missed_checks").and_then(Value::as_u64) {
        if n < 1 {
            outcome.errors.push("max_missed_checks must be at least 1".to_string());
        }
    }
    outcome
}

fn validate_restart_manager(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(attempts) = value.get("max_restart_attempts").and_then(Value::as_u64) {
        if attempts < 1 {
            outcome.errors.push("max_restart_attempts must be at least 1".to_string());
        }
    }
    if let Some(m) = value.get("backoff_multiplier").and_then(Value::as_f64) {
        if m < 1.0 {
            outcome.errors.push("backoff_multiplier must be at least 1.0".to_string());
        }
    }
    outcome
}

fn validate_error_handler(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(n) = value.get("max_error_history").and_then(Value::as_u64) {
        if n == 0 {
            outcome.errors.push("max_error_history must be at least 1".to_string());
        }
    }
    outcome
}

fn validate_message_queue(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(n) = value.get("max_size").and_then(Value::as_u64) {
        if n == 0 {
            outcome.errors.push("max_size must be at least 1".to_string());
        }
    }
    if let Some(f) = value.get("backpressure_threshold").and_then(Value::as_f64) {
        if !(0.0..=1.0).contains(&f) {
            outcome.errors.push("backpressure_threshold must be between 0 and 1".to_string());
        }
    }
    outcome
}

fn validate_worker(value: &Value) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(mb) = value.get("max_memory_mb").and_then(Value::as_u64) {
        if mb < 64 {
            outcome.warnings.push("max_memory_mb below 64 MiB is unusually low".to_string());
        }
    }
    outcome
}
