//! Error classification, severity scoring, and recovery-strategy selection,
//! grounded on the same category/severity split used for upstream-call
//! failures elsewhere in this codebase, generalized here to worker failures.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    WorkerStartup,
    WorkerRuntime,
    Communication,
    Memory,
    Timeout,
    Configuration,
    ExternalService,
    Unknown,
}

/// Every category, for seeding the per-kind config tables.
const ALL_CATEGORIES: [ErrorCategory; 8] = [
    ErrorCategory::WorkerStartup,
    ErrorCategory::WorkerRuntime,
    ErrorCategory::Communication,
    ErrorCategory::Memory,
    ErrorCategory::Timeout,
    ErrorCategory::Configuration,
    ErrorCategory::ExternalService,
    ErrorCategory::Unknown,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Ignore,
    Retry,
    Restart,
    /// Force the restart circuit breaker open instead of attempting a
    /// restart — reserved for kinds whose severity has been configured high
    /// enough that restarting immediately would likely just reproduce the
    /// failure.
    CircuitBreaker,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: u64,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub strategy: RecoveryStrategy,
    pub at: DateTime<Utc>,
}

/// `severity_thresholds`/`retry_delays`/`max_recovery_attempts` are the
/// per-kind tables §4.8 calls out as configurable; [`default_category_severity`]
/// and [`default_retry_schedule`] only seed their starting values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlerConfig {
    pub max_error_history: usize,
    /// Consecutive Fatal/High errors at or above this count forces escalation
    /// regardless of the per-category default strategy.
    pub escalation_threshold: u32,
    pub reporting_interval_ms: u64,
    pub enable_aggregation: bool,
    pub aggregation_window_ms: u64,
    pub severity_thresholds: HashMap<ErrorCategory, Severity>,
    pub retry_delays: HashMap<ErrorCategory, Vec<u64>>,
    pub max_recovery_attempts: HashMap<ErrorCategory, u32>,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        let severity_thresholds = ALL_CATEGORIES.into_iter().map(|c| (c, default_category_severity(c))).collect();
        let retry_delays = ALL_CATEGORIES.into_iter().map(|c| (c, default_retry_schedule(c))).collect();
        let max_recovery_attempts = ALL_CATEGORIES.into_iter().map(|c| (c, default_max_recovery_attempts(c))).collect();
        Self {
            max_error_history: 200,
            escalation_threshold: 5,
            reporting_interval_ms: 60_000,
            enable_aggregation: true,
            aggregation_window_ms: 60_000,
            severity_thresholds,
            retry_delays,
            max_recovery_attempts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub by_severity: HashMap<Severity, u64>,
    /// Events per minute over the trailing `aggregation_window_ms`.
    pub error_rate_per_minute: f64,
    pub most_common_kind: Option<ErrorCategory>,
}

fn default_category_severity(category: ErrorCategory) -> Severity {
    match category {
        ErrorCategory::WorkerStartup => Severity::High,
        ErrorCategory::WorkerRuntime => Severity::High,
        ErrorCategory::Communication => Severity::Medium,
        ErrorCategory::Memory => Severity::High,
        ErrorCategory::Timeout => Severity::Medium,
        ErrorCategory::Configuration => Severity::Medium,
        ErrorCategory::ExternalService => Severity::Medium,
        ErrorCategory::Unknown => Severity::Low,
    }
}

/// Default exponential-ish backoff schedule (ms) for categories whose
/// default strategy is `retry`; unused by categories that default elsewhere
/// but still present so an operator can opt a kind into retry via config.
fn default_retry_schedule(_category: ErrorCategory) -> Vec<u64> {
    vec![1000, 2000, 4000]
}

fn default_max_recovery_attempts(category: ErrorCategory) -> u32 {
    match category {
        ErrorCategory::Communication | ErrorCategory::Timeout | ErrorCategory::ExternalService => 3,
        _ => 0,
    }
}

/// `memory/high → restart_worker` and `configuration/any → escalate` are
/// fixed by name; `communication`/`external_service` promoted to `high` (via
/// `severity_thresholds`) open the circuit instead of retrying, since a
/// severity bump past `medium` signals the transient-failure assumption
/// behind `retry` no longer holds.
fn default_strategy(category: ErrorCategory, severity: Severity) -> RecoveryStrategy {
    if severity == Severity::Fatal {
        return RecoveryStrategy::Escalate;
    }
    match (category, severity) {
        (ErrorCategory::Communication, Severity::High) | (ErrorCategory::ExternalService, Severity::High) => RecoveryStrategy::CircuitBreaker,
        (ErrorCategory::Communication, _) | (ErrorCategory::Timeout, _) | (ErrorCategory::ExternalService, _) => RecoveryStrategy::Retry,
        (ErrorCategory::WorkerStartup, _) | (ErrorCategory::WorkerRuntime, _) | (ErrorCategory::Memory, _) => RecoveryStrategy::Restart,
        (ErrorCategory::Configuration, _) => RecoveryStrategy::Escalate,
        (ErrorCategory::Unknown, _) => RecoveryStrategy::Ignore,
    }
}

fn parse_category(s: &str) -> Option<ErrorCategory> {
    serde_json::from_value(Value::String(s.to_string())).ok()
}

fn parse_severity(s: &str) -> Option<Severity> {
    serde_json::from_value(Value::String(s.to_string())).ok()
}

/// Classifies worker/channel failures, scores their severity, decides a
/// recovery strategy, and keeps a bounded history plus running stats.
///
/// `clear_history()` and `reset_stats()` are deliberately separate: clearing
/// the ring of recent [`ErrorRecord`]s (e.g. after an operator review) does
/// not also zero the lifetime counters used for dashboards, and vice versa.
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    next_id: u64,
    history: VecDeque<ErrorRecord>,
    stats: ErrorStats,
    consecutive_severe: u32,
    /// Timestamps of recent errors, pruned to `aggregation_window_ms`, used
    /// to compute `ErrorStats::error_rate_per_minute`.
    recent_at: VecDeque<DateTime<Utc>>,
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            history: VecDeque::new(),
            stats: ErrorStats::default(),
            consecutive_severe: 0,
            recent_at: VecDeque::new(),
        }
    }

    pub fn classify(&self, message: &str) -> ErrorCategory {
        let lower = message.to_ascii_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCategory::Timeout
        } else if lower.contains("connection") || lower.contains("broken pipe") || lower.contains("channel closed") {
            ErrorCategory::Communication
        } else if lower.contains("failed to spawn") || lower.contains("failed to start") || lower.contains("executable not found") {
            ErrorCategory::WorkerStartup
        } else if lower.contains("panic")
            || lower.contains("crash")
            || lower.contains("exited")
            || lower.contains("malformed")
            || lower.contains("decode")
            || lower.contains("unknown kind")
            || lower.contains("invalid")
            || lower.contains("validation")
        {
            ErrorCategory::WorkerRuntime
        } else if lower.contains("out of memory") || lower.contains("oom") || lower.contains("memory") {
            ErrorCategory::Memory
        } else if lower.contains("config") {
            ErrorCategory::Configuration
        } else if lower.contains("upstream") || lower.contains("dns") || lower.contains("service unavailable") || lower.contains("network unreachable") {
            ErrorCategory::ExternalService
        } else {
            ErrorCategory::Unknown
        }
    }

    /// Record and classify a new failure, returning the resulting
    /// [`ErrorRecord`] and the recovery strategy the caller should apply.
    pub fn record(&mut self, message: impl Into<String>) -> ErrorRecord {
        let message = message.into();
        let category = self.classify(&message);
        let mut severity = self.config.severity_thresholds.get(&category).copied().unwrap_or_else(|| default_category_severity(category));

        if severity >= Severity::High {
            self.consecutive_severe += 1;
        } else {
            self.consecutive_severe = 0;
        }
        if self.consecutive_severe >= self.config.escalation_threshold {
            severity = Severity::Fatal;
        }

        let strategy = default_strategy(category, severity);

        let at = Utc::now();
        let record = ErrorRecord { id: self.next_id, category, severity, message, strategy, at };
        self.next_id += 1;

        if self.history.len() >= self.config.max_error_history {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());

        self.stats.total += 1;
        *self.stats.by_category.entry(category).or_insert(0) += 1;
        *self.stats.by_severity.entry(severity).or_insert(0) += 1;
        self.recompute_aggregates(at);

        record
    }

    fn recompute_aggregates(&mut self, now: DateTime<Utc>) {
        if self.config.enable_aggregation {
            self.recent_at.push_back(now);
            let cutoff = now - chrono::Duration::milliseconds(self.config.aggregation_window_ms as i64);
            while self.recent_at.front().is_some_and(|t| *t < cutoff) {
                self.recent_at.pop_front();
            }
            let window_minutes = (self.config.aggregation_window_ms as f64 / 60_000.0).max(1.0 / 60.0);
            self.stats.error_rate_per_minute = self.recent_at.len() as f64 / window_minutes;
        } else {
            self.recent_at.clear();
            self.stats.error_rate_per_minute = 0.0;
        }
        self.stats.most_common_kind = self.stats.by_category.iter().max_by_key(|(_, &count)| count).map(|(category, _)| *category);
    }

    /// Apply a partial JSON patch to the live per-kind tables and the scalar
    /// fields, the way [`crate::threading_service::ThreadingService::update_config`]
    /// routes an accepted `error_handler` section update down here.
    pub fn apply_config_patch(&mut self, value: &Value) {
        if let Some(n) = value.get("max_error_history").and_then(Value::as_u64) {
            self.config.max_error_history = n as usize;
        }
        if let Some(ms) = value.get("reporting_interval_ms").and_then(Value::as_u64) {
            self.config.reporting_interval_ms = ms;
        }
        if let Some(b) = value.get("enable_aggregation").and_then(Value::as_bool) {
            self.config.enable_aggregation = b;
        }
        if let Some(ms) = value.get("aggregation_window_ms").and_then(Value::as_u64) {
            self.config.aggregation_window_ms = ms;
        }
        if let Some(table) = value.get("severity_thresholds").and_then(Value::as_object) {
            for (kind, v) in table {
                if let (Some(category), Some(severity)) = (parse_category(kind), v.as_str().and_then(parse_severity)) {
                    self.config.severity_thresholds.insert(category, severity);
                }
            }
        }
        if let Some(table) = value.get("retry_delays").and_then(Value::as_object) {
            for (kind, v) in table {
                if let (Some(category), Some(arr)) = (parse_category(kind), v.as_array()) {
                    self.config.retry_delays.insert(category, arr.iter().filter_map(Value::as_u64).collect());
                }
            }
        }
        if let Some(table) = value.get("max_recovery_attempts").and_then(Value::as_object) {
            for (kind, v) in table {
                if let (Some(category), Some(n)) = (parse_category(kind), v.as_u64()) {
                    self.config.max_recovery_attempts.insert(category, n as u32);
                }
            }
        }
    }

    /// The delay before retry attempt `attempt` (1-indexed) of `category`,
    /// from its configured `retry_delays` schedule; holds at the schedule's
    /// last entry once `attempt` runs past it.
    pub fn retry_delay(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let schedule = self.config.retry_delays.get(&category).map(Vec::as_slice).unwrap_or(&[]);
        if schedule.is_empty() {
            return Duration::from_millis(1000);
        }
        let idx = (attempt.saturating_sub(1) as usize).min(schedule.len() - 1);
        Duration::from_millis(schedule[idx])
    }

    pub fn max_recovery_attempts(&self, category: ErrorCategory) -> u32 {
        self.config.max_recovery_attempts.get(&category).copied().unwrap_or(0)
    }

    pub fn history(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.history.iter()
    }

    pub fn stats(&self) -> &ErrorStats {
        &self.stats
    }

    /// Drops the recent-errors ring without touching the lifetime [`ErrorStats`].
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn reset_stats(&mut self) {
        self.stats = ErrorStats::default();
        self.consecutive_severe = 0;
        self.recent_at.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_message_content() {
        let handler = ErrorHandler::new(ErrorHandlerConfig::default());
        assert_eq!(handler.classify("request timed out after 3 attempts"), ErrorCategory::Timeout);
        assert_eq!(handler.classify("worker process exited unexpectedly"), ErrorCategory::WorkerRuntime);
        assert_eq!(handler.classify("out of memory while allocating buffer"), ErrorCategory::Memory);
        assert_eq!(handler.classify("malformed envelope: missing id"), ErrorCategory::WorkerRuntime);
        assert_eq!(handler.classify("failed to spawn worker process"), ErrorCategory::WorkerStartup);
    }

    #[test]
    fn crash_defaults_to_restart_strategy() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        let record = handler.record("worker process crashed");
        assert_eq!(record.strategy, RecoveryStrategy::Restart);
    }

    #[test]
    fn memory_pressure_defaults_to_restart_strategy() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        let record = handler.record("worker exceeded memory threshold");
        assert_eq!(record.category, ErrorCategory::Memory);
        assert_eq!(record.strategy, RecoveryStrategy::Restart);
    }

    #[test]
    fn raising_a_kinds_severity_via_config_changes_its_strategy() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        handler.apply_config_patch(&serde_json::json!({"severity_thresholds": {"communication": "high"}}));
        let record = handler.record("connection reset by peer");
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.strategy, RecoveryStrategy::CircuitBreaker);
    }

    #[test]
    fn repeated_severe_errors_escalate_to_fatal() {
        let mut config = ErrorHandlerConfig::default();
        config.escalation_threshold = 2;
        let mut handler = ErrorHandler::new(config);
        handler.record("worker crashed");
        let record = handler.record("worker crashed again");
        assert_eq!(record.severity, Severity::Fatal);
        assert_eq!(record.strategy, RecoveryStrategy::Escalate);
    }

    #[test]
    fn clear_history_preserves_stats() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        handler.record("timeout waiting for pong");
        handler.clear_history();
        assert_eq!(handler.history().count(), 0);
        assert_eq!(handler.stats().total, 1);
    }

    #[test]
    fn reset_stats_preserves_history() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        handler.record("timeout waiting for pong");
        handler.reset_stats();
        assert_eq!(handler.stats().total, 0);
        assert_eq!(handler.history().count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut config = ErrorHandlerConfig::default();
        config.max_error_history = 2;
        let mut handler = ErrorHandler::new(config);
        handler.record("a");
        handler.record("b");
        handler.record("c");
        assert_eq!(handler.history().count(), 2);
    }

    #[test]
    fn stats_track_error_rate_and_most_common_kind() {
        let mut handler = ErrorHandler::new(ErrorHandlerConfig::default());
        handler.record("worker crashed");
        handler.record("worker crashed again");
        handler.record("request timed out");
        let stats = handler.stats();
        assert_eq!(stats.most_common_kind, Some(ErrorCategory::WorkerRuntime));
        assert!(stats.error_rate_per_minute > 0.0);
    }

    #[test]
    fn retry_delay_holds_at_the_schedules_last_entry() {
        let handler = ErrorHandler::new(ErrorHandlerConfig::default());
        let last = handler.retry_delay(ErrorCategory::Timeout, 3);
        assert_eq!(handler.retry_delay(ErrorCategory::Timeout, 9), last);
    }
}
