//! A typed event stream local to one [`crate::threading_service::ThreadingService`]
//! instance.
//!
//! Each component publishes its own events here instead of holding a direct
//! reference to any other component; the restart manager is the principal
//! subscriber, but nothing prevents a host application from subscribing too.
//! Subscriptions are explicit register/cancel pairs (`subscribe()` returns a
//! receiver; dropping it cancels the subscription).

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use serde_json::Value;

use crate::config_store::ConfigSource;
use crate::error_handler::ErrorRecord;
use crate::queue::DropReason;
use crate::resource_monitor::{AlertSeverity, MemorySample};
use crate::restart_manager::RestartAttempt;

/// Every observable event a `ThreadingService` instance can produce. Lifecycle
/// events are never silently swallowed: each maps to exactly one variant here.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    WorkerStarting,
    WorkerStarted { start_time: DateTime<Utc> },
    WorkerStopping,
    WorkerStopped { exit_reason: String },
    WorkerErrored { reason: String },

    HealthCheckFailed { consecutive_missed: u32 },
    WorkerUnhealthy { consecutive_missed: u32 },
    MemoryThresholdExceeded { sample: MemorySample, threshold_bytes: u64 },

    ResourceAlert { severity: AlertSeverity, metric: &'static str, value: u64, limit: u64 },
    ResourceTrend { increasing: bool },
    ResourceGrowthRateAlert { mb_per_min: f64 },
    GcRequested,
    AutoRestartTriggered { reason: String },

    RestartAttempted(RestartAttempt),
    RestartRefused { reason: String },
    CircuitOpened,
    CircuitHalfOpen,
    CircuitClosed,

    ErrorRecorded(ErrorRecord),
    Escalated { error_id: u64, message: String },

    ConfigValidationFailed { section: String, errors: Vec<String> },
    ConfigSectionChanged { section: String, source: ConfigSource, old: Value, new: Value },
    ConfigUpdated { section: String, old: Value, new: Value },

    MessageDropped { reason: DropReason },

    /// Unsolicited worker status heartbeat, emitted on a fixed interval; never
    /// consumed by the health monitor's missed-check accounting.
    WorkerStatusUpdate { sample: MemorySample },
}

/// Owns the broadcast channel for one `ThreadingService` instance.
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of current subscribers it reached;
    /// `0` is not an error (an event bus with nobody listening is normal).
    pub fn publish(&self, event: SupervisorEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Register a new subscription. Dropping the receiver cancels it.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
