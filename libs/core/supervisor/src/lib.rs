//! Core worker-supervision primitives: message correlation, priority
//! queueing, process lifecycle, health and resource monitoring, restart
//! policy with a circuit breaker, error classification, a layered
//! configuration store, and the pool/service facades built on top of them.
//!
//! Nothing in this crate spawns a real process directly — that lives behind
//! the [`transport::WorkerTransport`] trait, implemented for production by
//! `worker-runtime`'s caller via [`transport::ProcessTransport`] and for
//! tests by `transport::MockTransport`.

pub mod config_store;
pub mod error;
pub mod error_handler;
pub mod event_bus;
pub mod health_monitor;
pub mod message_handler;
pub mod queue;
pub mod resource_monitor;
pub mod restart_manager;
pub mod thread_manager;
pub mod threading_service;
pub mod transport;
pub mod worker_pool;

pub use config_store::{ConfigChange, ConfigSource, ConfigStore};
pub use error::{SupervisorError, SupervisorResult};
pub use error_handler::{ErrorCategory, ErrorHandler, ErrorHandlerConfig, ErrorRecord, RecoveryStrategy, Severity};
pub use event_bus::{EventBus, SupervisorEvent};
pub use health_monitor::{HealthMonitor, HealthMonitorConfig, HealthOutcome};
pub use message_handler::{retry_backoff, MessageHandler, MessageHandlerStats};
pub use queue::{DropReason, PriorityQueue, QueueConfig, QueuedMessage};
pub use resource_monitor::{AlertSeverity, MemorySample, MonitorOutcome, ResourceMonitor, ResourceMonitorConfig};
pub use restart_manager::{CircuitState, RestartAttempt, RestartManager, RestartPolicy, RestartRefusal};
pub use thread_manager::{ThreadManager, ThreadManagerConfig, WorkerState};
pub use threading_service::{ServiceStatus, ThreadingService, ThreadingServiceConfig};
pub use transport::{ProcessTransport, WorkerTransport};
pub use worker_pool::{LoadBalanceStrategy, PoolStats, ScalingDecision, WorkerPool, WorkerPoolConfig, WorkerRecord, WorkerStatus};

pub use supervisor_protocol::{decode, decode_line, encode, encode_line, Envelope, EnvelopeKind, Priority, ProtocolError};
