//! The supervisor-wide result type and the structured failures `send()`,
//! `start()`, and `restart()` can surface.

use thiserror::Error;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("worker is not running")]
    WorkerNotRunning,

    #[error("queue is full")]
    QueueFull,

    #[error("dropped under backpressure")]
    BackpressureDropped,

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("maximum restart attempts exceeded")]
    MaxAttemptsExceeded,

    #[error("encoding error: {0}")]
    EncodingError(#[from] supervisor_protocol::ProtocolError),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("handshake timed out waiting for `ready`")]
    HandshakeTimeout,

    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<String>),

    #[error("worker channel I/O error: {0}")]
    Io(String),

    #[error("configuration store corrupted: {0}")]
    ConfigCorrupted(String),
}

impl From<std::io::Error> for SupervisorError {
    fn from(e: std::io::Error) -> Self {
        SupervisorError::Io(e.to_string())
    }
}
