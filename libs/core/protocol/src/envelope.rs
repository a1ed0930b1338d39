//! The message exchanged between supervisor and worker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Priority of a queued or in-flight envelope. Ordered `Low < Normal < High < Critical`
/// so a plain `Ord` comparison picks the higher-priority sub-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// All priorities, highest first — the order sub-queues are drained in.
    pub const ALL_HIGH_TO_LOW: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The tagged set of request and response kinds. `Status` and `Data` are shared
/// between the request and response directions: the same variant is used
/// whichever way the envelope travels.
///
/// This is deliberately one exhaustive enum, not a string: adding a new kind
/// must be a compile error everywhere a `match` dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    // Request-only
    Start,
    Stop,
    Config,
    Data,
    Ping,
    Gc,
    Cleanup,
    // Response-only
    Success,
    Error,
    Pong,
    Ready,
    // Shared
    Status,
}

impl EnvelopeKind {
    /// Whether this kind is ever sent by the supervisor as a request.
    pub fn is_request_kind(self) -> bool {
        !matches!(self, EnvelopeKind::Success | EnvelopeKind::Error | EnvelopeKind::Pong | EnvelopeKind::Ready)
    }

    /// Whether this kind is ever sent by the worker as a response.
    pub fn is_response_kind(self) -> bool {
        !matches!(
            self,
            EnvelopeKind::Start | EnvelopeKind::Stop | EnvelopeKind::Config | EnvelopeKind::Ping | EnvelopeKind::Gc | EnvelopeKind::Cleanup
        )
    }
}

/// Generates envelope ids that are unique within one supervisor process:
/// `{monotonic counter}@{pid}|{random suffix}`.
pub struct IdGenerator {
    counter: AtomicU64,
    pid: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(0), pid: std::process::id() }
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::rng().sample_iter(&Alphanumeric).take(6).map(char::from).collect();
        format!("{n}@{}|{suffix}", self.pid)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A message exchanged between supervisor and worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    /// Stamped by the encoder on every outgoing envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Build a bare request envelope; `id` is left empty for the caller
    /// (typically `MessageHandler::send`) to assign.
    pub fn request(kind: EnvelopeKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: String::new(),
            correlation_id: None,
            kind,
            payload,
            priority: Priority::default(),
            timeout_ms: None,
            max_retries: 0,
            retry_count: 0,
            enqueued_at: None,
            sent_at: None,
            received_at: None,
            timestamp: None,
        }
    }

    /// Build a response envelope correlated to `request_id`.
    pub fn response(request_id: impl Into<String>, kind: EnvelopeKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: request_id.into(),
            correlation_id: None,
            kind,
            payload,
            priority: Priority::default(),
            timeout_ms: None,
            max_retries: 0,
            retry_count: 0,
            enqueued_at: None,
            sent_at: None,
            received_at: None,
            timestamp: None,
        }
    }

    /// True if `kind` is a failure response (`error`).
    pub fn is_error(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Error)
    }

    /// Builds a retry of this envelope: same `correlation_id` (defaulting to
    /// the original `id` if none was set), a fresh id assigned by the caller,
    /// and an incremented `retry_count`. The original `id` is never reused —
    /// callers track the group via `correlation_id`.
    pub fn as_retry(&self) -> Self {
        let mut retry = self.clone();
        retry.correlation_id = Some(self.correlation_id.clone().unwrap_or_else(|| self.id.clone()));
        retry.retry_count += 1;
        retry.sent_at = None;
        retry.received_at = None;
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_low_to_critical() {
        let mut ps = vec![Priority::Normal, Priority::Critical, Priority::Low, Priority::High];
        ps.sort();
        assert_eq!(ps, vec![Priority::Low, Priority::Normal, Priority::High, Priority::Critical]);
    }

    #[test]
    fn id_generator_produces_unique_monotonic_ids() {
        let gen = IdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert!(a.starts_with("0@"));
        assert!(b.starts_with("1@"));
    }

    #[test]
    fn kind_direction_classification() {
        assert!(EnvelopeKind::Start.is_request_kind());
        assert!(!EnvelopeKind::Start.is_response_kind());
        assert!(EnvelopeKind::Pong.is_response_kind());
        assert!(!EnvelopeKind::Pong.is_request_kind());
        assert!(EnvelopeKind::Status.is_request_kind());
        assert!(EnvelopeKind::Status.is_response_kind());
    }

    #[test]
    fn as_retry_keeps_correlation_and_bumps_retry_count() {
        let mut env = Envelope::request(EnvelopeKind::Data, None);
        env.id = "7@1|abcdef".to_string();
        let retry = env.as_retry();
        assert_eq!(retry.correlation_id.as_deref(), Some("7@1|abcdef"));
        assert_eq!(retry.retry_count, 1);
    }
}
