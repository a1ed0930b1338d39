//! Restart policy and circuit breaker, grounded on the same closed/open/
//! half-open state machine used for upstream call protection elsewhere in
//! this codebase, adapted here to gate worker restarts instead of outbound
//! requests.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartAttempt {
    pub attempt_number: u32,
    pub at: DateTime<Utc>,
    pub backoff: Duration,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Consecutive-failure threshold that trips the circuit open.
    pub failure_threshold: u32,
    /// Sliding window used for the error-rate trip.
    pub error_rate_window: u32,
    pub error_rate_threshold: f64,
    pub open_state_cooldown: Duration,
    /// How long the worker must run fault-free, after a successful restart,
    /// before `attempt_count` resets to zero. A single success no longer
    /// wipes the counter immediately — a worker that crashes, restarts
    /// successfully, then crashes again seconds later should still count
    /// toward `max_attempts`/`failure_threshold`.
    pub reset_counter_after_ms: u64,
    /// When `false`, `report_outcome` never trips the circuit on its own —
    /// only [`RestartManager::force_open`] can open it. Lets an operator turn
    /// off the automatic consecutive-failure/error-rate trip while keeping
    /// the error handler's `circuit_breaker` recovery strategy effective.
    pub enable_circuit_breaker: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            failure_threshold: 3,
            error_rate_window: 10,
            error_rate_threshold: 0.5,
            open_state_cooldown: Duration::from_secs(30),
            reset_counter_after_ms: 60_000,
            enable_circuit_breaker: true,
        }
    }
}

/// Why a restart request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartRefusal {
    CircuitOpen,
    MaxAttemptsExceeded,
    /// A restart for this manager is already in flight; this request was
    /// coalesced into it rather than launching a second one.
    AlreadyInFlight,
}

/// Tracks restart attempts and the circuit breaker guarding them.
///
/// The circuit trips open either on `failure_threshold` consecutive restart
/// failures, or when the failure rate over the last `error_rate_window`
/// attempts exceeds `error_rate_threshold`; it half-opens after
/// `open_state_cooldown` to probe a single restart, closing again on that
/// probe's success and reopening immediately on its failure — the number of
/// restart attempts between `Open` and `Closed` is always at most one.
///
/// `in_flight` guards the single-restart-at-a-time invariant: a restart
/// request made while one is already outstanding is coalesced (refused, not
/// queued) rather than launching a second concurrent restart.
///
/// `attempt_count` is not zeroed the instant a restart succeeds: it only
/// resets once the worker has stayed fault-free for `reset_counter_after_ms`,
/// so a worker that flaps (restart succeeds, then fails again moments later)
/// keeps accumulating toward `max_attempts`/`failure_threshold` instead of
/// getting a fresh counter on every successful restart.
pub struct RestartManager {
    policy: RestartPolicy,
    state: CircuitState,
    attempt_count: u32,
    consecutive_failures: u32,
    in_flight: bool,
    outcomes: std::collections::VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Start of the current unbroken fault-free streak since the last
    /// successful restart; `None` while a fault is still "live" (no success
    /// reported yet, or a later failure interrupted the streak).
    stable_since: Option<Instant>,
    history: Vec<RestartAttempt>,
}

impl RestartManager {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Closed,
            attempt_count: 0,
            consecutive_failures: 0,
            in_flight: false,
            outcomes: std::collections::VecDeque::new(),
            opened_at: None,
            stable_since: None,
            history: Vec::new(),
        }
    }

    pub fn is_restart_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn policy_mut(&mut self) -> &mut RestartPolicy {
        &mut self.policy
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn history(&self) -> &[RestartAttempt] {
        &self.history
    }

    fn backoff_for(&self, attempt_number: u32) -> Duration {
        let ms = (self.policy.base_backoff_ms as f64) * self.policy.backoff_multiplier.powi(attempt_number.saturating_sub(1) as i32);
        Duration::from_millis((ms as u64).min(self.policy.max_backoff_ms))
    }

    /// Returns `None` when a circuit transitions from `Open` to `HalfOpen`
    /// purely due to cooldown elapsing, with no attempt made yet.
    fn maybe_half_open(&mut self) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.policy.open_state_cooldown {
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    /// Zero `attempt_count` once the worker has stayed fault-free for
    /// `reset_counter_after_ms` since its last successful restart.
    fn maybe_reset_counter(&mut self) {
        if let Some(stable_since) = self.stable_since {
            if stable_since.elapsed() >= Duration::from_millis(self.policy.reset_counter_after_ms) {
                self.attempt_count = 0;
            }
        }
    }

    /// Request permission to attempt a restart, returning the
    /// [`RestartAttempt`] to perform or the reason it was refused.
    pub fn request_restart(&mut self, reason: impl Into<String>) -> Result<RestartAttempt, RestartRefusal> {
        self.maybe_half_open();
        self.maybe_reset_counter();

        if self.in_flight {
            return Err(RestartRefusal::AlreadyInFlight);
        }
        if self.state == CircuitState::Open {
            return Err(RestartRefusal::CircuitOpen);
        }
        if self.attempt_count >= self.policy.max_attempts {
            return Err(RestartRefusal::MaxAttemptsExceeded);
        }

        self.attempt_count += 1;
        self.in_flight = true;
        let attempt = RestartAttempt {
            attempt_number: self.attempt_count,
            at: Utc::now(),
            backoff: self.backoff_for(self.attempt_count),
            reason: reason.into(),
        };
        self.history.push(attempt.clone());
        Ok(attempt)
    }

    /// Report the outcome of the most recent restart attempt, possibly
    /// tripping or closing the circuit. A `HalfOpen` probe closes the
    /// circuit on its first success and reopens immediately on failure —
    /// never more than one restart attempt happens between `Open` and
    /// `Closed`.
    pub fn report_outcome(&mut self, succeeded: bool) {
        self.in_flight = false;
        self.outcomes.push_back(succeeded);
        if self.outcomes.len() > self.policy.error_rate_window as usize {
            self.outcomes.pop_front();
        }

        if succeeded {
            self.consecutive_failures = 0;
            self.stable_since = Some(Instant::now());
            match self.state {
                CircuitState::HalfOpen => {
                    self.state = CircuitState::Closed;
                    self.opened_at = None;
                }
                CircuitState::Closed => {}
                CircuitState::Open => {}
            }
            return;
        }

        self.stable_since = None;
        self.consecutive_failures += 1;
        if !self.policy.enable_circuit_breaker {
            return;
        }
        if self.state == CircuitState::HalfOpen {
            self.trip_open();
            return;
        }

        let failures = self.outcomes.iter().filter(|&&ok| !ok).count() as f64;
        let error_rate = failures / (self.outcomes.len().max(1) as f64);
        let window_full = self.outcomes.len() as u32 >= self.policy.error_rate_window;

        if self.consecutive_failures >= self.policy.failure_threshold || (window_full && error_rate >= self.policy.error_rate_threshold) {
            self.trip_open();
        }
    }

    fn trip_open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
    }

    /// Force the circuit open directly, bypassing the failure-threshold and
    /// error-rate trip conditions — used when another component (the error
    /// handler's `circuit_breaker` recovery strategy) has already decided a
    /// restart should not be attempted right now.
    pub fn force_open(&mut self) {
        self.trip_open();
    }

    /// Manual reset, used after an operator-initiated recovery.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.attempt_count = 0;
        self.consecutive_failures = 0;
        self.in_flight = false;
        self.outcomes.clear();
        self.opened_at = None;
        self.stable_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            failure_threshold: 3,
            error_rate_window: 10,
            error_rate_threshold: 0.5,
            open_state_cooldown: Duration::from_millis(50),
            reset_counter_after_ms: 50,
            enable_circuit_breaker: true,
        }
    }

    #[test]
    fn disabling_circuit_breaker_lets_failures_accumulate_without_tripping() {
        let mut disabled = policy();
        disabled.enable_circuit_breaker = false;
        let mut mgr = RestartManager::new(disabled);
        for _ in 0..10 {
            mgr.request_restart("crash").unwrap();
            mgr.report_outcome(false);
        }
        assert_eq!(mgr.state(), CircuitState::Closed);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mgr = RestartManager::new(policy());
        assert_eq!(mgr.backoff_for(1), Duration::from_millis(100));
        assert_eq!(mgr.backoff_for(2), Duration::from_millis(200));
        assert_eq!(mgr.backoff_for(5), Duration::from_millis(1000));
    }

    #[test]
    fn consecutive_failures_trip_circuit_open() {
        let mut mgr = RestartManager::new(policy());
        for _ in 0..3 {
            mgr.request_restart("crash").unwrap();
            mgr.report_outcome(false);
        }
        assert_eq!(mgr.state(), CircuitState::Open);
        assert_eq!(mgr.request_restart("crash"), Err(RestartRefusal::CircuitOpen));
    }

    #[test]
    fn max_attempts_refused_independent_of_circuit() {
        let mut tight = policy();
        tight.max_attempts = 2;
        tight.failure_threshold = 100;
        let mut mgr = RestartManager::new(tight);
        mgr.request_restart("a").unwrap();
        mgr.report_outcome(false);
        mgr.request_restart("b").unwrap();
        mgr.report_outcome(false);
        assert_eq!(mgr.request_restart("c"), Err(RestartRefusal::MaxAttemptsExceeded));
    }

    #[test]
    fn concurrent_restart_requests_are_coalesced() {
        let mut mgr = RestartManager::new(policy());
        mgr.request_restart("crash").unwrap();
        assert_eq!(mgr.request_restart("crash again"), Err(RestartRefusal::AlreadyInFlight));
        mgr.report_outcome(true);
        assert!(mgr.request_restart("crash once more").is_ok());
    }

    #[test]
    fn half_open_closes_after_a_single_successful_probe() {
        let mut mgr = RestartManager::new(policy());
        for _ in 0..3 {
            mgr.request_restart("crash").unwrap();
            mgr.report_outcome(false);
        }
        assert_eq!(mgr.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        let attempt = mgr.request_restart("probe").unwrap();
        assert_eq!(mgr.state(), CircuitState::HalfOpen);
        assert!(attempt.attempt_number >= 1);

        mgr.report_outcome(true);
        assert_eq!(mgr.state(), CircuitState::Closed);
    }

    #[test]
    fn attempt_count_resets_once_the_stability_window_elapses() {
        let mut mgr = RestartManager::new(policy());
        mgr.request_restart("crash").unwrap();
        mgr.report_outcome(true);
        assert_eq!(mgr.attempt_count(), 1);

        std::thread::sleep(Duration::from_millis(60));
        mgr.request_restart("unrelated, much later").unwrap();
        assert_eq!(mgr.attempt_count(), 1);
    }

    #[test]
    fn attempt_count_does_not_reset_before_the_stability_window_elapses() {
        let mut mgr = RestartManager::new(policy());
        mgr.request_restart("crash").unwrap();
        mgr.report_outcome(true);
        assert_eq!(mgr.attempt_count(), 1);

        mgr.request_restart("crash again, right away").unwrap();
        assert_eq!(mgr.attempt_count(), 2);
    }

    #[test]
    fn a_later_failure_interrupts_the_stability_window() {
        let mut mgr = RestartManager::new(policy());
        mgr.request_restart("crash").unwrap();
        mgr.report_outcome(true);
        mgr.request_restart("crash again").unwrap();
        mgr.report_outcome(false);

        std::thread::sleep(Duration::from_millis(60));
        // the intervening failure reset the stability window, so counting
        // must not be wiped just because enough time passed since the
        // *original* success.
        mgr.request_restart("third try").unwrap();
        assert_eq!(mgr.attempt_count(), 3);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let mut mgr = RestartManager::new(policy());
        for _ in 0..3 {
            mgr.request_restart("crash").unwrap();
            mgr.report_outcome(false);
        }
        std::thread::sleep(Duration::from_millis(60));
        mgr.request_restart("probe").unwrap();
        assert_eq!(mgr.state(), CircuitState::HalfOpen);
        mgr.report_outcome(false);
        assert_eq!(mgr.state(), CircuitState::Open);
    }
}
