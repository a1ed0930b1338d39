//! Periodic liveness checks over the message handler's ping/pong round-trip.
//!
//! `record_success`/`record_failure` are driven by the caller after each
//! check completes or times out; `consecutive_missed_checks` only advances
//! on an explicit ping failure, never on the worker's own unsolicited status
//! heartbeat.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub unhealthy_after_missed: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(3),
            unhealthy_after_missed: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthOutcome {
    pub became_unhealthy: bool,
    pub consecutive_missed: u32,
}

/// Tracks consecutive missed health checks and the healthy/unhealthy
/// transition point.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    consecutive_missed: u32,
    last_success_at: Option<DateTime<Utc>>,
    last_check_at: Option<DateTime<Utc>>,
    was_healthy: bool,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self { config, consecutive_missed: 0, last_success_at: None, last_check_at: None, was_healthy: true }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut HealthMonitorConfig {
        &mut self.config
    }

    pub fn consecutive_missed_checks(&self) -> u32 {
        self.consecutive_missed
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_missed < self.config.unhealthy_after_missed
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    pub fn record_success(&mut self) -> HealthOutcome {
        self.consecutive_missed = 0;
        self.last_success_at = Some(Utc::now());
        self.last_check_at = self.last_success_at;
        self.was_healthy = true;
        HealthOutcome { became_unhealthy: false, consecutive_missed: 0 }
    }

    /// Record a missed check (ping timed out or was never answered). Returns
    /// whether this particular call crossed the unhealthy threshold for the
    /// first time since the last success.
    pub fn record_failure(&mut self) -> HealthOutcome {
        self.consecutive_missed += 1;
        self.last_check_at = Some(Utc::now());
        let now_unhealthy = !self.is_healthy();
        let became_unhealthy = now_unhealthy && self.was_healthy;
        if now_unhealthy {
            self.was_healthy = false;
        }
        HealthOutcome { became_unhealthy, consecutive_missed: self.consecutive_missed }
    }

    pub fn reset(&mut self) {
        self.consecutive_missed = 0;
        self.was_healthy = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_consecutive_missed() {
        let mut monitor = HealthMonitor::new(HealthMonitorConfig::default());
        monitor.record_failure();
        monitor.record_failure();
        monitor.record_success();
        assert_eq!(monitor.consecutive_missed_checks(), 0);
        assert!(monitor.is_healthy());
    }

    #[test]
    fn crossing_threshold_reports_unhealthy_transition_once() {
        let mut config = HealthMonitorConfig::default();
        config.unhealthy_after_missed = 2;
        let mut monitor = HealthMonitor::new(config);

        let first = monitor.record_failure();
        assert!(!first.became_unhealthy);
        assert!(monitor.is_healthy());

        let second = monitor.record_failure();
        assert!(second.became_unhealthy);
        assert!(!monitor.is_healthy());

        let third = monitor.record_failure();
        assert!(!third.became_unhealthy);
    }
}
