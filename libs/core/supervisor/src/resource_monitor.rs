//! Memory tracking and trend analysis over worker-reported samples.
//!
//! The supervisor never inspects worker memory directly; the worker
//! self-reports via a `status` envelope (see `worker-runtime`'s sampler), and
//! this module keeps a bounded history of those reports, computes a trend,
//! and raises alerts when thresholds are crossed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One worker-reported memory reading. `timestamp` defaults to the decoding
/// time when absent, since the worker's own wire payload (`worker_runtime::MemorySampleWire`)
/// carries only the raw byte counts — the supervisor stamps the arrival time
/// itself rather than trusting an unsynchronized worker clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub external_bytes: u64,
    pub array_buffers_bytes: u64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One megabyte, used as the fixed noise floor for trend detection — a
/// trend that hasn't moved the mean by more than this is just jitter.
const TREND_EPSILON_BYTES: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMonitorConfig {
    pub max_samples: usize,
    pub warning_threshold_bytes: u64,
    pub critical_threshold_bytes: u64,
    /// Minimum samples needed before a trend is computed.
    pub trend_window: usize,
    /// A critical sample must stay exceeded for this long, continuously,
    /// before `exceeded_restart_threshold` fires — a single spike does not
    /// trigger an auto-restart.
    pub restart_grace: Duration,
    pub enable_auto_restart: bool,
    /// Heap-used alert thresholds, in bytes. `None` disables the check —
    /// plain Rust workers (no userspace heap distinct from RSS) typically
    /// leave these unset.
    pub warning_heap_bytes: Option<u64>,
    pub max_heap_bytes: Option<u64>,
    /// How often the monitor may advise the worker to run a GC pass.
    pub gc_interval: Duration,
    pub enable_gc: bool,
    /// A linear-regression growth rate at or above this many MB/min over the
    /// trend window raises a growth-rate alert, independent of the
    /// increasing/decreasing trend flag.
    pub growth_rate_alert_mb_per_min: f64,
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            max_samples: 120,
            warning_threshold_bytes: 512 * 1024 * 1024,
            critical_threshold_bytes: 768 * 1024 * 1024,
            trend_window: 10,
            restart_grace: Duration::from_millis(30_000),
            enable_auto_restart: true,
            warning_heap_bytes: None,
            max_heap_bytes: None,
            gc_interval: Duration::from_secs(300),
            enable_gc: false,
            growth_rate_alert_mb_per_min: 10.0,
        }
    }
}

/// Outcome of recording a sample: what, if anything, the caller should do
/// about it (publish events, trigger a restart).
#[derive(Debug, Clone, Default)]
pub struct MonitorOutcome {
    pub alert: Option<(AlertSeverity, u64, u64)>,
    /// A heap-specific alert, reported separately from `alert` (which always
    /// tracks RSS) since a worker can be heap-healthy while its RSS climbs
    /// from non-heap allocations, or vice versa.
    pub heap_alert: Option<(AlertSeverity, u64, u64)>,
    pub trend_increasing: Option<bool>,
    pub exceeded_restart_threshold: bool,
    /// Set when the regression-estimated growth rate crosses
    /// `growth_rate_alert_mb_per_min`.
    pub growth_rate_mb_per_min: Option<f64>,
}

/// A bounded ring of memory samples with threshold and trend detection.
pub struct ResourceMonitor {
    config: ResourceMonitorConfig,
    samples: VecDeque<MemorySample>,
    /// When the critical threshold started being continuously exceeded;
    /// cleared the moment a sample drops back under it.
    exceeded_since: Option<Instant>,
    restart_already_triggered: bool,
    last_gc_request: Option<Instant>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceMonitorConfig) -> Self {
        let samples = VecDeque::with_capacity(config.max_samples);
        Self { config, samples, exceeded_since: None, restart_already_triggered: false, last_gc_request: None }
    }

    pub fn config(&self) -> &ResourceMonitorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ResourceMonitorConfig {
        &mut self.config
    }

    pub fn samples(&self) -> impl Iterator<Item = &MemorySample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&MemorySample> {
        self.samples.back()
    }

    /// Record a new sample, evicting the oldest if at capacity, and compute
    /// the resulting alert/trend state.
    pub fn record(&mut self, sample: MemorySample) -> MonitorOutcome {
        if self.samples.len() >= self.config.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let mut outcome = MonitorOutcome::default();

        if sample.rss_bytes >= self.config.critical_threshold_bytes {
            outcome.alert = Some((AlertSeverity::Critical, sample.rss_bytes, self.config.critical_threshold_bytes));

            let exceeded_since = *self.exceeded_since.get_or_insert_with(Instant::now);
            if self.config.enable_auto_restart
                && !self.restart_already_triggered
                && exceeded_since.elapsed() >= self.config.restart_grace
            {
                outcome.exceeded_restart_threshold = true;
                self.restart_already_triggered = true;
            }
        } else {
            self.exceeded_since = None;
            self.restart_already_triggered = false;
            if sample.rss_bytes >= self.config.warning_threshold_bytes {
                outcome.alert = Some((AlertSeverity::Warning, sample.rss_bytes, self.config.warning_threshold_bytes));
            }
        }

        if let Some(max_heap) = self.config.max_heap_bytes {
            if sample.heap_used_bytes >= max_heap {
                outcome.heap_alert = Some((AlertSeverity::Critical, sample.heap_used_bytes, max_heap));
            } else if let Some(warning_heap) = self.config.warning_heap_bytes {
                if sample.heap_used_bytes >= warning_heap {
                    outcome.heap_alert = Some((AlertSeverity::Warning, sample.heap_used_bytes, warning_heap));
                }
            }
        }

        outcome.trend_increasing = self.compute_trend();
        outcome.growth_rate_mb_per_min = self.compute_growth_rate();
        outcome
    }

    /// Compares the mean RSS of the first half of the last `trend_window`
    /// samples against the mean of the second half: `Some(true)` if the
    /// second-half mean is more than one MiB above the first-half mean,
    /// `Some(false)` if more than one MiB below, `None` if there isn't
    /// enough history yet or the two halves are within that noise floor.
    fn compute_trend(&self) -> Option<bool> {
        if self.samples.len() < self.config.trend_window || self.config.trend_window < 2 {
            return None;
        }
        let window: Vec<&MemorySample> = self.samples.iter().rev().take(self.config.trend_window).collect();
        // `window` is newest-first; split it into the newer and older halves.
        let half = window.len() / 2;
        let newer_mean = mean(window[..half].iter().map(|s| s.rss_bytes as f64));
        let older_mean = mean(window[half..].iter().map(|s| s.rss_bytes as f64));

        let delta = newer_mean - older_mean;
        if delta > TREND_EPSILON_BYTES {
            Some(true)
        } else if delta < -TREND_EPSILON_BYTES {
            Some(false)
        } else {
            None
        }
    }

    /// Least-squares slope of RSS over time across the last `trend_window`
    /// samples, expressed in MB/min. `None` while there isn't enough history,
    /// or while the slope stays below `growth_rate_alert_mb_per_min`.
    fn compute_growth_rate(&self) -> Option<f64> {
        if self.samples.len() < self.config.trend_window || self.config.trend_window < 2 {
            return None;
        }
        let window: Vec<&MemorySample> = self.samples.iter().rev().take(self.config.trend_window).collect();
        let first_ts = window.last()?.timestamp;

        let points: Vec<(f64, f64)> = window
            .iter()
            .rev()
            .map(|s| ((s.timestamp - first_ts).num_milliseconds() as f64 / 1000.0, s.rss_bytes as f64))
            .collect();

        let n = points.len() as f64;
        let mean_x = mean(points.iter().map(|(x, _)| *x));
        let mean_y = mean(points.iter().map(|(_, y)| *y));
        let mut covariance = 0.0;
        let mut variance = 0.0;
        for (x, y) in &points {
            covariance += (x - mean_x) * (y - mean_y);
            variance += (x - mean_x).powi(2);
        }
        if variance == 0.0 || n < 2.0 {
            return None;
        }
        let slope_bytes_per_sec = covariance / variance;
        let mb_per_min = slope_bytes_per_sec * 60.0 / (1024.0 * 1024.0);

        if mb_per_min >= self.config.growth_rate_alert_mb_per_min {
            Some(mb_per_min)
        } else {
            None
        }
    }

    /// Whether the monitor should advise the worker to run a GC pass now.
    /// Advisory and rate-limited to `gc_interval`: a caller that ignores a
    /// `true` result simply gets asked again `gc_interval` later.
    pub fn should_request_gc(&mut self, now: Instant) -> bool {
        if !self.config.enable_gc {
            return false;
        }
        let due = match self.last_gc_request {
            Some(last) => now.duration_since(last) >= self.config.gc_interval,
            None => true,
        };
        if due {
            self.last_gc_request = Some(now);
        }
        due
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.exceeded_since = None;
        self.restart_already_triggered = false;
        self.last_gc_request = None;
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rss: u64) -> MemorySample {
        MemorySample {
            rss_bytes: rss,
            heap_used_bytes: rss / 2,
            heap_total_bytes: rss,
            external_bytes: 0,
            array_buffers_bytes: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn warning_then_critical_thresholds_fire() {
        let mut config = ResourceMonitorConfig::default();
        config.warning_threshold_bytes = 100;
        config.critical_threshold_bytes = 200;
        let mut monitor = ResourceMonitor::new(config);

        let outcome = monitor.record(sample(150));
        assert_eq!(outcome.alert.unwrap().0, AlertSeverity::Warning);

        let outcome = monitor.record(sample(250));
        assert_eq!(outcome.alert.unwrap().0, AlertSeverity::Critical);
        // A single critical sample does not yet trigger an auto-restart;
        // the grace period has not elapsed.
        assert!(!outcome.exceeded_restart_threshold);
    }

    #[test]
    fn auto_restart_triggers_only_after_grace_period_of_sustained_breach() {
        let mut config = ResourceMonitorConfig::default();
        config.critical_threshold_bytes = 200;
        config.restart_grace = Duration::from_millis(20);
        let mut monitor = ResourceMonitor::new(config);

        let outcome = monitor.record(sample(250));
        assert!(!outcome.exceeded_restart_threshold);

        std::thread::sleep(Duration::from_millis(30));
        let outcome = monitor.record(sample(260));
        assert!(outcome.exceeded_restart_threshold);
    }

    #[test]
    fn dropping_back_under_critical_resets_the_grace_window() {
        let mut config = ResourceMonitorConfig::default();
        config.critical_threshold_bytes = 200;
        config.warning_threshold_bytes = 50;
        config.restart_grace = Duration::from_millis(20);
        let mut monitor = ResourceMonitor::new(config);

        monitor.record(sample(250));
        std::thread::sleep(Duration::from_millis(10));
        monitor.record(sample(100));
        std::thread::sleep(Duration::from_millis(30));
        let outcome = monitor.record(sample(250));
        assert!(!outcome.exceeded_restart_threshold);
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let mut config = ResourceMonitorConfig::default();
        config.max_samples = 3;
        let mut monitor = ResourceMonitor::new(config);
        for rss in [10, 20, 30, 40] {
            monitor.record(sample(rss));
        }
        assert_eq!(monitor.samples().count(), 3);
        assert_eq!(monitor.samples().next().unwrap().rss_bytes, 20);
    }

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn sustained_growth_reports_increasing_trend() {
        let mut config = ResourceMonitorConfig::default();
        config.trend_window = 4;
        let mut monitor = ResourceMonitor::new(config);
        monitor.record(sample(100 * MIB));
        monitor.record(sample(100 * MIB));
        monitor.record(sample(105 * MIB));
        let outcome = monitor.record(sample(105 * MIB));
        assert_eq!(outcome.trend_increasing, Some(true));
    }

    #[test]
    fn sustained_shrinkage_reports_decreasing_trend() {
        let mut config = ResourceMonitorConfig::default();
        config.trend_window = 4;
        let mut monitor = ResourceMonitor::new(config);
        monitor.record(sample(105 * MIB));
        monitor.record(sample(105 * MIB));
        monitor.record(sample(100 * MIB));
        let outcome = monitor.record(sample(100 * MIB));
        assert_eq!(outcome.trend_increasing, Some(false));
    }

    #[test]
    fn stable_memory_reports_no_trend() {
        let mut config = ResourceMonitorConfig::default();
        config.trend_window = 4;
        let mut monitor = ResourceMonitor::new(config);
        monitor.record(sample(100 * MIB));
        monitor.record(sample(100 * MIB + 100_000));
        monitor.record(sample(100 * MIB));
        let outcome = monitor.record(sample(100 * MIB + 50_000));
        assert_eq!(outcome.trend_increasing, None);
    }

    #[test]
    fn heap_thresholds_fire_independently_of_rss() {
        let mut config = ResourceMonitorConfig::default();
        config.warning_threshold_bytes = u64::MAX;
        config.critical_threshold_bytes = u64::MAX;
        config.warning_heap_bytes = Some(50 * MIB);
        config.max_heap_bytes = Some(100 * MIB);
        let mut monitor = ResourceMonitor::new(config);

        let outcome = monitor.record(sample(60 * MIB));
        assert!(outcome.alert.is_none());
        assert_eq!(outcome.heap_alert.unwrap().0, AlertSeverity::Warning);

        let outcome = monitor.record(sample(250 * MIB));
        assert_eq!(outcome.heap_alert.unwrap().0, AlertSeverity::Critical);
    }

    #[test]
    fn should_request_gc_is_rate_limited_by_interval() {
        let mut config = ResourceMonitorConfig::default();
        config.enable_gc = true;
        config.gc_interval = Duration::from_millis(20);
        let mut monitor = ResourceMonitor::new(config);

        let t0 = Instant::now();
        assert!(monitor.should_request_gc(t0));
        assert!(!monitor.should_request_gc(t0));
        std::thread::sleep(Duration::from_millis(30));
        assert!(monitor.should_request_gc(Instant::now()));
    }

    #[test]
    fn should_request_gc_disabled_by_default() {
        let mut monitor = ResourceMonitor::new(ResourceMonitorConfig::default());
        assert!(!monitor.should_request_gc(Instant::now()));
    }

    #[test]
    fn steep_growth_raises_a_growth_rate_alert() {
        let mut config = ResourceMonitorConfig::default();
        config.trend_window = 3;
        config.growth_rate_alert_mb_per_min = 1.0;
        let mut monitor = ResourceMonitor::new(config);

        let base = Utc::now();
        let mut push = |offset_secs: i64, rss: u64| {
            monitor.record(MemorySample {
                rss_bytes: rss,
                heap_used_bytes: rss / 2,
                heap_total_bytes: rss,
                external_bytes: 0,
                array_buffers_bytes: 0,
                timestamp: base + chrono::Duration::seconds(offset_secs),
            })
        };
        push(0, 100 * MIB);
        push(30, 110 * MIB);
        let outcome = push(60, 120 * MIB);
        assert!(outcome.growth_rate_mb_per_min.is_some());
        assert!(outcome.growth_rate_mb_per_min.unwrap() > 1.0);
    }
}
