//! A pool of worker slots with load balancing and cooldown-gated
//! autoscaling, sitting above individual [`crate::threading_service::ThreadingService`]
//! instances.
//!
//! The pool itself is generic over what a "worker" is: it tracks
//! [`WorkerRecord`]s by id and load, and leaves spawning/stopping the actual
//! worker to the caller (who owns a `ThreadingService` per record). This
//! keeps the pool transport-agnostic and trivially testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use supervisor_protocol::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    PriorityBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Error,
}

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: String,
    pub status: WorkerStatus,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub message_count: u64,
    pub error_count: u64,
    pub restart_count: u32,
    /// Decaying load estimate in `[0.0, 1.0]`: `+0.1` on dispatch (capped at
    /// `1.0`), `-0.1` on completion (floored at `0.0`).
    pub current_load: f64,
    pub healthy: bool,
}

impl WorkerRecord {
    fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            status: WorkerStatus::Starting,
            created_at: now,
            last_used_at: now,
            message_count: 0,
            error_count: 0,
            restart_count: 0,
            current_load: 0.0,
            healthy: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub strategy: LoadBalanceStrategy,
    /// Scale up once `pending_queue_size` reaches this.
    pub scale_up_threshold: usize,
    /// Scale down one idle worker once it has sat idle for at least this
    /// long, oldest-idle first.
    pub scale_down_threshold: Duration,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    /// At most this many workers are added in one scale-up batch.
    pub max_scale_up_rate: usize,
    /// At most this many workers are removed in one scale-down batch.
    pub max_scale_down_rate: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            strategy: LoadBalanceStrategy::LeastLoaded,
            scale_up_threshold: 20,
            scale_down_threshold: Duration::from_secs(120),
            scale_up_cooldown: Duration::from_secs(30),
            scale_down_cooldown: Duration::from_secs(30),
            max_scale_up_rate: 2,
            max_scale_down_rate: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleUp(usize),
    ScaleDown(usize),
    Hold,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub worker_count: usize,
    pub healthy_count: usize,
    pub average_load: f64,
    pub pending_queue_size: usize,
}

/// Tracks worker records and decides routing/scaling; owns no transports or
/// processes itself.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    workers: HashMap<String, WorkerRecord>,
    order: Vec<String>,
    round_robin_cursor: usize,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    pending_queue_size: usize,
    next_generated_id: u64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            order: Vec::new(),
            round_robin_cursor: 0,
            last_scale_up: None,
            last_scale_down: None,
            pending_queue_size: 0,
            next_generated_id: 0,
        }
    }

    /// Report the current pending-queue depth feeding the scale-up decision.
    pub fn set_pending_queue_size(&mut self, size: usize) {
        self.pending_queue_size = size;
    }

    pub fn pending_queue_size(&self) -> usize {
        self.pending_queue_size
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn add_worker(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.order.push(id.clone());
        self.workers.insert(id.clone(), WorkerRecord::new(id));
    }

    pub fn remove_worker(&mut self, id: &str) -> Option<WorkerRecord> {
        self.order.retain(|w| w != id);
        self.workers.remove(id)
    }

    pub fn set_healthy(&mut self, id: &str, healthy: bool) {
        if let Some(record) = self.workers.get_mut(id) {
            record.healthy = healthy;
            if !healthy {
                record.status = WorkerStatus::Error;
            }
        }
    }

    pub fn record_dispatch(&mut self, id: &str) {
        if let Some(record) = self.workers.get_mut(id) {
            record.current_load = (record.current_load + 0.1).min(1.0);
            record.message_count += 1;
            record.last_used_at = Instant::now();
            record.status = WorkerStatus::Busy;
        }
    }

    pub fn record_completion(&mut self, id: &str) {
        if let Some(record) = self.workers.get_mut(id) {
            record.current_load = (record.current_load - 0.1).max(0.0);
            record.last_used_at = Instant::now();
            if record.current_load == 0.0 {
                record.status = WorkerStatus::Idle;
            }
        }
    }

    pub fn record_error(&mut self, id: &str) {
        if let Some(record) = self.workers.get_mut(id) {
            record.error_count += 1;
        }
    }

    pub fn record_restart(&mut self, id: &str) {
        if let Some(record) = self.workers.get_mut(id) {
            record.restart_count += 1;
        }
    }

    pub fn worker(&self, id: &str) -> Option<&WorkerRecord> {
        self.workers.get(id)
    }

    fn healthy_ids(&self) -> Vec<&String> {
        self.order.iter().filter(|id| self.workers.get(*id).is_some_and(|w| w.healthy)).collect()
    }

    /// Select the next worker to dispatch `priority`'s envelope to, per the
    /// configured strategy. Returns `None` when the pool has no healthy
    /// workers.
    pub fn select_worker(&mut self, priority: Priority) -> Option<String> {
        let healthy = self.healthy_ids();
        if healthy.is_empty() {
            return None;
        }

        match self.config.strategy {
            LoadBalanceStrategy::RoundRobin => {
                self.round_robin_cursor = (self.round_robin_cursor + 1) % healthy.len();
                Some(healthy[self.round_robin_cursor].clone())
            }
            LoadBalanceStrategy::LeastLoaded => self.least_loaded(healthy),
            LoadBalanceStrategy::Random => {
                let idx = rand::rng().random_range(0..healthy.len());
                Some(healthy[idx].clone())
            }
            // HIGH/CRITICAL envelopes go to the worker with the fewest
            // errors so far, since routing around a flaky worker matters
            // more than balance for urgent work; everything else falls
            // through to the same load-balancing least_loaded uses.
            LoadBalanceStrategy::PriorityBased => {
                if priority >= Priority::High {
                    healthy.into_iter().min_by_key(|id| self.workers[*id].error_count).cloned()
                } else {
                    self.least_loaded(healthy)
                }
            }
        }
    }

    fn least_loaded(&self, healthy: Vec<&String>) -> Option<String> {
        healthy
            .into_iter()
            .min_by(|a, b| self.workers[*a].current_load.total_cmp(&self.workers[*b].current_load))
            .cloned()
    }

    pub fn average_load(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        let total: f64 = self.workers.values().map(|w| w.current_load).sum();
        total / self.workers.len() as f64
    }

    /// Workers eligible for scale-down — `Idle` status, idle for at least
    /// `scale_down_threshold` — oldest-idle (longest `last_used_at.elapsed()`)
    /// first.
    fn idle_candidates(&self) -> Vec<&WorkerRecord> {
        let mut candidates: Vec<&WorkerRecord> = self
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle && w.last_used_at.elapsed() >= self.config.scale_down_threshold)
            .collect();
        candidates.sort_by(|a, b| b.last_used_at.elapsed().cmp(&a.last_used_at.elapsed()));
        candidates
    }

    /// Decide whether the pool should scale up or down and by how many,
    /// respecting each direction's own cooldown and the configured worker
    /// bounds. Does not spawn or stop anything itself — [`Self::scale_up`]
    /// and [`Self::scale_down`] carry out a decision once the caller accepts
    /// it.
    pub fn decide_scaling(&self) -> ScalingDecision {
        let up_ready = self.last_scale_up.map_or(true, |t| t.elapsed() >= self.config.scale_up_cooldown);
        if up_ready && self.pending_queue_size >= self.config.scale_up_threshold && self.workers.len() < self.config.max_workers {
            let n = self.config.max_scale_up_rate.min(self.config.max_workers - self.workers.len());
            if n > 0 {
                return ScalingDecision::ScaleUp(n);
            }
        }

        let down_ready = self.last_scale_down.map_or(true, |t| t.elapsed() >= self.config.scale_down_cooldown);
        if down_ready && self.workers.len() > self.config.min_workers {
            let idle_count = self.idle_candidates().len();
            let n = self.config.max_scale_down_rate.min(idle_count).min(self.workers.len() - self.config.min_workers);
            if n > 0 {
                return ScalingDecision::ScaleDown(n);
            }
        }

        ScalingDecision::Hold
    }

    /// Add `n` fresh worker slots (ids generated internally, `Starting`
    /// status) and return their ids so the caller can spin up the matching
    /// transport for each. Resets the scale-up cooldown.
    pub fn scale_up(&mut self, n: usize) -> Vec<String> {
        let ids: Vec<String> = (0..n)
            .map(|_| {
                self.next_generated_id += 1;
                format!("worker-{}", self.next_generated_id)
            })
            .collect();
        for id in &ids {
            self.add_worker(id.clone());
        }
        self.last_scale_up = Some(Instant::now());
        ids
    }

    /// Remove up to `n` oldest-idle workers and return their ids so the
    /// caller can stop the matching transport for each. Resets the
    /// scale-down cooldown.
    pub fn scale_down(&mut self, n: usize) -> Vec<String> {
        let ids: Vec<String> = self.idle_candidates().into_iter().take(n).map(|w| w.id.clone()).collect();
        for id in &ids {
            self.remove_worker(id);
        }
        self.last_scale_down = Some(Instant::now());
        ids
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.workers.len(),
            healthy_count: self.workers.values().filter(|w| w.healthy).count(),
            average_load: self.average_load(),
            pending_queue_size: self.pending_queue_size,
        }
    }

    /// Mark every worker for shutdown order, most-idle-first (lightest
    /// `current_load` first), so a graceful pool-wide stop drains in-flight
    /// work on the busiest workers last.
    pub fn shutdown_order(&self) -> Vec<String> {
        let mut ids: Vec<&WorkerRecord> = self.workers.values().collect();
        ids.sort_by(|a, b| a.current_load.total_cmp(&b.current_load));
        ids.into_iter().map(|w| w.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(strategy: LoadBalanceStrategy) -> WorkerPool {
        let mut config = WorkerPoolConfig::default();
        config.strategy = strategy;
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.add_worker("b");
        pool.add_worker("c");
        pool
    }

    #[test]
    fn least_loaded_picks_the_lightest_worker() {
        let mut pool = pool(LoadBalanceStrategy::LeastLoaded);
        pool.record_dispatch("a");
        pool.record_dispatch("a");
        pool.record_dispatch("b");
        assert_eq!(pool.select_worker(Priority::Normal), Some("c".to_string()));
    }

    #[test]
    fn unhealthy_workers_are_never_selected() {
        let mut pool = pool(LoadBalanceStrategy::LeastLoaded);
        pool.set_healthy("a", false);
        pool.set_healthy("b", false);
        assert_eq!(pool.select_worker(Priority::Normal), Some("c".to_string()));
    }

    #[test]
    fn round_robin_cycles_through_workers() {
        let mut pool = pool(LoadBalanceStrategy::RoundRobin);
        let first = pool.select_worker(Priority::Normal).unwrap();
        let second = pool.select_worker(Priority::Normal).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn no_healthy_workers_returns_none() {
        let mut pool = pool(LoadBalanceStrategy::LeastLoaded);
        pool.set_healthy("a", false);
        pool.set_healthy("b", false);
        pool.set_healthy("c", false);
        assert_eq!(pool.select_worker(Priority::Normal), None);
    }

    #[test]
    fn priority_based_prefers_least_errors_for_high_priority() {
        let mut pool = pool(LoadBalanceStrategy::PriorityBased);
        pool.record_error("a");
        pool.record_error("a");
        pool.record_error("b");
        assert_eq!(pool.select_worker(Priority::High), Some("c".to_string()));
    }

    #[test]
    fn priority_based_falls_back_to_least_loaded_for_normal_priority() {
        let mut pool = pool(LoadBalanceStrategy::PriorityBased);
        pool.record_error("c");
        pool.record_dispatch("a");
        pool.record_dispatch("b");
        assert_eq!(pool.select_worker(Priority::Normal), Some("c".to_string()));
    }

    #[test]
    fn scale_up_when_queue_backs_up_and_below_max() {
        let mut config = WorkerPoolConfig::default();
        config.scale_up_threshold = 5;
        config.max_workers = 4;
        config.max_scale_up_rate = 2;
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.set_pending_queue_size(5);
        assert_eq!(pool.decide_scaling(), ScalingDecision::ScaleUp(2));
    }

    #[test]
    fn scaling_holds_during_cooldown() {
        let mut config = WorkerPoolConfig::default();
        config.scale_up_threshold = 5;
        config.scale_up_cooldown = Duration::from_secs(300);
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.set_pending_queue_size(5);
        pool.scale_up(1);
        assert_eq!(pool.decide_scaling(), ScalingDecision::Hold);
    }

    #[test]
    fn scale_down_respects_min_workers() {
        let mut config = WorkerPoolConfig::default();
        config.min_workers = 2;
        config.scale_down_threshold = Duration::from_secs(0);
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.add_worker("b");
        pool.record_completion("a");
        pool.record_completion("b");
        assert_eq!(pool.decide_scaling(), ScalingDecision::Hold);
    }

    #[test]
    fn scale_down_picks_an_idle_worker_past_the_idle_threshold() {
        let mut config = WorkerPoolConfig::default();
        config.min_workers = 1;
        config.scale_down_threshold = Duration::from_secs(0);
        config.max_scale_down_rate = 1;
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.add_worker("b");
        pool.record_completion("a");
        pool.record_completion("b");
        assert_eq!(pool.decide_scaling(), ScalingDecision::ScaleDown(1));
    }

    #[test]
    fn busy_workers_are_never_scale_down_candidates() {
        let mut config = WorkerPoolConfig::default();
        config.min_workers = 1;
        config.scale_down_threshold = Duration::from_secs(0);
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.add_worker("b");
        pool.record_dispatch("a");
        pool.record_dispatch("b");
        assert_eq!(pool.decide_scaling(), ScalingDecision::Hold);
    }

    #[test]
    fn scale_up_generates_ids_and_adds_workers() {
        let mut config = WorkerPoolConfig::default();
        config.max_workers = 8;
        let mut pool = WorkerPool::new(config);
        let ids = pool.scale_up(2);
        assert_eq!(ids.len(), 2);
        assert_eq!(pool.len(), 2);
        for id in &ids {
            assert!(pool.worker(id).is_some());
        }
    }

    #[test]
    fn scale_down_removes_the_oldest_idle_workers_and_returns_their_ids() {
        let mut config = WorkerPoolConfig::default();
        config.scale_down_threshold = Duration::from_secs(0);
        let mut pool = WorkerPool::new(config);
        pool.add_worker("a");
        pool.add_worker("b");
        pool.record_completion("a");
        pool.record_completion("b");
        let removed = pool.scale_down(1);
        assert_eq!(removed.len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn stats_reports_counts_and_pending_queue_size() {
        let mut pool = pool(LoadBalanceStrategy::LeastLoaded);
        pool.set_healthy("a", false);
        pool.set_pending_queue_size(7);
        let stats = pool.stats();
        assert_eq!(stats.worker_count, 3);
        assert_eq!(stats.healthy_count, 2);
        assert_eq!(stats.pending_queue_size, 7);
    }

    #[test]
    fn shutdown_order_is_lightest_load_first() {
        let mut pool = pool(LoadBalanceStrategy::LeastLoaded);
        pool.record_dispatch("a");
        pool.record_dispatch("a");
        pool.record_dispatch("b");
        let order = pool.shutdown_order();
        assert_eq!(order[0], "c");
        assert_eq!(order[2], "a");
    }
}
