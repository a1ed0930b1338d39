//! A four-level priority FIFO queue with backpressure and batching.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use supervisor_protocol::{Envelope, Priority};

/// Why an enqueue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Backpressure,
}

/// An envelope as held by the queue: `attempts`/`next_attempt_at` support a
/// caller re-enqueuing a message that needs to wait before its next attempt
/// (distinct from the request-level retry handled in `message_handler`).
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub envelope: Envelope,
    pub attempts: u32,
    pub next_attempt_at: Option<Instant>,
}

impl QueuedMessage {
    pub fn new(envelope: Envelope) -> Self {
        Self { envelope, attempts: 0, next_attempt_at: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
    pub max_size_per_priority: [usize; 4],
    /// Fraction of `max_size` at which LOW-priority enqueues start dropping.
    pub backpressure_threshold: f64,
    pub enable_backpressure: bool,
    pub processing_delay_ms: u64,
    pub batch_size: usize,
    pub enable_batching: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_size_per_priority: [1000, 1000, 1000, 1000],
            backpressure_threshold: 0.8,
            enable_backpressure: true,
            processing_delay_ms: 0,
            batch_size: 10,
            enable_batching: false,
        }
    }
}

fn priority_index(p: Priority) -> usize {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

/// Four bounded FIFO sub-queues, one per priority.
///
/// Invariants: `sum(sub_queue_lengths) == total_size <= max_size`;
/// per-priority lengths never exceed their caps; a LOW enqueue is never
/// dropped for backpressure below the threshold.
pub struct PriorityQueue {
    config: QueueConfig,
    queues: [VecDeque<QueuedMessage>; 4],
    dropped_queue_full: u64,
    dropped_backpressure: u64,
}

impl PriorityQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: Default::default(),
            dropped_queue_full: 0,
            dropped_backpressure: 0,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut QueueConfig {
        &mut self.config
    }

    pub fn total_size(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn len_at(&self, priority: Priority) -> usize {
        self.queues[priority_index(priority)].len()
    }

    fn is_backpressured(&self) -> bool {
        self.config.enable_backpressure
            && (self.total_size() as f64) >= self.config.backpressure_threshold * (self.config.max_size as f64)
    }

    /// Enqueue one envelope. Returns `Ok(())` if accepted, or the
    /// [`DropReason`] it was dropped for.
    pub fn enqueue(&mut self, envelope: Envelope) -> Result<(), DropReason> {
        let priority = envelope.priority;
        let idx = priority_index(priority);

        if self.queues[idx].len() >= self.config.max_size_per_priority[idx] || self.total_size() >= self.config.max_size {
            self.dropped_queue_full += 1;
            tracing::warn!(?priority, "queue full, dropping envelope");
            return Err(DropReason::QueueFull);
        }

        if priority == Priority::Low && self.is_backpressured() {
            self.dropped_backpressure += 1;
            tracing::warn!("backpressure active, dropping LOW priority envelope");
            return Err(DropReason::Backpressure);
        }

        let mut msg = QueuedMessage::new(envelope);
        msg.envelope.enqueued_at = Some(chrono::Utc::now());
        self.queues[idx].push_back(msg);
        Ok(())
    }

    /// Remove and return the head of the highest-priority non-empty sub-queue.
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        for priority in Priority::ALL_HIGH_TO_LOW {
            let idx = priority_index(priority);
            if let Some(msg) = self.queues[idx].pop_front() {
                return Some(msg);
            }
        }
        None
    }

    /// Drain up to `batch_size` messages, walking priorities high-to-low.
    /// The batch's overall priority is the highest priority present.
    pub fn dequeue_batch(&mut self) -> Vec<QueuedMessage> {
        if !self.config.enable_batching {
            return self.dequeue().into_iter().collect();
        }

        let mut batch = Vec::with_capacity(self.config.batch_size);
        for priority in Priority::ALL_HIGH_TO_LOW {
            let idx = priority_index(priority);
            while batch.len() < self.config.batch_size {
                match self.queues[idx].pop_front() {
                    Some(msg) => batch.push(msg),
                    None => break,
                }
            }
            if batch.len() >= self.config.batch_size {
                break;
            }
        }
        batch
    }

    /// The batch's overall priority: the highest priority present in `batch`.
    pub fn batch_priority(batch: &[QueuedMessage]) -> Option<Priority> {
        batch.iter().map(|m| m.envelope.priority).max()
    }

    /// Peek at the head of the highest non-empty sub-queue without removing it.
    pub fn peek(&self) -> Option<&QueuedMessage> {
        for priority in Priority::ALL_HIGH_TO_LOW {
            let idx = priority_index(priority);
            if let Some(msg) = self.queues[idx].front() {
                return Some(msg);
            }
        }
        None
    }

    pub fn clear(&mut self) {
        for q in &mut self.queues {
            q.clear();
        }
    }

    pub fn clear_priority(&mut self, priority: Priority) {
        self.queues[priority_index(priority)].clear();
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.config.processing_delay_ms)
    }

    pub fn dropped_counts(&self) -> (u64, u64) {
        (self.dropped_queue_full, self.dropped_backpressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_protocol::EnvelopeKind;

    fn env(priority: Priority) -> Envelope {
        let mut e = Envelope::request(EnvelopeKind::Data, None);
        e.priority = priority;
        e
    }

    #[test]
    fn fifo_within_priority_level() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        let mut first = env(Priority::Normal);
        first.id = "a".into();
        let mut second = env(Priority::Normal);
        second.id = "b".into();
        q.enqueue(first).unwrap();
        q.enqueue(second).unwrap();

        assert_eq!(q.dequeue().unwrap().envelope.id, "a");
        assert_eq!(q.dequeue().unwrap().envelope.id, "b");
    }

    #[test]
    fn higher_priority_drains_before_lower() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(env(Priority::Low)).unwrap();
        q.enqueue(env(Priority::Critical)).unwrap();
        q.enqueue(env(Priority::Normal)).unwrap();

        assert_eq!(q.dequeue().unwrap().envelope.priority, Priority::Critical);
        assert_eq!(q.dequeue().unwrap().envelope.priority, Priority::Normal);
        assert_eq!(q.dequeue().unwrap().envelope.priority, Priority::Low);
    }

    #[test]
    fn full_sub_queue_is_dropped_with_reason() {
        let mut config = QueueConfig::default();
        config.max_size_per_priority[priority_index(Priority::Normal)] = 1;
        let mut q = PriorityQueue::new(config);
        q.enqueue(env(Priority::Normal)).unwrap();
        let err = q.enqueue(env(Priority::Normal)).unwrap_err();
        assert_eq!(err, DropReason::QueueFull);
    }

    #[test]
    fn backpressure_drops_low_but_not_others() {
        // max_size=10, threshold=0.8: 8 NORMAL fills past the threshold, then LOW drops.
        let mut config = QueueConfig::default();
        config.max_size = 10;
        config.backpressure_threshold = 0.8;
        let mut q = PriorityQueue::new(config);

        for _ in 0..8 {
            q.enqueue(env(Priority::Normal)).unwrap();
        }
        assert_eq!(q.enqueue(env(Priority::Low)), Err(DropReason::Backpressure));
        // HIGH still gets through even though we're over the backpressure threshold.
        assert!(q.enqueue(env(Priority::High)).is_ok());
    }

    #[test]
    fn dequeue_batch_walks_high_to_low_and_caps_at_batch_size() {
        let mut config = QueueConfig::default();
        config.enable_batching = true;
        config.batch_size = 3;
        let mut q = PriorityQueue::new(config);
        q.enqueue(env(Priority::Low)).unwrap();
        q.enqueue(env(Priority::Low)).unwrap();
        q.enqueue(env(Priority::Critical)).unwrap();
        q.enqueue(env(Priority::High)).unwrap();

        let batch = q.dequeue_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].envelope.priority, Priority::Critical);
        assert_eq!(batch[1].envelope.priority, Priority::High);
        assert_eq!(batch[2].envelope.priority, Priority::Low);
        assert_eq!(PriorityQueue::batch_priority(&batch), Some(Priority::Critical));
    }

    #[test]
    fn total_size_invariant_holds_across_mixed_operations() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(env(Priority::Low)).unwrap();
        q.enqueue(env(Priority::High)).unwrap();
        q.dequeue();
        assert_eq!(q.total_size(), q.len_at(Priority::Low) + q.len_at(Priority::Normal) + q.len_at(Priority::High) + q.len_at(Priority::Critical));
    }
}
