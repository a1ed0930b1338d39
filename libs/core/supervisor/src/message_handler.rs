//! Request/response correlation, timeout, and retry over one worker channel.
//!
//! A `send()` call registers a [`PendingRequest`] keyed by envelope id, hands
//! the envelope to the transport, and resolves the caller's future when a
//! matching response arrives via `on_incoming`. `sweep_timed_out` hands the
//! expired envelopes back to the caller (the original requester's future is
//! already gone by then), which decides whether and how to retry them.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use supervisor_protocol::{Envelope, EnvelopeKind, IdGenerator};

use crate::error::{SupervisorError, SupervisorResult};

struct PendingRequest {
    responder: oneshot::Sender<Envelope>,
    enqueued_at: Instant,
    /// The envelope's own `correlation_id` if it carried one, else the
    /// envelope's own `id` — either way, the value a retry of this request
    /// will carry forward as *its* `correlation_id`, so the whole chain can
    /// be found and cancelled by one key regardless of which attempt's `id`
    /// is currently pending.
    correlation_id: String,
    /// The envelope as sent, kept so a timeout sweep can hand it back to the
    /// caller for a supervisor-driven retry.
    envelope: Envelope,
}

#[derive(Debug, Clone, Default)]
pub struct MessageHandlerStats {
    pub sent: u64,
    pub responded: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Ring of the last 100 round-trip latencies, most recent last.
    pub recent_response_times: std::collections::VecDeque<Duration>,
}

impl MessageHandlerStats {
    const RESPONSE_TIME_WINDOW: usize = 100;

    fn record_response_time(&mut self, elapsed: Duration) {
        if self.recent_response_times.len() >= Self::RESPONSE_TIME_WINDOW {
            self.recent_response_times.pop_front();
        }
        self.recent_response_times.push_back(elapsed);
    }

    pub fn average_response_time(&self) -> Option<Duration> {
        if self.recent_response_times.is_empty() {
            return None;
        }
        let total: Duration = self.recent_response_times.iter().sum();
        Some(total / self.recent_response_times.len() as u32)
    }
}

/// Computes the backoff before retry attempt `n` (1-indexed): `min(1000 *
/// 2^(n-1), 10000)` milliseconds.
pub fn retry_backoff(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    Duration::from_millis(ms.min(10_000))
}

/// Tracks in-flight requests for one worker channel and matches incoming
/// responses back to their waiting caller.
pub struct MessageHandler {
    ids: IdGenerator,
    pending: HashMap<String, PendingRequest>,
    stats: MessageHandlerStats,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self { ids: IdGenerator::new(), pending: HashMap::new(), stats: MessageHandlerStats::default() }
    }

    pub fn stats(&self) -> &MessageHandlerStats {
        &self.stats
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Assign a fresh id to `envelope`, register it as pending, and return
    /// both the stamped envelope (for the caller to hand to the transport)
    /// and a future that resolves when the matching response arrives.
    pub fn prepare_send(&mut self, mut envelope: Envelope) -> (Envelope, oneshot::Receiver<Envelope>) {
        envelope.id = self.ids.next_id();
        let correlation_id = envelope.correlation_id.clone().unwrap_or_else(|| envelope.id.clone());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            envelope.id.clone(),
            PendingRequest { responder: tx, enqueued_at: Instant::now(), correlation_id, envelope: envelope.clone() },
        );
        self.stats.sent += 1;
        (envelope, rx)
    }

    /// Prepare a fire-and-forget envelope (no response expected): just
    /// assigns an id, registers nothing.
    pub fn prepare_fire_and_forget(&mut self, mut envelope: Envelope) -> Envelope {
        envelope.id = self.ids.next_id();
        envelope
    }

    /// Feed an incoming envelope from the worker. If it matches a pending
    /// request (`id` equals the request id, or `correlation_id` chains back
    /// to it through a retry), resolves that request's future and returns
    /// `None`. Otherwise the envelope is unsolicited (e.g. the worker's
    /// periodic status heartbeat) and is handed back to the caller to decide
    /// what to do with.
    pub fn on_incoming(&mut self, envelope: Envelope) -> Option<Envelope> {
        let key = envelope.correlation_id.clone().unwrap_or_else(|| envelope.id.clone());
        if let Some(pending) = self.pending.remove(&key) {
            self.stats.record_response_time(pending.enqueued_at.elapsed());
            self.stats.responded += 1;
            let _ = pending.responder.send(envelope);
            None
        } else if let Some(pending) = self.pending.remove(&envelope.id) {
            self.stats.record_response_time(pending.enqueued_at.elapsed());
            self.stats.responded += 1;
            let _ = pending.responder.send(envelope);
            None
        } else {
            Some(envelope)
        }
    }

    /// Cancel a single pending request by id, resolving its waiter with
    /// [`SupervisorError::Cancelled`] via a dropped sender (the receiver side
    /// observes a closed channel and should map that to `Cancelled`).
    pub fn cancel(&mut self, id: &str) -> bool {
        if let Some(pending) = self.pending.remove(id) {
            self.stats.cancelled += 1;
            drop(pending.responder);
            true
        } else {
            false
        }
    }

    /// Cancel every pending request whose chain-level correlation id matches
    /// `correlation_id` — used when abandoning a whole retry chain. A request
    /// that has never been retried is keyed by its own id (see
    /// `prepare_send`), so passing the original's id here still cancels it.
    pub fn cancel_by_correlation(&mut self, correlation_id: &str) -> usize {
        let matching: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.correlation_id == correlation_id)
            .map(|(id, _)| id.clone())
            .collect();
        let count = matching.len();
        for id in matching {
            self.cancel(&id);
        }
        count
    }

    /// Drop every pending request, e.g. on worker restart.
    pub fn clear(&mut self) {
        self.stats.cancelled += self.pending.len() as u64;
        self.pending.clear();
    }

    /// Sweep requests that have been pending longer than `timeout`, removing
    /// them and returning their original envelopes so the caller can decide
    /// whether to retry.
    pub fn sweep_timed_out(&mut self, timeout: Duration) -> Vec<Envelope> {
        let expired: Vec<String> =
            self.pending.iter().filter(|(_, p)| p.enqueued_at.elapsed() >= timeout).map(|(id, _)| id.clone()).collect();
        let mut envelopes = Vec::with_capacity(expired.len());
        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                self.stats.timed_out += 1;
                drop(pending.responder);
                envelopes.push(pending.envelope);
            }
        }
        envelopes
    }

    /// Build the next retry of `original`, honoring `max_retries`.
    pub fn prepare_retry(&mut self, original: &Envelope) -> SupervisorResult<Envelope> {
        if original.retry_count >= original.max_retries {
            return Err(SupervisorError::MaxAttemptsExceeded);
        }
        let mut retry = original.as_retry();
        retry.id = self.ids.next_id();
        Ok(retry)
    }
}

impl Default for MessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> Envelope {
        let mut e = Envelope::request(EnvelopeKind::Data, None);
        e.max_retries = 3;
        e
    }

    #[test]
    fn backoff_doubles_and_caps_at_ten_seconds() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(4), Duration::from_millis(8000));
        assert_eq!(retry_backoff(5), Duration::from_millis(10_000));
        assert_eq!(retry_backoff(10), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn response_resolves_matching_waiter() {
        let mut handler = MessageHandler::new();
        let (sent, rx) = handler.prepare_send(req());
        let response = Envelope::response(sent.id.clone(), EnvelopeKind::Success, None);
        assert!(handler.on_incoming(response).is_none());
        let received = rx.await.unwrap();
        assert_eq!(received.id, sent.id);
        assert_eq!(handler.stats().responded, 1);
    }

    #[test]
    fn unsolicited_envelope_with_no_matching_pending_is_returned_to_the_caller() {
        let mut handler = MessageHandler::new();
        let status = Envelope::request(EnvelopeKind::Status, None);
        let returned = handler.on_incoming(status.clone());
        assert!(returned.is_some());
        assert_eq!(returned.unwrap().kind, EnvelopeKind::Status);
        assert_eq!(handler.stats().responded, 0);
    }

    #[tokio::test]
    async fn cancel_drops_waiter_without_resolving() {
        let mut handler = MessageHandler::new();
        let (sent, rx) = handler.prepare_send(req());
        assert!(handler.cancel(&sent.id));
        assert!(rx.await.is_err());
        assert_eq!(handler.stats().cancelled, 1);
    }

    #[test]
    fn prepare_retry_rejects_once_max_retries_reached() {
        let mut handler = MessageHandler::new();
        let mut original = req();
        original.id = "orig".into();
        original.retry_count = 3;
        assert!(matches!(handler.prepare_retry(&original), Err(SupervisorError::MaxAttemptsExceeded)));
    }

    #[test]
    fn prepare_retry_preserves_correlation_id() {
        let mut handler = MessageHandler::new();
        let mut original = req();
        original.id = "orig".into();
        let retry = handler.prepare_retry(&original).unwrap();
        assert_eq!(retry.correlation_id.as_deref(), Some("orig"));
        assert_eq!(retry.retry_count, 1);
        assert_ne!(retry.id, "orig");
    }

    #[tokio::test]
    async fn cancel_by_correlation_cancels_an_in_flight_retry() {
        let mut handler = MessageHandler::new();
        let (sent, rx) = handler.prepare_send(req());
        let retry_envelope = handler.prepare_retry(&sent).unwrap();
        let (retry_sent, retry_rx) = handler.prepare_send(retry_envelope);
        assert_ne!(retry_sent.id, sent.id);

        assert_eq!(handler.pending_count(), 2);
        let cancelled = handler.cancel_by_correlation(&sent.id);
        assert_eq!(cancelled, 2);
        assert_eq!(handler.pending_count(), 0);
        assert!(rx.await.is_err());
        assert!(retry_rx.await.is_err());
    }

    #[tokio::test]
    async fn cancel_by_correlation_cancels_an_unretried_original() {
        let mut handler = MessageHandler::new();
        let (sent, rx) = handler.prepare_send(req());
        assert_eq!(handler.cancel_by_correlation(&sent.id), 1);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn sweep_times_out_stale_requests() {
        tokio::time::pause();
        let mut handler = MessageHandler::new();
        let (_, rx) = handler.prepare_send(req());
        tokio::time::advance(Duration::from_secs(5)).await;
        let expired = handler.sweep_timed_out(Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].kind, EnvelopeKind::Data);
        assert!(rx.await.is_err());
        assert_eq!(handler.stats().timed_out, 1);
    }
}
