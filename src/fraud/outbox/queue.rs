//! C8 — Async Durability Queue.
//!
//! A bounded MPSC channel sitting directly on the request path. `enqueue`
//! never awaits: it is `try_send` or drop, mirroring `edge::receiver`'s
//! non-blocking socket send path and its atomic drop/success bookkeeping
//! (`EdgeReceiverStats`).

use crate::fraud::model::OutboxEvent;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
pub struct QueueStats {
    pub enqueued_ok: AtomicU64,
    pub enqueued_dropped: AtomicU64,
    pub shutdown_dropped: AtomicU64,
}

pub struct OutboxQueue {
    tx: Sender<OutboxEvent>,
    stats: std::sync::Arc<QueueStats>,
}

impl OutboxQueue {
    pub fn bounded(capacity: usize) -> (Self, Receiver<OutboxEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (
            OutboxQueue {
                tx,
                stats: std::sync::Arc::new(QueueStats::default()),
            },
            rx,
        )
    }

    pub fn stats(&self) -> std::sync::Arc<QueueStats> {
        self.stats.clone()
    }

    /// Never blocks the request thread. Returns whether the event was
    /// accepted; callers don't act on the result beyond metrics/logging.
    pub fn enqueue(&self, event: OutboxEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.enqueued_ok.fetch_add(1, Ordering::Relaxed);
                counter!("async_enqueue_ok").increment(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.enqueued_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!("async_enqueue_dropped").increment(1);
                if dropped % 100 == 1 {
                    warn!(dropped, "outbox queue full, dropping decision event");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("outbox queue closed, writer has shut down");
                false
            }
        }
    }

    /// Drains whatever remains at a hard shutdown deadline, counting it as
    /// a shutdown-drop rather than a persist failure (spec §5
    /// "Cancellation").
    pub fn mark_shutdown_drop(&self, count: u64) {
        self.stats.shutdown_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn clone_sender(&self) -> Sender<OutboxEvent> {
        self.tx.clone()
    }
}

impl Clone for OutboxQueue {
    fn clone(&self) -> Self {
        OutboxQueue {
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::model::{Action, Decision, EngineMode};
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn event() -> OutboxEvent {
        OutboxEvent {
            transaction_context_snapshot: crate::fraud::model::TransactionContext {
                transaction_id: "tx1".into(),
                card_hash: "h".into(),
                amount: 1.0,
                currency: "USD".into(),
                country_code: "US".into(),
                merchant_category_code: "5411".into(),
                card_network: "VISA".into(),
                card_bin: "411111".into(),
                card_logo: "VISA".into(),
                ip_address: None,
                device_id: None,
                timestamp: Utc::now(),
                custom: Default::default(),
                slots: Vec::new(),
            },
            auth_decision: Decision {
                decision_id: "d1".into(),
                transaction_id: "tx1".into(),
                decision: Action::Approve,
                engine_mode: EngineMode::Normal,
                engine_error_code: None,
                ruleset_key: "CARD_AUTH".into(),
                ruleset_version: 1,
                processing_time_ms: 0.5,
                matched_rules: Vec::new(),
                velocity_results: Vec::new(),
            },
            occurred_at: Utc::now(),
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn enqueue_succeeds_until_capacity_then_drops() {
        let (queue, _rx) = OutboxQueue::bounded(2);
        assert!(queue.enqueue(event()));
        assert!(queue.enqueue(event()));
        assert!(!queue.enqueue(event()));
        let stats = queue.stats();
        assert_eq!(stats.enqueued_ok.load(Ordering::Relaxed), 2);
        assert_eq!(stats.enqueued_dropped.load(Ordering::Relaxed), 1);
    }
}
