//! C9 — Outbox Writer.
//!
//! Drains the async queue in bursts and appends each event to the durable
//! stream (`XADD ... MAXLEN ~ N`). Exponential backoff on append failure
//! follows the reconnect-loop idiom in `scrapers::binance_session`.

use metrics::counter;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::fraud::model::OutboxEvent;
use crate::fraud::outbox::queue::QueueStats;

const DEFAULT_BURST: usize = 64;
const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct WriterConfig {
    pub stream_key: String,
    pub maxlen: i64,
    pub burst_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            stream_key: "cardguard:outbox".to_string(),
            maxlen: 200_000,
            burst_size: DEFAULT_BURST,
        }
    }
}

/// Runs until `rx` is closed or a shutdown signal arrives. Never panics on
/// a single append failure; backs off and continues so a transient Redis
/// blip doesn't kill the worker. On shutdown, whatever is still sitting in
/// `rx` is counted as a shutdown-drop rather than silently discarded.
pub async fn run(
    mut rx: Receiver<OutboxEvent>,
    mut conn: ConnectionManager,
    config: WriterConfig,
    stats: Arc<QueueStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(stream_key = %config.stream_key, "outbox writer starting");
    let mut backoff = MIN_BACKOFF;

    loop {
        let first = tokio::select! {
            maybe_event = rx.recv() => match maybe_event {
                Some(event) => event,
                None => {
                    info!("outbox writer shutting down, queue closed");
                    return;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    drain_as_shutdown_drop(&mut rx, &stats);
                    info!("outbox writer stopped");
                    return;
                }
                continue;
            }
        };
        let mut burst = Vec::with_capacity(config.burst_size);
        burst.push(first);
        while burst.len() < config.burst_size {
            match rx.try_recv() {
                Ok(event) => burst.push(event),
                Err(_) => break,
            }
        }

        for event in burst.drain(..) {
            match append_event(&mut conn, &config, &event).await {
                Ok(()) => {
                    counter!("outbox_xadd_success").increment(1);
                    backoff = MIN_BACKOFF;
                }
                Err(e) => {
                    counter!("outbox_xadd_failure").increment(1);
                    warn!(error = %e, "outbox append failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Counts everything still queued at shutdown as lost rather than leaving
/// it unaccounted for in `QueueStats`.
fn drain_as_shutdown_drop(rx: &mut Receiver<OutboxEvent>, stats: &QueueStats) {
    let mut drained = 0u64;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    if drained > 0 {
        warn!(drained, "outbox writer dropping events still queued at shutdown");
        stats.mark_shutdown_drop(drained);
    }
}

async fn append_event(
    conn: &mut ConnectionManager,
    config: &WriterConfig,
    event: &OutboxEvent,
) -> Result<(), redis::RedisError> {
    let payload = serde_json::to_string(event).map_err(|e| {
        error!(error = %e, "failed to serialize outbox event, this should never happen");
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialize failure"))
    })?;
    let _id: String = redis::cmd("XADD")
        .arg(&config.stream_key)
        .arg("MAXLEN")
        .arg("~")
        .arg(config.maxlen)
        .arg("*")
        .arg("payload")
        .arg(payload)
        .query_async(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::model::{Action, Decision, EngineMode};
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = WriterConfig::default();
        assert_eq!(cfg.maxlen, 200_000);
        assert_eq!(cfg.burst_size, 64);
    }

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

    #[tokio::test]
    async fn drain_as_shutdown_drop_counts_remaining_events() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        tx.try_send(event()).unwrap();
        tx.try_send(event()).unwrap();
        let stats = Arc::new(QueueStats::default());

        drain_as_shutdown_drop(&mut rx, &stats);

        assert_eq!(stats.shutdown_dropped.load(Ordering::Relaxed), 2);
        assert!(rx.try_recv().is_err());
    }
}
