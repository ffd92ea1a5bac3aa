//! C11 — Pending Reclaimer.
//!
//! Periodically claims stream entries that have sat pending longer than
//! `min_idle_ms`, handing them back to this consumer so the publisher picks
//! them up again (spec §4.6).

use metrics::counter;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

pub struct ReclaimConfig {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub min_idle: Duration,
    pub batch: usize,
    pub poll_interval: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        ReclaimConfig {
            stream_key: "cardguard:outbox".to_string(),
            consumer_group: "cardguard-publishers".to_string(),
            consumer_name: "unset".to_string(),
            min_idle: Duration::from_secs(60),
            batch: 50,
            poll_interval: Duration::from_secs(30),
        }
    }
}

pub async fn run(mut conn: ConnectionManager, config: ReclaimConfig, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    info!(stream_key = %config.stream_key, "pending reclaimer starting");
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reclaim_once(&mut conn, &config).await {
                    warn!(error = %e, "XAUTOCLAIM failed this cycle");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("pending reclaimer stopped");
                    return;
                }
            }
        }
    }
}

async fn reclaim_once(conn: &mut ConnectionManager, config: &ReclaimConfig) -> redis::RedisResult<()> {
    let reply: redis::Value = redis::cmd("XAUTOCLAIM")
        .arg(&config.stream_key)
        .arg(&config.consumer_group)
        .arg(&config.consumer_name)
        .arg(config.min_idle.as_millis() as i64)
        .arg("0-0")
        .arg("COUNT")
        .arg(config.batch)
        .query_async(conn)
        .await?;

    let claimed = count_claimed_ids(&reply);
    if claimed > 0 {
        counter!("outbox_reclaimed_total").increment(claimed as u64);
        info!(claimed, "reclaimed pending outbox entries");
    }
    Ok(())
}

fn count_claimed_ids(reply: &redis::Value) -> usize {
    if let redis::Value::Bulk(items) = reply {
        if items.len() >= 2 {
            if let redis::Value::Bulk(ids) = &items[1] {
                return ids.len();
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = ReclaimConfig::default();
        assert_eq!(cfg.min_idle, Duration::from_secs(60));
        assert_eq!(cfg.batch, 50);
    }
}
