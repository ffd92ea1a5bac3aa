//! C10 — Outbox Publisher.
//!
//! Consumes the durable stream's consumer group with a blocking read,
//! publishes each entry to the event bus with full durability, and `XACK`s
//! only once the broker has confirmed delivery. Producer construction uses
//! the idempotent/acks-all configuration for exactly-once-ish delivery to
//! the event bus.

use metrics::counter;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct PublisherConfig {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub block_timeout: Duration,
    pub kafka_topic: String,
}

pub fn build_producer(bootstrap_servers: &str) -> Result<FutureProducer, rdkafka::error::KafkaError> {
    ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "5")
        .set("message.timeout.ms", "30000")
        .create()
}

/// Creates the consumer group with `MKSTREAM`, ignoring a "BUSYGROUP
/// already exists" error (spec §4.9 gate 3).
pub async fn ensure_consumer_group(conn: &mut ConnectionManager, config: &PublisherConfig) -> RedisResult<()> {
    let result: RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&config.stream_key)
        .arg(&config.consumer_group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Runs until cancelled. Loops: blocking `XREADGROUP` -> publish each entry
/// to Kafka -> `XACK` on delivery confirmation. Entries that fail to
/// publish are left pending for the reclaimer (spec §4.6).
pub async fn run(
    mut conn: ConnectionManager,
    producer: FutureProducer,
    config: PublisherConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!(
        stream_key = %config.stream_key,
        group = %config.consumer_group,
        "outbox publisher starting"
    );

    loop {
        if *shutdown.borrow() {
            info!("outbox publisher draining final ack before shutdown");
        }

        let entries = tokio::select! {
            res = read_group(&mut conn, &config) => res,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("outbox publisher stopped");
                    return;
                }
                continue;
            }
        };

        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "XREADGROUP failed, retrying after short delay");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        for (entry_id, payload) in entries {
            match publish_one(&producer, &config.kafka_topic, &payload).await {
                Ok(()) => {
                    let _: RedisResult<()> = redis::cmd("XACK")
                        .arg(&config.stream_key)
                        .arg(&config.consumer_group)
                        .arg(&entry_id)
                        .query_async(&mut conn)
                        .await;
                }
                Err(e) => {
                    counter!("outbox_publish_failure").increment(1);
                    error!(error = %e, entry_id, "event bus publish failed, leaving entry pending for reclaim");
                }
            }
        }
    }
}

async fn read_group(
    conn: &mut ConnectionManager,
    config: &PublisherConfig,
) -> RedisResult<Vec<(String, String)>> {
    let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg(&config.consumer_group)
        .arg(&config.consumer_name)
        .arg("COUNT")
        .arg(64)
        .arg("BLOCK")
        .arg(config.block_timeout.as_millis() as i64)
        .arg("STREAMS")
        .arg(&config.stream_key)
        .arg(">")
        .query_async(conn)
        .await?;

    let mut out = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            if let Some(redis::Value::Data(bytes)) = id.map.get("payload") {
                if let Ok(payload) = String::from_utf8(bytes.clone()) {
                    out.push((id.id.clone(), payload));
                }
            }
        }
    }
    Ok(out)
}

async fn publish_one(
    producer: &FutureProducer,
    topic: &str,
    payload: &str,
) -> Result<(), rdkafka::error::KafkaError> {
    let transaction_id = extract_transaction_id(payload).unwrap_or_default();
    let record: FutureRecord<'_, str, str> = FutureRecord::to(topic)
        .key(&transaction_id)
        .payload(payload);
    match producer.send(record, Duration::from_secs(10)).await {
        Ok(_) => Ok(()),
        Err((e, _)) => Err(e),
    }
}

fn extract_transaction_id(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .get("auth_decision")?
        .get("transaction_id")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_transaction_id_reads_nested_field() {
        let payload = r#"{"auth_decision":{"transaction_id":"tx-42"}}"#;
        assert_eq!(extract_transaction_id(payload).as_deref(), Some("tx-42"));
    }

    #[test]
    fn extract_transaction_id_missing_returns_none() {
        assert_eq!(extract_transaction_id("{}"), None);
    }
}
