//! C6 — Velocity Counter Service.
//!
//! Atomic increment-with-TTL against Redis via a single server-side script
//! (spec §4.5), wrapped in the generic `CircuitBreaker` from
//! `crate::fraud::circuit` and a bounded per-call timeout so a slow or
//! unreachable Redis degrades the request path instead of hanging it.

use crate::fraud::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::fraud::error::VelocityError;
use crate::fraud::model::{VelocityConfig, VelocityResult};
use redis::aio::ConnectionManager;
use redis::{Script, Value as RedisValue};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ENCODED_VALUE_LEN: usize = 64;

/// `count := INCR(key); if count == 1 { EXPIRE(key, window) }; exceeded :=
/// count >= threshold` — the exact atomic semantics from spec §4.5,
/// executed server-side in one round trip.
const VELOCITY_SCRIPT_SOURCE: &str = r#"
local count = redis.call('INCR', KEYS[1])
if tonumber(count) == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
local exceeded = 0
if tonumber(count) >= tonumber(ARGV[2]) then
  exceeded = 1
end
return {count, exceeded}
"#;

pub struct VelocityService {
    conn: ConnectionManager,
    script: Script,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl VelocityService {
    pub async fn connect(redis_url: &str) -> Result<Self, VelocityError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(VelocityService {
            conn,
            script: Script::new(VELOCITY_SCRIPT_SOURCE),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads the script once at startup so request-path calls always hit
    /// `EVALSHA` (spec §4.9 gate 4).
    pub async fn preload_script(&mut self) -> Result<(), VelocityError> {
        self.script.prepare_invoke().load_async(&mut self.conn).await?;
        Ok(())
    }

    pub fn circuit_state(&self) -> crate::fraud::circuit::CircuitState {
        self.breaker.state()
    }

    /// Atomic increment-with-TTL. Fails safe (count=0, exceeded=false) when
    /// the circuit is open; the caller (the evaluator) is responsible for
    /// marking the response `FAIL_OPEN`/`DEGRADED` with `REDIS_UNAVAILABLE`.
    pub async fn check(
        &mut self,
        dimension_value: &str,
        config: &VelocityConfig,
    ) -> Result<VelocityResult, VelocityError> {
        if !self.breaker.allow_request() {
            return Err(VelocityError::CircuitOpen);
        }

        let key = derive_key(&config.dimension, dimension_value);
        let result = tokio::time::timeout(
            self.timeout,
            run_script_with_retry(
                &self.script,
                &mut self.conn,
                &key,
                config.window_seconds,
                config.threshold,
            ),
        )
        .await;

        match result {
            Ok(Ok((count, exceeded))) => {
                self.breaker.record_success();
                Ok(VelocityResult {
                    dimension: config.dimension.clone(),
                    dimension_value: dimension_value.to_string(),
                    count,
                    threshold: config.threshold,
                    window_seconds: config.window_seconds,
                    exceeded,
                })
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(VelocityError::Timeout)
            }
        }
    }

    /// Read current count without mutating it.
    pub async fn read_only(
        &mut self,
        dimension_value: &str,
        config: &VelocityConfig,
    ) -> Result<VelocityResult, VelocityError> {
        let key = derive_key(&config.dimension, dimension_value);
        let count: Option<u64> = tokio::time::timeout(
            self.timeout,
            redis::cmd("GET").arg(&key).query_async(&mut self.conn),
        )
        .await
        .map_err(|_| VelocityError::Timeout)??;
        let count = count.unwrap_or(0);
        Ok(VelocityResult {
            dimension: config.dimension.clone(),
            dimension_value: dimension_value.to_string(),
            count,
            threshold: config.threshold,
            window_seconds: config.window_seconds,
            exceeded: count >= config.threshold as u64,
        })
    }

    /// Read-only survey across a fixed set of `(dimension, window,
    /// threshold)` tuples for the outbox event payload (spec §4.5). Safe to
    /// call off the request path; failures are swallowed per-tuple rather
    /// than failing the whole snapshot.
    pub async fn snapshot(
        &mut self,
        dimension_value: &str,
        configs: &[VelocityConfig],
    ) -> HashMap<String, VelocityResult> {
        let mut out = HashMap::with_capacity(configs.len());
        for config in configs {
            if let Ok(result) = self.read_only(dimension_value, config).await {
                out.insert(config.dimension.clone(), result);
            }
        }
        out
    }
}

async fn run_script_with_retry(
    script: &Script,
    conn: &mut ConnectionManager,
    key: &str,
    window_seconds: u32,
    threshold: u32,
) -> Result<(u64, bool), VelocityError> {
    match invoke_script(script, conn, key, window_seconds, threshold).await {
        Ok(v) => Ok(v),
        Err(e) if is_noscript(&e) => {
            debug!("velocity script evicted (NOSCRIPT), reloading and retrying once");
            script.prepare_invoke().load_async(conn).await?;
            match invoke_script(script, conn, key, window_seconds, threshold).await {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!("velocity script retry failed, falling back to INCR+EXPIRE pair");
                    fallback_incr_expire(conn, key, window_seconds, threshold).await
                }
            }
        }
        Err(_) => fallback_incr_expire(conn, key, window_seconds, threshold).await,
    }
}

async fn invoke_script(
    script: &Script,
    conn: &mut ConnectionManager,
    key: &str,
    window_seconds: u32,
    threshold: u32,
) -> Result<(u64, bool), redis::RedisError> {
    let raw: RedisValue = script
        .key(key)
        .arg(window_seconds)
        .arg(threshold)
        .invoke_async(conn)
        .await?;
    decode_script_result(raw)
}

fn decode_script_result(value: RedisValue) -> Result<(u64, bool), redis::RedisError> {
    if let RedisValue::Bulk(items) = value {
        if items.len() == 2 {
            if let (RedisValue::Int(count), RedisValue::Int(exceeded)) = (&items[0], &items[1]) {
                return Ok((*count as u64, *exceeded != 0));
            }
        }
    }
    Ok((0, false))
}

/// Two-command fallback when the script path itself cannot be used (spec
/// §4.5: "falls back to two separate commands"). Not linearizable with
/// concurrent callers the way the script is, but only exercised when the
/// script mechanism is unavailable.
async fn fallback_incr_expire(
    conn: &mut ConnectionManager,
    key: &str,
    window_seconds: u32,
    threshold: u32,
) -> Result<(u64, bool), VelocityError> {
    let count: u64 = redis::cmd("INCR").arg(key).query_async(conn).await?;
    if count == 1 {
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .query_async(conn)
            .await?;
    }
    Ok((count, count >= threshold as u64))
}

fn is_noscript(err: &redis::RedisError) -> bool {
    err.to_string().contains("NOSCRIPT")
}

/// `vel:global:{dimension}:{encoded_value}` — non-allowed bytes replaced
/// with `_`, truncated at 64 bytes (spec §4.5).
fn derive_key(dimension: &str, value: &str) -> String {
    let mut encoded: String = value
        .bytes()
        .map(|b| {
            let c = b as char;
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if encoded.len() > MAX_ENCODED_VALUE_LEN {
        encoded.truncate(MAX_ENCODED_VALUE_LEN);
    }
    format!("vel:global:{}:{}", dimension, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_replaces_disallowed_bytes_and_truncates() {
        let long = "a".repeat(100);
        let key = derive_key("card_hash", &long);
        assert!(key.starts_with("vel:global:card_hash:"));
        assert_eq!(key.len(), "vel:global:card_hash:".len() + MAX_ENCODED_VALUE_LEN);
    }

    #[test]
    fn derive_key_sanitizes_special_bytes() {
        let key = derive_key("card_hash", "a b/c!d");
        assert_eq!(key, "vel:global:card_hash:a_b_c_d");
    }
}
