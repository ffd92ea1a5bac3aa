//! Engine configuration, following `models::Config::from_env`'s exact
//! shape: `dotenv().ok()` first, then `std::env::var` with
//! fallbacks/parses, never panicking on a missing optional variable.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind_addr: SocketAddr,

    pub redis_url: String,
    pub kafka_bootstrap_servers: String,

    pub s3_endpoint_url: Option<String>,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub ruleset_bucket: String,
    pub ruleset_path_prefix: String,
    pub ruleset_environment: String,

    pub outbox_stream_key: String,
    pub outbox_consumer_group: String,
    pub outbox_consumer_name: String,
    pub outbox_maxlen: i64,
    pub outbox_redis_timeout: Duration,

    pub load_shed_enabled: bool,
    pub load_shed_max_concurrent: usize,

    pub hot_reload_poll_interval: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        EngineConfig {
            bind_addr: env_parse("BIND_ADDR", "0.0.0.0:8080"),
            metrics_bind_addr: env_parse("METRICS_BIND_ADDR", "0.0.0.0:9090"),

            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            kafka_bootstrap_servers: env_string("KAFKA_BOOTSTRAP_SERVERS", "127.0.0.1:9092"),

            s3_endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            s3_region: env_string("S3_REGION", "us-east-1"),
            s3_access_key: env_string("S3_ACCESS_KEY", ""),
            s3_secret_key: env_string("S3_SECRET_KEY", ""),
            ruleset_bucket: env_string("RULESET_BUCKET", "cardguard-rulesets"),
            ruleset_path_prefix: env_string("RULESET_PATH_PREFIX", "rulesets"),
            ruleset_environment: env_string("RULESET_ENVIRONMENT", "prod"),

            outbox_stream_key: env_string("OUTBOX_STREAM_KEY", "cardguard:outbox"),
            outbox_consumer_group: env_string("OUTBOX_CONSUMER_GROUP", "cardguard-publishers"),
            outbox_consumer_name: env_string(
                "OUTBOX_CONSUMER_NAME",
                &format!("cardguard-{}", uuid::Uuid::new_v4()),
            ),
            outbox_maxlen: env_parse("OUTBOX_MAXLEN", "200000"),
            outbox_redis_timeout: Duration::from_secs(env_parse("OUTBOX_REDIS_TIMEOUT_SECONDS", "5")),

            load_shed_enabled: env_parse("LOAD_SHED_ENABLED", "true"),
            load_shed_max_concurrent: env_parse("LOAD_SHED_MAX_CONCURRENT", "512"),

            hot_reload_poll_interval: Duration::from_secs(30),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| default.parse().ok().expect("default value must parse"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_string_falls_back_to_default_when_unset() {
        std::env::remove_var("CARDGUARD_TEST_VAR_UNSET");
        assert_eq!(env_string("CARDGUARD_TEST_VAR_UNSET", "fallback"), "fallback");
    }

    #[test]
    fn env_parse_parses_bools_and_numbers() {
        let b: bool = env_parse("CARDGUARD_TEST_BOOL_UNSET", "true");
        assert!(b);
        let n: i64 = env_parse("CARDGUARD_TEST_NUM_UNSET", "200000");
        assert_eq!(n, 200_000);
    }
}
