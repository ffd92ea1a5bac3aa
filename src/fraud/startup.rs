//! Startup Loader (spec §4.9). Blocks readiness until all four gates pass;
//! partial startup is not permitted — any gate failure aborts the whole
//! sequence with a descriptive error rather than leaving the process half
//! ready.

use crate::fraud::compile::CustomFieldSet;
use crate::fraud::config::EngineConfig;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::loader::RulesetLoader;
use crate::fraud::outbox::publisher::{ensure_consumer_group, PublisherConfig};
use crate::fraud::registry::{Country, RulesetKey, RulesetRegistry};
use crate::fraud::velocity::VelocityService;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("field registry unavailable: {0}")]
    FieldRegistry(String),
    #[error("required ruleset {0:?} failed to load: {1}")]
    Ruleset((Country, RulesetKey), String),
    #[error("could not ensure outbox consumer group: {0}")]
    ConsumerGroup(String),
    #[error("could not preload velocity script: {0}")]
    VelocityScript(String),
}

pub struct StartupLoader {
    ready: Arc<AtomicBool>,
}

impl StartupLoader {
    pub fn new() -> Self {
        StartupLoader {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn readiness_handle(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Runs all four gates in order. Any failure returns immediately; the
    /// caller (main.rs) must treat this as a hard startup failure, never a
    /// degraded-but-serving state.
    pub async fn run(
        &self,
        config: &EngineConfig,
        registry: &RulesetRegistry,
        field_registry: &FieldRegistry,
        custom_fields: &CustomFieldSet,
        loader: &RulesetLoader,
        required_rulesets: &[(Country, RulesetKey)],
        redis_conn: &mut ConnectionManager,
        velocity: &mut VelocityService,
    ) -> Result<(), StartupError> {
        info!("startup: gate 1/4 field registry");
        if field_registry.slot_count() == 0 {
            return Err(StartupError::FieldRegistry("empty field registry".to_string()));
        }

        info!("startup: gate 2/4 required rulesets");
        for (country, key) in required_rulesets {
            registry
                .hot_swap(country, key, loader, field_registry, custom_fields)
                .await
                .map_err(|e| StartupError::Ruleset((country.clone(), key.clone()), e.reason))?;
            let non_empty = registry
                .get(country, key)
                .map(|rs| !rs.rules_sorted.is_empty())
                .unwrap_or(false);
            if !non_empty {
                return Err(StartupError::Ruleset(
                    (country.clone(), key.clone()),
                    "resolved to an empty ruleset".to_string(),
                ));
            }
        }

        info!("startup: gate 3/4 outbox consumer group");
        let publisher_config = PublisherConfig {
            stream_key: config.outbox_stream_key.clone(),
            consumer_group: config.outbox_consumer_group.clone(),
            consumer_name: config.outbox_consumer_name.clone(),
            block_timeout: config.outbox_redis_timeout,
            kafka_topic: config.outbox_stream_key.clone(),
        };
        ensure_consumer_group(redis_conn, &publisher_config)
            .await
            .map_err(|e| StartupError::ConsumerGroup(e.to_string()))?;

        info!("startup: gate 4/4 velocity script preload");
        velocity
            .preload_script()
            .await
            .map_err(|e| StartupError::VelocityScript(e.to_string()))?;

        self.ready.store(true, Ordering::Release);
        info!("startup complete, readiness gates all passed");
        Ok(())
    }
}

impl Default for StartupLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_starts_false() {
        let loader = StartupLoader::new();
        assert!(!loader.readiness_handle().load(Ordering::Acquire));
    }
}
