//! C13 — Hot-Reload Watcher.
//!
//! Periodically re-reads each tracked `(country, key)` manifest and
//! triggers `RulesetRegistry::hot_swap` when a newer version is published.
//! Never blocks the evaluation path and never touches a lock the evaluator
//! holds — the registry's `ArcSwap` slots have none.

use crate::fraud::compile::CustomFieldSet;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::loader::RulesetLoader;
use crate::fraud::registry::{Country, RulesetKey, RulesetRegistry};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub tracked: Vec<(Country, RulesetKey)>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            tracked: Vec::new(),
        }
    }
}

pub async fn run(
    registry: Arc<RulesetRegistry>,
    loader: Arc<RulesetLoader>,
    field_registry: Arc<FieldRegistry>,
    custom_fields: Arc<CustomFieldSet>,
    config: WatcherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(tracked = config.tracked.len(), "hot-reload watcher starting");
    let mut ticker = tokio::time::interval(config.poll_interval);
    let mut known_versions: HashMap<(Country, RulesetKey), i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (country, key) in &config.tracked {
                    poll_one(&registry, &loader, &field_registry, &custom_fields, country, key, &mut known_versions).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("hot-reload watcher stopped");
                    return;
                }
            }
        }
    }
}

async fn poll_one(
    registry: &RulesetRegistry,
    loader: &RulesetLoader,
    field_registry: &FieldRegistry,
    custom_fields: &CustomFieldSet,
    country: &str,
    key: &str,
    known_versions: &mut HashMap<(Country, RulesetKey), i64>,
) {
    let loaded = match loader.load(country, key, field_registry, custom_fields).await {
        Ok(compiled) => compiled,
        Err(e) => {
            counter!("hot_reload_failure_total").increment(1);
            error!(country, ruleset_key = key, error = %e, "hot-reload manifest fetch failed");
            return;
        }
    };

    let slot_key = (country.to_string(), key.to_string());
    let current = known_versions.get(&slot_key).copied().unwrap_or(-1);
    if loaded.version <= current {
        return;
    }

    match registry
        .hot_swap(country, key, loader, field_registry, custom_fields)
        .await
    {
        Ok(version) => {
            counter!("hot_reload_success_total").increment(1);
            known_versions.insert(slot_key, version);
            info!(country, ruleset_key = key, version, "hot-reload swap applied");
        }
        Err(e) => {
            counter!("hot_reload_failure_total").increment(1);
            error!(country, ruleset_key = key, reason = %e.reason, "hot-reload swap failed, keeping previous version");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_interval_matches_spec() {
        assert_eq!(WatcherConfig::default().poll_interval, Duration::from_secs(30));
    }
}
