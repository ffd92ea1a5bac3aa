//! C4 — Ruleset Registry.
//!
//! Country-partitioned, atomic-swap in-memory cache of compiled rulesets.
//! Each `(country, ruleset_key)` slot is an independent `ArcSwap` —
//! lock-free read / replace-the-pointer, readers never block on a writer,
//! and a swap is a single atomic pointer replace (spec §4.3, P2).

use crate::fraud::compile::CustomFieldSet;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::loader::RulesetLoader;
use crate::fraud::ruleset::CompiledRuleset;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub type Country = String;
pub type RulesetKey = String;

const GLOBAL_COUNTRY: &str = "global";

#[derive(Debug)]
pub struct HotSwapFailure {
    pub reason: String,
}

pub struct RulesetRegistry {
    slots: DashMap<(Country, RulesetKey), Arc<ArcSwap<CompiledRuleset>>>,
}

impl RulesetRegistry {
    pub fn new() -> Self {
        RulesetRegistry { slots: DashMap::new() }
    }

    /// Wait-free, single pointer read.
    pub fn get(&self, country: &str, key: &str) -> Option<Arc<CompiledRuleset>> {
        self.slots
            .get(&(country.to_string(), key.to_string()))
            .map(|slot| slot.load_full())
    }

    /// Tries `country`, then falls back to `"global"` (spec §4.3).
    pub fn get_with_fallback(&self, country: &str, key: &str) -> Option<Arc<CompiledRuleset>> {
        self.get(country, key).or_else(|| self.get(GLOBAL_COUNTRY, key))
    }

    /// Loads and validates a new version, then atomically replaces the
    /// pointer. On failure, returns the reason and leaves the prior value
    /// untouched — never a partial failure (spec §4.3, P2, scenario 4).
    pub async fn hot_swap(
        &self,
        country: &str,
        key: &str,
        loader: &RulesetLoader,
        registry: &FieldRegistry,
        custom_fields: &CustomFieldSet,
    ) -> Result<i64, HotSwapFailure> {
        let compiled = loader
            .load(country, key, registry, custom_fields)
            .await
            .map_err(|e| HotSwapFailure { reason: e.to_string() })?;
        let version = compiled.version;
        let slot_key = (country.to_string(), key.to_string());
        let slot = self
            .slots
            .entry(slot_key)
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(empty_ruleset(key))))
            .clone();
        slot.store(Arc::new(compiled));
        info!(country, ruleset_key = key, version, "ruleset hot-swapped");
        Ok(version)
    }

    pub fn loaded_version(&self, country: &str, key: &str) -> Option<i64> {
        self.get(country, key).map(|rs| rs.version)
    }
}

impl Default for RulesetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_ruleset(key: &str) -> CompiledRuleset {
    CompiledRuleset::new(key.to_string(), 0, format!("{}-0", key), "AUTH".to_string(), Vec::new())
}
