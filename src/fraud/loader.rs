//! C5 — Compiled Ruleset Loader.
//!
//! Fetch manifest -> fetch artifact -> verify checksum -> parse -> compile
//! (C2 per rule) -> presort -> construct `CompiledRuleset` (spec §4.2).

use crate::fraud::compile::{compile_condition, CustomFieldSet};
use crate::fraud::error::LoaderError;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::model::{Manifest, RulesetArtifact};
use crate::fraud::object_store::ObjectStore;
use crate::fraud::ruleset::{CompiledRule, CompiledRuleset};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RulesetLoader {
    store: Arc<dyn ObjectStore>,
    environment: String,
}

impl RulesetLoader {
    pub fn new(store: Arc<dyn ObjectStore>, environment: String) -> Self {
        RulesetLoader { store, environment }
    }

    /// Loads `(country, ruleset_key)`, trying the country-partitioned path
    /// first and falling back to the legacy global path (spec §4.2).
    pub async fn load(
        &self,
        country: &str,
        ruleset_key: &str,
        registry: &FieldRegistry,
        custom_fields: &CustomFieldSet,
    ) -> Result<CompiledRuleset, LoaderError> {
        let manifest = match self.fetch_manifest(country, ruleset_key).await {
            Ok(m) => m,
            Err(LoaderError::ManifestNotFound(_)) => {
                warn!(
                    country,
                    ruleset_key, "country manifest not found, falling back to global path"
                );
                self.fetch_manifest("global", ruleset_key).await?
            }
            Err(e) => return Err(e),
        };
        self.load_manifest(manifest, registry, custom_fields).await
    }

    async fn fetch_manifest(&self, country: &str, ruleset_key: &str) -> Result<Manifest, LoaderError> {
        let path = format!(
            "rulesets/{}/{}/{}/manifest.json",
            self.environment, country, ruleset_key
        );
        let bytes = self
            .store
            .get(&path)
            .await
            .map_err(|_| LoaderError::ManifestNotFound(path.clone()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if manifest.schema_version != "2.0" {
            return Err(LoaderError::SchemaIncompatible(manifest.schema_version));
        }
        Ok(manifest)
    }

    async fn load_manifest(
        &self,
        manifest: Manifest,
        registry: &FieldRegistry,
        custom_fields: &CustomFieldSet,
    ) -> Result<CompiledRuleset, LoaderError> {
        let artifact_bytes = self
            .store
            .get(&manifest.artifact_uri)
            .await
            .map_err(|_| LoaderError::ArtifactNotFound(manifest.artifact_uri.clone()))?;

        verify_checksum(&artifact_bytes, &manifest.checksum)?;

        let artifact: RulesetArtifact = serde_json::from_slice(&artifact_bytes)?;

        let mut compiled_rules = Vec::with_capacity(artifact.rules.len());
        for raw in &artifact.rules {
            let predicate = compile_condition(&raw.condition, registry, custom_fields)?;
            compiled_rules.push(CompiledRule {
                rule_id: raw.rule_id.clone(),
                priority: raw.priority,
                enabled: raw.enabled,
                scope: raw.scope.clone(),
                predicate,
                action: raw.action,
                decision_reason: raw
                    .decision_reason
                    .clone()
                    .unwrap_or_else(|| raw.rule_id.clone()),
                velocity: raw.velocity.clone(),
            });
        }

        info!(
            ruleset_key = %manifest.ruleset_key,
            version = manifest.ruleset_version,
            rules = compiled_rules.len(),
            "compiled ruleset"
        );

        Ok(CompiledRuleset::new(
            manifest.ruleset_key.clone(),
            manifest.ruleset_version,
            format!("{}-{}", manifest.ruleset_key, manifest.ruleset_version),
            artifact.execution_mode.unwrap_or_else(|| "AUTH".to_string()),
            compiled_rules,
        ))
    }
}

fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), LoaderError> {
    let digest = Sha256::digest(bytes);
    let actual = format!("sha256:{}", hex::encode(digest));
    if actual != expected {
        return Err(LoaderError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::object_store::FakeObjectStore;

    fn sample_artifact() -> RulesetArtifact {
        serde_json::from_value(serde_json::json!({
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "execution_mode": "AUTH",
            "rules": [{
                "rule_id": "high-amount-mcc-7995",
                "priority": 100,
                "enabled": true,
                "condition": {"field": "amount", "op": "GT", "value": 100},
                "action": "DECLINE",
                "scope": {"mcc": ["7995"]}
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn loads_and_compiles_a_ruleset_with_matching_checksum() {
        let store = Arc::new(FakeObjectStore::new());
        let artifact = sample_artifact();
        let artifact_bytes = serde_json::to_vec(&artifact).unwrap();
        let checksum = format!("sha256:{}", hex::encode(Sha256::digest(&artifact_bytes)));
        store.put("rulesets/prod/US/CARD_AUTH/manifest.json", serde_json::to_vec(&serde_json::json!({
            "schema_version": "2.0",
            "environment": "prod",
            "region": "na",
            "country": "US",
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "artifact_uri": "artifacts/card_auth_v1.json",
            "checksum": checksum,
            "published_at": "2026-01-01T00:00:00Z",
        })).unwrap());
        store.put("artifacts/card_auth_v1.json", artifact_bytes);

        let loader = RulesetLoader::new(store, "prod".to_string());
        let registry = FieldRegistry::builtin();
        let custom = CustomFieldSet::new();
        let ruleset = loader.load("US", "CARD_AUTH", &registry, &custom).await.unwrap();
        assert_eq!(ruleset.rules_sorted.len(), 1);
        assert_eq!(ruleset.version, 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let store = Arc::new(FakeObjectStore::new());
        let artifact_bytes = serde_json::to_vec(&sample_artifact()).unwrap();
        store.put("rulesets/prod/US/CARD_AUTH/manifest.json", serde_json::to_vec(&serde_json::json!({
            "schema_version": "2.0",
            "environment": "prod",
            "region": "na",
            "country": "US",
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "artifact_uri": "artifacts/card_auth_v1.json",
            "checksum": "sha256:deadbeef",
            "published_at": "2026-01-01T00:00:00Z",
        })).unwrap());
        store.put("artifacts/card_auth_v1.json", artifact_bytes);

        let loader = RulesetLoader::new(store, "prod".to_string());
        let registry = FieldRegistry::builtin();
        let custom = CustomFieldSet::new();
        let err = loader.load("US", "CARD_AUTH", &registry, &custom).await.unwrap_err();
        assert!(matches!(err, LoaderError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn falls_back_to_global_path_when_country_manifest_missing() {
        let store = Arc::new(FakeObjectStore::new());
        let artifact_bytes = serde_json::to_vec(&sample_artifact()).unwrap();
        let checksum = format!("sha256:{}", hex::encode(Sha256::digest(&artifact_bytes)));
        store.put("rulesets/prod/global/CARD_AUTH/manifest.json", serde_json::to_vec(&serde_json::json!({
            "schema_version": "2.0",
            "environment": "prod",
            "region": "na",
            "country": "global",
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "artifact_uri": "artifacts/card_auth_v1.json",
            "checksum": checksum,
            "published_at": "2026-01-01T00:00:00Z",
        })).unwrap());
        store.put("artifacts/card_auth_v1.json", artifact_bytes);

        let loader = RulesetLoader::new(store, "prod".to_string());
        let registry = FieldRegistry::builtin();
        let custom = CustomFieldSet::new();
        let ruleset = loader.load("MX", "CARD_AUTH", &registry, &custom).await.unwrap();
        assert_eq!(ruleset.rules_sorted.len(), 1);
    }
}
