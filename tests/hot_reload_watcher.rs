//! Integration test for the hot-reload watcher (spec §4.8, §8 scenario 4):
//! a background poll against the object store picks up a newer version and
//! swaps it into the registry without the caller driving it directly. No
//! live infrastructure required — `FakeObjectStore` stands in for S3.

use cardguard_engine::fraud::compile::CustomFieldSet;
use cardguard_engine::fraud::field_registry::FieldRegistry;
use cardguard_engine::fraud::loader::RulesetLoader;
use cardguard_engine::fraud::object_store::FakeObjectStore;
use cardguard_engine::fraud::registry::RulesetRegistry;
use cardguard_engine::fraud::watcher::{self, WatcherConfig};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn seed(store: &FakeObjectStore, version: i64) {
    let artifact = serde_json::json!({
        "ruleset_key": "CARD_AUTH",
        "ruleset_version": version,
        "execution_mode": "AUTH",
        "rules": []
    });
    let artifact_bytes = serde_json::to_vec(&artifact).unwrap();
    let checksum = format!("sha256:{}", hex::encode(Sha256::digest(&artifact_bytes)));
    store.put(
        "rulesets/prod/US/CARD_AUTH/manifest.json",
        serde_json::to_vec(&serde_json::json!({
            "schema_version": "2.0",
            "environment": "prod",
            "region": "na",
            "country": "US",
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": version,
            "artifact_uri": "artifacts/card_auth.json",
            "checksum": checksum,
            "published_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap(),
    );
    store.put("artifacts/card_auth.json", artifact_bytes);
}

#[tokio::test]
async fn watcher_picks_up_a_newer_version_on_its_own_cadence() {
    let store = Arc::new(FakeObjectStore::new());
    seed(&store, 1);

    let loader = Arc::new(RulesetLoader::new(store.clone(), "prod".to_string()));
    let registry = Arc::new(RulesetRegistry::new());
    let field_registry = Arc::new(FieldRegistry::builtin());
    let custom_fields = Arc::new(CustomFieldSet::new());

    registry
        .hot_swap("US", "CARD_AUTH", &loader, &field_registry, &custom_fields)
        .await
        .unwrap();
    assert_eq!(registry.loaded_version("US", "CARD_AUTH"), Some(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = WatcherConfig {
        poll_interval: Duration::from_millis(20),
        tracked: vec![("US".to_string(), "CARD_AUTH".to_string())],
    };
    let handle = tokio::spawn(watcher::run(
        registry.clone(),
        loader.clone(),
        field_registry.clone(),
        custom_fields.clone(),
        config,
        shutdown_rx,
    ));

    // Publish version 2 after the watcher has already started polling.
    seed(&store, 2);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if registry.loaded_version("US", "CARD_AUTH") == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.loaded_version("US", "CARD_AUTH"), Some(2));

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}
