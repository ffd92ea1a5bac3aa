//! Cross-module integration: manifest -> artifact -> checksum -> compile ->
//! hot-swap -> scope/priority walk, without any live infrastructure. Exercises
//! the worked examples in spec §8 (scenarios 1-4) end to end through
//! `RulesetLoader`, `RulesetRegistry`, and `CompiledRuleset` together, the
//! same way `evaluator.rs`'s own unit tests walk `eligible_indices` directly
//! rather than calling `evaluate()` (which needs a live `VelocityService`).

use cardguard_engine::fraud::compile::CustomFieldSet;
use cardguard_engine::fraud::field_registry::FieldRegistry;
use cardguard_engine::fraud::loader::RulesetLoader;
use cardguard_engine::fraud::model::Action;
use cardguard_engine::fraud::object_store::FakeObjectStore;
use cardguard_engine::fraud::registry::RulesetRegistry;
use sha2::{Digest, Sha256};
use std::sync::Arc;

fn seed_manifest_and_artifact(store: &FakeObjectStore, country: &str, artifact: &serde_json::Value) {
    let artifact_bytes = serde_json::to_vec(artifact).unwrap();
    let checksum = format!("sha256:{}", hex::encode(Sha256::digest(&artifact_bytes)));
    store.put(
        &format!("rulesets/prod/{}/CARD_AUTH/manifest.json", country),
        serde_json::to_vec(&serde_json::json!({
            "schema_version": "2.0",
            "environment": "prod",
            "region": "na",
            "country": country,
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "artifact_uri": format!("artifacts/{}.json", country),
            "checksum": checksum,
            "published_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap(),
    );
    store.put(&format!("artifacts/{}.json", country), artifact_bytes);
}

/// Scenario: a scoped high-amount MCC-7995 decline rule coexists with a
/// lower-priority global allow rule. A transaction in-scope for the decline
/// must match it first regardless of declaration order (spec §4.3 scope
/// specificity, §8 scenario 1).
#[tokio::test]
async fn scoped_decline_outranks_global_allow() {
    let store = Arc::new(FakeObjectStore::new());
    let artifact = serde_json::json!({
        "ruleset_key": "CARD_AUTH",
        "ruleset_version": 1,
        "execution_mode": "AUTH",
        "rules": [
            {
                "rule_id": "global-allow",
                "priority": 1000,
                "enabled": true,
                "condition": {"field": "amount", "op": "GTE", "value": 0},
                "action": "APPROVE",
                "scope": {}
            },
            {
                "rule_id": "high-amount-mcc-7995",
                "priority": 100,
                "enabled": true,
                "condition": {
                    "and": [
                        {"field": "amount", "op": "GT", "value": 100},
                        {"field": "merchant_category_code", "op": "EQ", "value": "7995"}
                    ]
                },
                "action": "DECLINE",
                "scope": {"mcc": ["7995"]}
            }
        ]
    });
    seed_manifest_and_artifact(&store, "US", &artifact);

    let loader = RulesetLoader::new(store, "prod".to_string());
    let registry = RulesetRegistry::new();
    let field_registry = FieldRegistry::builtin();
    let custom = CustomFieldSet::new();
    registry
        .hot_swap("US", "CARD_AUTH", &loader, &field_registry, &custom)
        .await
        .unwrap();

    let ruleset = registry.get_with_fallback("US", "CARD_AUTH").unwrap();
    assert_eq!(ruleset.rules_sorted[0].rule_id, "high-amount-mcc-7995");

    use cardguard_engine::fraud::ruleset::ScopeKey;
    let key = ScopeKey {
        network: "VISA".into(),
        bin: "411111".into(),
        mcc: "7995".into(),
        logo: "VISA".into(),
    };
    let eligible = ruleset.eligible_indices(&key);
    let ctx = sample_ctx(250.0, "7995");
    let first_match = eligible
        .iter()
        .map(|&i| &ruleset.rules_sorted[i])
        .find(|r| (r.predicate)(&ctx))
        .unwrap();
    assert_eq!(first_match.rule_id, "high-amount-mcc-7995");
    assert_eq!(first_match.action, Action::Decline);
}

/// Scenario: `IN`/`NOT_IN`/`BETWEEN`/`OR`/`NOT` all compile and evaluate
/// correctly against a loaded artifact (spec §4.1 operator coverage).
#[tokio::test]
async fn composite_operators_compile_and_match() {
    let store = Arc::new(FakeObjectStore::new());
    let artifact = serde_json::json!({
        "ruleset_key": "CARD_AUTH",
        "ruleset_version": 1,
        "execution_mode": "AUTH",
        "rules": [{
            "rule_id": "risky-bin-or-out-of-range",
            "priority": 50,
            "enabled": true,
            "condition": {
                "or": [
                    {"field": "card_bin", "op": "IN", "values": ["411111", "555555"]},
                    {
                        "not": {"field": "amount", "op": "BETWEEN", "values": [0, 500]}
                    }
                ]
            },
            "action": "DECLINE",
            "scope": {}
        }]
    });
    seed_manifest_and_artifact(&store, "global", &artifact);

    let loader = RulesetLoader::new(store, "prod".to_string());
    let registry = RulesetRegistry::new();
    let field_registry = FieldRegistry::builtin();
    let custom = CustomFieldSet::new();
    registry
        .hot_swap("global", "CARD_AUTH", &loader, &field_registry, &custom)
        .await
        .unwrap();

    let ruleset = registry.get_with_fallback("MX", "CARD_AUTH").unwrap();
    let rule = &ruleset.rules_sorted[0];

    assert!((rule.predicate)(&sample_ctx(10.0, "5411"))); // bin in the IN list
    assert!((rule.predicate)(&sample_ctx_with_bin(900.0, "9999", "999999"))); // outside the BETWEEN range
    assert!(!(rule.predicate)(&sample_ctx_with_bin(100.0, "9999", "999999"))); // neither branch
}

/// Scenario: hot-swapping to a new version never drops the rules a reader
/// already holds an `Arc` to (spec §4.3 P2, §8 scenario 4).
#[tokio::test]
async fn hot_swap_is_atomic_across_versions() {
    let store_v1 = Arc::new(FakeObjectStore::new());
    seed_manifest_and_artifact(
        &store_v1,
        "US",
        &serde_json::json!({
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 1,
            "execution_mode": "AUTH",
            "rules": []
        }),
    );
    let registry = RulesetRegistry::new();
    let field_registry = FieldRegistry::builtin();
    let custom = CustomFieldSet::new();
    let loader_v1 = RulesetLoader::new(store_v1, "prod".to_string());
    registry
        .hot_swap("US", "CARD_AUTH", &loader_v1, &field_registry, &custom)
        .await
        .unwrap();
    let held = registry.get("US", "CARD_AUTH").unwrap();

    let store_v2 = Arc::new(FakeObjectStore::new());
    seed_manifest_and_artifact(
        &store_v2,
        "US",
        &serde_json::json!({
            "ruleset_key": "CARD_AUTH",
            "ruleset_version": 2,
            "execution_mode": "AUTH",
            "rules": []
        }),
    );
    let loader_v2 = RulesetLoader::new(store_v2, "prod".to_string());
    registry
        .hot_swap("US", "CARD_AUTH", &loader_v2, &field_registry, &custom)
        .await
        .unwrap();

    assert_eq!(held.version, 1);
    assert_eq!(registry.loaded_version("US", "CARD_AUTH"), Some(2));
}

fn sample_ctx(amount: f64, mcc: &str) -> cardguard_engine::fraud::model::TransactionContext {
    sample_ctx_with_bin(amount, mcc, "411111")
}

fn sample_ctx_with_bin(
    amount: f64,
    mcc: &str,
    bin: &str,
) -> cardguard_engine::fraud::model::TransactionContext {
    use cardguard_engine::fraud::model::{SlotValue, TransactionContext};
    let registry = FieldRegistry::builtin();
    let mut slots = vec![SlotValue::Missing; registry.slot_count()];
    slots[registry.resolve("amount").unwrap().id as usize] = SlotValue::Number(amount);
    slots[registry.resolve("merchant_category_code").unwrap().id as usize] =
        SlotValue::Text(mcc.to_string());
    slots[registry.resolve("card_bin").unwrap().id as usize] = SlotValue::Text(bin.to_string());
    TransactionContext {
        transaction_id: "tx1".into(),
        card_hash: "h".into(),
        amount,
        currency: "USD".into(),
        country_code: "US".into(),
        merchant_category_code: mcc.into(),
        card_network: "VISA".into(),
        card_bin: bin.into(),
        card_logo: "VISA".into(),
        ip_address: None,
        device_id: None,
        timestamp: chrono::Utc::now(),
        custom: Default::default(),
        slots,
    }
}
