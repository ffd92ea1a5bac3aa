//! `POST /v1/evaluate/auth` — the card-fraud evaluation API (spec §6).
//!
//! Accepts a JSON transaction body, builds the dense `TransactionContext`
//! slot array against the loaded field registry, evaluates it against the
//! country's compiled ruleset, enqueues the outbox event (unless this was
//! a replay), and returns the slim decision envelope. HTTP 200 on success
//! AND on handled engine-layer failures — fail-open is in-band; 400 is
//! reserved for malformed input.

use crate::api::AppState;
use crate::fraud::evaluator::{evaluate, ruleset_not_loaded_decision, EvalOptions};
use crate::fraud::model::{Decision, OutboxEvent, SlotValue, TransactionContext};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub transaction_id: String,
    pub card_hash: String,
    pub amount: f64,
    pub currency: String,
    pub country_code: String,
    pub merchant_category_code: String,
    pub card_network: String,
    pub card_bin: String,
    pub card_logo: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    /// Internal-only replay toggle; not part of the public API contract
    /// (spec.md §1 excludes a public replay endpoint — see DESIGN.md).
    #[serde(default)]
    pub replay: bool,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    transaction_id: String,
    decision: crate::fraud::model::Action,
    engine_mode: crate::fraud::model::EngineMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine_error_code: Option<String>,
}

impl From<&Decision> for AuthResponse {
    fn from(d: &Decision) -> Self {
        AuthResponse {
            transaction_id: d.transaction_id.clone(),
            decision: d.decision,
            engine_mode: d.engine_mode,
            engine_error_code: d.engine_error_code.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn evaluate_auth(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
    Json(req): Json<AuthRequest>,
) -> Response {
    let ruleset_key = "CARD_AUTH";
    let Some(ruleset) = state
        .registry
        .get_with_fallback(&req.country_code, ruleset_key)
    else {
        warn!(country = %req.country_code, ruleset_key, "no ruleset loaded for this country/key");
        let decision = ruleset_not_loaded_decision(&req.transaction_id, ruleset_key);
        return Json(AuthResponse::from(&decision)).into_response();
    };

    let ctx = build_context(&req, &state.field_registry);
    let mut velocity = state.velocity.lock().await;
    let options = EvalOptions { replay: query.replay };
    let decision = evaluate(&ctx, &ruleset, Some(&mut velocity), options).await;
    drop(velocity);

    if !query.replay {
        let event = OutboxEvent {
            transaction_context_snapshot: ctx,
            auth_decision: decision.clone(),
            occurred_at: Utc::now(),
            produced_at: Utc::now(),
        };
        if !state.outbox.enqueue(event) {
            warn!(transaction_id = %decision.transaction_id, "outbox enqueue dropped, queue full");
        }
    }

    info!(
        transaction_id = %decision.transaction_id,
        decision = ?decision.decision,
        engine_mode = ?decision.engine_mode,
        "auth decision"
    );

    Json(AuthResponse::from(&decision)).into_response()
}

/// Maps the known transaction fields onto the builtin field registry's
/// slot layout. A thin adapter layer in front of this core would extend
/// this with artifact-declared custom fields; this handler only needs the
/// fixed set spec.md §3 names.
fn build_context(req: &AuthRequest, field_registry: &crate::fraud::field_registry::FieldRegistry) -> TransactionContext {
    let mut slots = vec![SlotValue::Missing; field_registry.slot_count()];
    let mut set = |name: &str, value: SlotValue| {
        if let Some(def) = field_registry.resolve(name) {
            slots[def.id as usize] = value;
        }
    };

    set("transaction_id", SlotValue::Text(req.transaction_id.clone()));
    set("card_hash", SlotValue::Text(req.card_hash.clone()));
    set("amount", SlotValue::Number(req.amount));
    set("currency", SlotValue::Text(req.currency.clone()));
    set("country_code", SlotValue::Text(req.country_code.clone()));
    set(
        "merchant_category_code",
        SlotValue::Text(req.merchant_category_code.clone()),
    );
    set("card_network", SlotValue::Text(req.card_network.clone()));
    set("card_bin", SlotValue::Text(req.card_bin.clone()));
    set("card_logo", SlotValue::Text(req.card_logo.clone()));
    if let Some(ip) = &req.ip_address {
        set("ip_address", SlotValue::Text(ip.clone()));
    }
    if let Some(device) = &req.device_id {
        set("device_id", SlotValue::Text(device.clone()));
    }

    TransactionContext {
        transaction_id: req.transaction_id.clone(),
        card_hash: req.card_hash.clone(),
        amount: req.amount,
        currency: req.currency.clone(),
        country_code: req.country_code.clone(),
        merchant_category_code: req.merchant_category_code.clone(),
        card_network: req.card_network.clone(),
        card_bin: req.card_bin.clone(),
        card_logo: req.card_logo.clone(),
        ip_address: req.ip_address.clone(),
        device_id: req.device_id.clone(),
        timestamp: Utc::now(),
        custom: req.custom.clone(),
        slots,
    }
}

/// 400 only for malformed input (spec §6); this is what axum's `Json`
/// extractor rejection maps to via `IntoResponse` when deserialization
/// fails upstream of this handler.
#[allow(dead_code)]
fn invalid_request_response(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: message.into() }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::field_registry::FieldRegistry;

    fn sample_req() -> AuthRequest {
        AuthRequest {
            transaction_id: "tx1".into(),
            card_hash: "h".into(),
            amount: 250.0,
            currency: "USD".into(),
            country_code: "US".into(),
            merchant_category_code: "7995".into(),
            card_network: "VISA".into(),
            card_bin: "411111".into(),
            card_logo: "VISA".into(),
            ip_address: None,
            device_id: None,
            custom: HashMap::new(),
        }
    }

    #[test]
    fn build_context_populates_builtin_slots() {
        let registry = FieldRegistry::builtin();
        let ctx = build_context(&sample_req(), &registry);
        let amount_id = registry.resolve("amount").unwrap().id;
        assert_eq!(ctx.slot(amount_id).as_f64(), Some(250.0));
    }
}
