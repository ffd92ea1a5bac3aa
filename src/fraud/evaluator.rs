//! C7 — Rule Evaluator.
//!
//! A pure(ish) function over `(TransactionContext, CompiledRuleset)` that
//! produces a `Decision`: scope filter -> ordered rule walk -> first match
//! -> velocity check -> compose decision (spec §4.4). Every failure path
//! degrades to `APPROVE` with an `engine_mode` marker; AUTH never declines
//! because of an engine-layer failure (P4).

use crate::fraud::circuit::CircuitState;
use crate::fraud::error::{EngineErrorCode, VelocityError};
use crate::fraud::model::{Action, Decision, EngineMode, MatchedRule, TransactionContext};
use crate::fraud::ruleset::{CompiledRuleset, ScopeKey};
use crate::fraud::velocity::VelocityService;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// Disables all side effects: no velocity increment (read-only get
    /// instead), no outbox enqueue downstream. Never affects production
    /// counters (spec §4.4, P6).
    pub replay: bool,
}

pub fn scope_key(ctx: &TransactionContext) -> ScopeKey {
    ScopeKey {
        network: ctx.card_network.clone(),
        bin: ctx.card_bin.clone(),
        mcc: ctx.merchant_category_code.clone(),
        logo: ctx.card_logo.clone(),
    }
}

pub async fn evaluate(
    ctx: &TransactionContext,
    ruleset: &CompiledRuleset,
    mut velocity: Option<&mut VelocityService>,
    options: EvalOptions,
) -> Decision {
    let started = Instant::now();
    let decision_id = uuid::Uuid::new_v4().to_string();
    let key = scope_key(ctx);
    let eligible = ruleset.eligible_indices(&key);

    let mut matched_rules = Vec::new();
    let mut velocity_results = Vec::new();
    let mut outcome: Option<(Action, EngineMode, Option<EngineErrorCode>)> = None;

    for &idx in eligible.iter() {
        let rule = &ruleset.rules_sorted[idx];
        let matched = catch_unwind(AssertUnwindSafe(|| (rule.predicate)(ctx))).unwrap_or(false);
        if !matched {
            continue;
        }

        matched_rules.push(MatchedRule {
            rule_id: rule.rule_id.clone(),
            priority: rule.priority,
            action: rule.action,
            decision_reason: rule.decision_reason.clone(),
        });

        let mut action = rule.action;
        let mut mode = EngineMode::Normal;
        let mut error_code = None;

        if let Some(velocity_cfg) = &rule.velocity {
            let Some(svc) = velocity.as_mut() else {
                warn!(
                    rule_id = %rule.rule_id,
                    "rule has a velocity clause but no velocity service is available, skipping it"
                );
                mode = fail_mode_for_velocity(ruleset.evaluation_type.as_str());
                error_code = Some(EngineErrorCode::RedisUnavailable);
                outcome = Some((action, mode, error_code));
                break;
            };
            let dimension_value = velocity_dimension_value(ctx, &velocity_cfg.dimension);
            if options.replay {
                match svc.read_only(&dimension_value, velocity_cfg).await {
                    Ok(result) => {
                        if result.exceeded {
                            action = velocity_cfg.action;
                        }
                        velocity_results.push(result);
                    }
                    Err(_) => { /* replay read failures never affect the decision */ }
                }
                mode = EngineMode::Replay;
            } else {
                match svc.check(&dimension_value, velocity_cfg).await {
                    Ok(result) => {
                        if result.exceeded {
                            action = velocity_cfg.action;
                        }
                        velocity_results.push(result);
                    }
                    Err(VelocityError::CircuitOpen) | Err(VelocityError::Timeout) => {
                        warn!(
                            rule_id = %rule.rule_id,
                            "velocity dependency unavailable, skipping this rule's velocity clause"
                        );
                        mode = fail_mode_for_velocity(ruleset.evaluation_type.as_str());
                        error_code = Some(EngineErrorCode::RedisUnavailable);
                    }
                    Err(VelocityError::Redis(_)) => {
                        mode = fail_mode_for_velocity(ruleset.evaluation_type.as_str());
                        error_code = Some(EngineErrorCode::RedisUnavailable);
                    }
                }
            }
        } else if options.replay {
            mode = EngineMode::Replay;
        }

        outcome = Some((action, mode, error_code));
        break;
    }

    let (decision, engine_mode, error_code) = outcome.unwrap_or((Action::Approve, default_mode(options), None));

    Decision {
        decision_id,
        transaction_id: ctx.transaction_id.clone(),
        decision,
        engine_mode,
        engine_error_code: error_code.map(|c| c.as_wire_str().to_string()),
        ruleset_key: ruleset.ruleset_key.clone(),
        ruleset_version: ruleset.version,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        matched_rules,
        velocity_results,
    }
}

/// Unknown/missing ruleset (spec §4.4, §7): AUTH fails open with APPROVE
/// and `RULESET_NOT_LOADED`.
pub fn ruleset_not_loaded_decision(transaction_id: &str, ruleset_key: &str) -> Decision {
    Decision {
        decision_id: uuid::Uuid::new_v4().to_string(),
        transaction_id: transaction_id.to_string(),
        decision: Action::Approve,
        engine_mode: EngineMode::FailOpen,
        engine_error_code: Some(EngineErrorCode::RulesetNotLoaded.as_wire_str().to_string()),
        ruleset_key: ruleset_key.to_string(),
        ruleset_version: 0,
        processing_time_ms: 0.0,
        matched_rules: Vec::new(),
        velocity_results: Vec::new(),
    }
}

fn default_mode(options: EvalOptions) -> EngineMode {
    if options.replay {
        EngineMode::Replay
    } else {
        EngineMode::Normal
    }
}

/// MONITORING would mark DEGRADED on velocity failure; AUTH marks
/// FAIL_OPEN (spec §4.4). This core only implements AUTH evaluation type,
/// but keeps the branch named so a MONITORING caller (out of scope, per
/// spec §1) can be wired against the same evaluator later.
fn fail_mode_for_velocity(evaluation_type: &str) -> EngineMode {
    match evaluation_type {
        "MONITORING" => EngineMode::Degraded,
        _ => EngineMode::FailOpen,
    }
}

fn velocity_dimension_value(ctx: &TransactionContext, dimension: &str) -> String {
    match dimension {
        "card_hash" => ctx.card_hash.clone(),
        "card_bin" => ctx.card_bin.clone(),
        "device_id" => ctx.device_id.clone().unwrap_or_default(),
        "ip_address" => ctx.ip_address.clone().unwrap_or_default(),
        other => ctx.custom_field(other).map(str::to_string).unwrap_or_default(),
    }
}

pub fn circuit_snapshot(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}
