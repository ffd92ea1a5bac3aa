//! C2 — Condition Compiler.
//!
//! Translates a `ConditionNode` tree into a single predicate closure over
//! `TransactionContext`, resolving field names to slot IDs once at compile
//! time instead of on every evaluation. Closures never panic: any internal
//! failure degrades that leaf to `false` (spec §4.1 contract).

use crate::fraud::error::CompileError;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::model::{ConditionLeaf, ConditionNode, Operator, SlotValue, TransactionContext};
use regex::Regex;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A compiled, boxed predicate. `Send + Sync` so it can be shared across
/// request-handling threads via the immutable `CompiledRuleset`.
pub type Predicate = Arc<dyn Fn(&TransactionContext) -> bool + Send + Sync>;

/// Names tolerated as custom fields even though absent from the registry
/// (spec §4.1 "slow leaves").
pub type CustomFieldSet = HashSet<String>;

const SET_MEMBERSHIP_THRESHOLD: usize = 8;

pub fn compile_condition(
    node: &ConditionNode,
    registry: &FieldRegistry,
    custom_fields: &CustomFieldSet,
) -> Result<Predicate, CompileError> {
    match node {
        ConditionNode::Leaf(leaf) => compile_leaf(leaf, registry, custom_fields),
        ConditionNode::And { and } => {
            let compiled: Vec<Predicate> = and
                .iter()
                .map(|n| compile_condition(n, registry, custom_fields))
                .collect::<Result<_, _>>()?;
            Ok(Arc::new(move |ctx: &TransactionContext| {
                compiled.iter().all(|p| safe_call(p, ctx))
            }))
        }
        ConditionNode::Or { or } => {
            let compiled: Vec<Predicate> = or
                .iter()
                .map(|n| compile_condition(n, registry, custom_fields))
                .collect::<Result<_, _>>()?;
            Ok(Arc::new(move |ctx: &TransactionContext| {
                compiled.iter().any(|p| safe_call(p, ctx))
            }))
        }
        ConditionNode::Not { not } => {
            let inner = compile_condition(not, registry, custom_fields)?;
            Ok(Arc::new(move |ctx: &TransactionContext| !safe_call(&inner, ctx)))
        }
    }
}

/// Evaluation exceptions degrade to `false` for that leaf (spec §4.1).
fn safe_call(pred: &Predicate, ctx: &TransactionContext) -> bool {
    catch_unwind(AssertUnwindSafe(|| pred(ctx))).unwrap_or(false)
}

fn compile_leaf(
    leaf: &ConditionLeaf,
    registry: &FieldRegistry,
    custom_fields: &CustomFieldSet,
) -> Result<Predicate, CompileError> {
    if let Some(def) = registry.resolve(&leaf.field) {
        if !def.allowed_operators.contains(&leaf.op) {
            return Err(CompileError::OperatorNotAllowed {
                field: leaf.field.clone(),
                op: leaf.op,
            });
        }
        let field_id = def.id;
        return compile_slot_leaf(field_id, leaf);
    }
    if custom_fields.contains(&leaf.field) {
        return compile_custom_leaf(leaf.field.clone(), leaf);
    }
    Err(CompileError::UnresolvedField(leaf.field.clone()))
}

fn compile_slot_leaf(field_id: u16, leaf: &ConditionLeaf) -> Result<Predicate, CompileError> {
    let op = leaf.op;
    if op == Operator::Exists {
        return Ok(Arc::new(move |ctx: &TransactionContext| {
            !ctx.slot(field_id).is_missing()
        }));
    }

    match op {
        Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let numeric = compile_numeric_scalar(leaf)?;
            Ok(numeric_or_string_compare(field_id, op, numeric, leaf)?)
        }
        Operator::Between => {
            let values = leaf
                .values
                .as_ref()
                .ok_or_else(|| CompileError::EmptyValueSet(leaf.field.clone()))?;
            if values.len() != 2 {
                return Err(CompileError::EmptyValueSet(leaf.field.clone()));
            }
            let a = json_as_f64(&values[0]);
            let b = json_as_f64(&values[1]);
            let (lo, hi) = match (a, b) {
                (Some(a), Some(b)) => (a.min(b), a.max(b)),
                _ => return Err(CompileError::EmptyValueSet(leaf.field.clone())),
            };
            Ok(Arc::new(move |ctx: &TransactionContext| {
                ctx.slot(field_id)
                    .as_f64()
                    .map(|v| v >= lo && v <= hi)
                    .unwrap_or(false)
            }))
        }
        Operator::In | Operator::NotIn => {
            let values = leaf
                .values
                .as_ref()
                .ok_or_else(|| CompileError::EmptyValueSet(leaf.field.clone()))?;
            if values.is_empty() {
                return Err(CompileError::EmptyValueSet(leaf.field.clone()));
            }
            let negate = op == Operator::NotIn;
            if values.len() >= SET_MEMBERSHIP_THRESHOLD {
                let set: HashSet<String> = values.iter().map(json_as_string).collect();
                Ok(Arc::new(move |ctx: &TransactionContext| {
                    let present = ctx
                        .slot(field_id)
                        .as_str()
                        .map(|s| set.contains(s))
                        .unwrap_or(false);
                    present != negate
                }))
            } else {
                let list: Vec<String> = values.iter().map(json_as_string).collect();
                Ok(Arc::new(move |ctx: &TransactionContext| {
                    let present = ctx
                        .slot(field_id)
                        .as_str()
                        .map(|s| list.iter().any(|v| v == s))
                        .unwrap_or(false);
                    present != negate
                }))
            }
        }
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            let needle = leaf
                .value
                .as_ref()
                .map(json_as_string)
                .ok_or_else(|| CompileError::EmptyValueSet(leaf.field.clone()))?;
            Ok(Arc::new(move |ctx: &TransactionContext| {
                ctx.slot(field_id)
                    .as_str()
                    .map(|s| match op {
                        Operator::Contains => s.contains(needle.as_str()),
                        Operator::StartsWith => s.starts_with(needle.as_str()),
                        Operator::EndsWith => s.ends_with(needle.as_str()),
                        _ => unreachable!(),
                    })
                    .unwrap_or(false)
            }))
        }
        Operator::Regex => {
            let pattern = leaf
                .value
                .as_ref()
                .map(json_as_string)
                .ok_or_else(|| CompileError::EmptyValueSet(leaf.field.clone()))?;
            let re = Regex::new(&pattern)?;
            Ok(Arc::new(move |ctx: &TransactionContext| {
                ctx.slot(field_id).as_str().map(|s| re.is_match(s)).unwrap_or(false)
            }))
        }
        Operator::Exists => unreachable!("handled above"),
    }
}

fn compile_numeric_scalar(leaf: &ConditionLeaf) -> Result<Option<f64>, CompileError> {
    Ok(leaf.value.as_ref().and_then(json_as_f64))
}

fn numeric_or_string_compare(
    field_id: u16,
    op: Operator,
    numeric: Option<f64>,
    leaf: &ConditionLeaf,
) -> Result<Predicate, CompileError> {
    // Numeric comparisons happen in f64 (spec §3); anything else (EQ/NE on
    // strings) falls back to byte-exact string comparison.
    if let Some(target) = numeric {
        return Ok(Arc::new(move |ctx: &TransactionContext| {
            ctx.slot(field_id)
                .as_f64()
                .map(|v| match op {
                    Operator::Eq => (v - target).abs() < f64::EPSILON,
                    Operator::Ne => (v - target).abs() >= f64::EPSILON,
                    Operator::Gt => v > target,
                    Operator::Gte => v >= target,
                    Operator::Lt => v < target,
                    Operator::Lte => v <= target,
                    _ => false,
                })
                .unwrap_or(false)
        }));
    }
    let target = leaf
        .value
        .as_ref()
        .map(json_as_string)
        .ok_or_else(|| CompileError::EmptyValueSet(leaf.field.clone()))?;
    Ok(Arc::new(move |ctx: &TransactionContext| {
        ctx.slot(field_id)
            .as_str()
            .map(|s| match op {
                Operator::Eq => s == target,
                Operator::Ne => s != target,
                _ => false,
            })
            .unwrap_or(false)
    }))
}

fn compile_custom_leaf(name: String, leaf: &ConditionLeaf) -> Result<Predicate, CompileError> {
    let op = leaf.op;
    if op == Operator::Exists {
        return Ok(Arc::new(move |ctx: &TransactionContext| {
            ctx.custom_field(&name).is_some()
        }));
    }
    let target = leaf.value.as_ref().map(json_as_string);
    Ok(Arc::new(move |ctx: &TransactionContext| {
        let Some(v) = ctx.custom_field(&name) else {
            return false;
        };
        match (op, &target) {
            (Operator::Eq, Some(t)) => v == t,
            (Operator::Ne, Some(t)) => v != t,
            (Operator::Contains, Some(t)) => v.contains(t.as_str()),
            _ => false,
        }
    }))
}

fn json_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
}

fn json_as_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
