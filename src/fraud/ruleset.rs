//! C3 — Compiled Ruleset.
//!
//! Holds the pre-sorted, pre-compiled rule list and the scope-bucket index
//! that turns "find eligible rules for this transaction" into a bounded
//! LRU lookup instead of a linear scan over every rule's scope on every
//! request.

use crate::fraud::compile::Predicate;
use crate::fraud::model::{Action, RuleScope, VelocityConfig};
use lru::LruCache;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct CompiledRule {
    pub rule_id: String,
    pub priority: i32,
    pub enabled: bool,
    pub scope: RuleScope,
    pub predicate: Predicate,
    pub action: Action,
    pub decision_reason: String,
    pub velocity: Option<VelocityConfig>,
}

/// `(network, bin, mcc, logo)` — the fixed dimension order used both for
/// comparator tie-breaking and as the scope-bucket cache key (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub network: String,
    pub bin: String,
    pub mcc: String,
    pub logo: String,
}

const DEFAULT_BUCKET_CAPACITY: usize = 4096;

pub struct CompiledRuleset {
    pub ruleset_key: String,
    pub version: i64,
    pub ruleset_id: String,
    pub evaluation_type: String,
    pub rules_sorted: Vec<CompiledRule>,
    bucket_index: Mutex<LruCache<ScopeKey, Arc<Vec<usize>>>>,
}

impl CompiledRuleset {
    pub fn new(
        ruleset_key: String,
        version: i64,
        ruleset_id: String,
        evaluation_type: String,
        mut rules: Vec<CompiledRule>,
    ) -> Self {
        rules.sort_by(compare_rules);
        let capacity = NonZeroUsize::new(DEFAULT_BUCKET_CAPACITY).unwrap();
        CompiledRuleset {
            ruleset_key,
            version,
            ruleset_id,
            evaluation_type,
            rules_sorted: rules,
            bucket_index: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Eligible-rules slice for a transaction's scope key, order-preserving
    /// w.r.t. `rules_sorted` (spec §4.4).
    pub fn eligible_indices(&self, key: &ScopeKey) -> Arc<Vec<usize>> {
        if let Some(hit) = self.bucket_index.lock().get(key) {
            return Arc::clone(hit);
        }
        let indices: Vec<usize> = self
            .rules_sorted
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.enabled && scope_matches(&rule.scope, key))
            .map(|(i, _)| i)
            .collect();
        let indices = Arc::new(indices);
        self.bucket_index.lock().put(key.clone(), Arc::clone(&indices));
        indices
    }
}

fn scope_matches(scope: &RuleScope, key: &ScopeKey) -> bool {
    dim_matches(&scope.network, &key.network)
        && dim_matches(&scope.bin, &key.bin)
        && dim_matches(&scope.mcc, &key.mcc)
        && dim_matches(&scope.logo, &key.logo)
}

fn dim_matches(allowed: &Option<Vec<String>>, value: &str) -> bool {
    match allowed {
        None => true,
        Some(set) => set.iter().any(|v| v == value),
    }
}

/// Scope specificity descending, then priority descending, then
/// APPROVE-before-non-APPROVE on a priority tie (spec §4.3).
fn compare_rules(a: &CompiledRule, b: &CompiledRule) -> Ordering {
    b.scope
        .specificity()
        .cmp(&a.scope.specificity())
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| action_rank(a.action).cmp(&action_rank(b.action)))
}

fn action_rank(action: Action) -> u8 {
    match action {
        Action::Approve => 0,
        Action::Decline => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::model::Action;
    use std::sync::Arc as StdArc;

    fn rule(id: &str, priority: i32, specificity_dims: u8, action: Action) -> CompiledRule {
        let mut scope = RuleScope::default();
        if specificity_dims >= 1 {
            scope.network = Some(vec!["VISA".into()]);
        }
        if specificity_dims >= 2 {
            scope.mcc = Some(vec!["5411".into()]);
        }
        CompiledRule {
            rule_id: id.into(),
            priority,
            enabled: true,
            scope,
            predicate: StdArc::new(|_| true),
            action,
            decision_reason: id.into(),
            velocity: None,
        }
    }

    #[test]
    fn comparator_orders_by_specificity_then_priority_then_action() {
        let rules = vec![
            rule("global-low", 50, 0, Action::Approve),
            rule("scoped-high", 10, 2, Action::Decline),
            rule("scoped-low", 5, 1, Action::Approve),
            rule("tie-decline", 50, 0, Action::Decline),
            rule("tie-approve", 50, 0, Action::Approve),
        ];
        let rs = CompiledRuleset::new("K".into(), 1, "id".into(), "AUTH".into(), rules);
        let order: Vec<&str> = rs.rules_sorted.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(
            order,
            vec!["scoped-high", "scoped-low", "tie-approve", "tie-decline", "global-low"]
        );
    }

    #[test]
    fn eligible_indices_respects_scope_membership() {
        let rules = vec![rule("scoped", 10, 2, Action::Decline), rule("global", 1, 0, Action::Approve)];
        let rs = CompiledRuleset::new("K".into(), 1, "id".into(), "AUTH".into(), rules);
        let key = ScopeKey {
            network: "VISA".into(),
            bin: "411111".into(),
            mcc: "5411".into(),
            logo: "VISA".into(),
        };
        let eligible = rs.eligible_indices(&key);
        assert_eq!(eligible.len(), 2);

        let key_other_mcc = ScopeKey {
            network: "VISA".into(),
            bin: "411111".into(),
            mcc: "7995".into(),
            logo: "VISA".into(),
        };
        let eligible_other = rs.eligible_indices(&key_other_mcc);
        assert_eq!(eligible_other.len(), 1);
        assert_eq!(rs.rules_sorted[eligible_other[0]].rule_id, "global");
    }
}
