//! Core data model shared by the condition compiler, ruleset, and evaluator.
//!
//! Mirrors spec §3: a dense slot array per transaction, conditions as a
//! leaf/composite tree, and the slim decision envelope returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable, dense identifier for a registered field. Small and versioned
/// within a single field-registry version; never reused across versions.
pub type FieldId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Exists,
}

/// A single resolved slot value. `Missing` distinguishes "field not present
/// on this transaction" from any present-but-empty value, which matters for
/// `EXISTS`.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Missing,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl SlotValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SlotValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SlotValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SlotValue::Missing)
    }
}

/// Immutable per-request transaction record. Owned exclusively by the
/// handling request; nothing outlives the request except the snapshot
/// cloned into the outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub card_hash: String,
    pub amount: f64,
    pub currency: String,
    pub country_code: String,
    pub merchant_category_code: String,
    pub card_network: String,
    pub card_bin: String,
    pub card_logo: String,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Declared custom fields not present in the dense registry slot array.
    #[serde(default)]
    pub custom: HashMap<String, String>,
    /// Dense slots, indexed by `FieldId`. Populated by the caller (or by a
    /// thin adapter in front of this core) once against the loaded field
    /// registry; `Evaluator` never re-resolves field names per request.
    #[serde(skip)]
    pub slots: Vec<SlotValue>,
}

impl TransactionContext {
    pub fn slot(&self, id: FieldId) -> &SlotValue {
        self.slots.get(id as usize).unwrap_or(&SlotValue::Missing)
    }

    pub fn custom_field(&self, name: &str) -> Option<&str> {
        self.custom.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Approve,
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMode {
    Normal,
    Degraded,
    FailOpen,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    pub dimension: String,
    pub window_seconds: u32,
    pub threshold: u32,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityResult {
    pub dimension: String,
    pub dimension_value: String,
    pub count: u64,
    pub threshold: u32,
    pub window_seconds: u32,
    pub exceeded: bool,
}

/// Matched-rule summary carried in the response/outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub priority: i32,
    pub action: Action,
    pub decision_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub transaction_id: String,
    pub decision: Action,
    pub engine_mode: EngineMode,
    pub engine_error_code: Option<String>,
    pub ruleset_key: String,
    pub ruleset_version: i64,
    pub processing_time_ms: f64,
    #[serde(default)]
    pub matched_rules: Vec<MatchedRule>,
    #[serde(default)]
    pub velocity_results: Vec<VelocityResult>,
}

/// Produced by the request thread on return; owned by the durability
/// pipeline thereafter (spec §3 "Outbox Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub transaction_context_snapshot: TransactionContext,
    pub auth_decision: Decision,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub produced_at: chrono::DateTime<chrono::Utc>,
}

/// Condition tree over typed slots (spec §3 leaf/composite).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(ConditionLeaf),
    And { and: Vec<ConditionNode> },
    Or { or: Vec<ConditionNode> },
    Not { not: Box<ConditionNode> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionLeaf {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub values: Option<Vec<serde_json::Value>>,
}

/// A rule's scope constraint (spec §3 "Rule Scope"). Absent dimension is
/// unconstrained; empty scope is GLOBAL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default)]
    pub network: Option<Vec<String>>,
    #[serde(default)]
    pub bin: Option<Vec<String>>,
    #[serde(default)]
    pub mcc: Option<Vec<String>>,
    #[serde(default)]
    pub logo: Option<Vec<String>>,
}

impl RuleScope {
    pub fn specificity(&self) -> u8 {
        [&self.network, &self.bin, &self.mcc, &self.logo]
            .iter()
            .filter(|d| d.is_some())
            .count() as u8
    }

    pub fn is_global(&self) -> bool {
        self.specificity() == 0
    }
}

/// Raw (uncompiled) rule as it appears in the artifact JSON (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRule {
    pub rule_id: String,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition: ConditionNode,
    pub action: Action,
    #[serde(default)]
    pub velocity: Option<VelocityConfig>,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default)]
    pub decision_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetArtifact {
    pub ruleset_key: String,
    pub ruleset_version: i64,
    #[serde(default)]
    pub execution_mode: Option<String>,
    pub rules: Vec<RawRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub environment: String,
    pub region: String,
    pub country: String,
    pub ruleset_key: String,
    pub ruleset_version: i64,
    #[serde(default)]
    pub field_registry_version: Option<u32>,
    pub artifact_uri: String,
    pub checksum: String,
    pub published_at: String,
}
