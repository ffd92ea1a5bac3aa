//! Error types for the engine core.
//!
//! `EngineErrorCode` is the wire-level enum from spec §6 — it rides inside
//! `Decision.engine_error_code` and must stay stable. Component errors
//! (`CompileError`, `LoaderError`, `VelocityError`) are the Rust-side
//! causes; each has a `to_engine_code` mapping so the evaluator never has
//! to pattern-match a stringly-typed error at the response boundary.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineErrorCode {
    #[error("ruleset not loaded for this country/key")]
    RulesetNotLoaded,
    #[error("velocity dependency unavailable")]
    RedisUnavailable,
    #[error("artifact checksum did not match manifest")]
    ChecksumMismatch,
    #[error("artifact object not found")]
    ArtifactNotFound,
    #[error("unhandled error while evaluating a rule predicate")]
    EvaluationError,
    #[error("request shed under load")]
    LoadShedding,
    #[error("failed to publish decision event")]
    EventPublishFailed,
    #[error("malformed request body")]
    InvalidRequest,
    #[error("condition references an unknown field")]
    UnresolvedField,
    #[error("ruleset schema version incompatible with this engine")]
    SchemaIncompatible,
}

impl EngineErrorCode {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            EngineErrorCode::RulesetNotLoaded => "RULESET_NOT_LOADED",
            EngineErrorCode::RedisUnavailable => "REDIS_UNAVAILABLE",
            EngineErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            EngineErrorCode::ArtifactNotFound => "ARTIFACT_NOT_FOUND",
            EngineErrorCode::EvaluationError => "EVALUATION_ERROR",
            EngineErrorCode::LoadShedding => "LOAD_SHEDDING",
            EngineErrorCode::EventPublishFailed => "EVENT_PUBLISH_FAILED",
            EngineErrorCode::InvalidRequest => "INVALID_REQUEST",
            EngineErrorCode::UnresolvedField => "UNRESOLVED_FIELD",
            EngineErrorCode::SchemaIncompatible => "SCHEMA_INCOMPATIBLE",
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("condition references unknown field '{0}'")]
    UnresolvedField(String),
    #[error("operator {op:?} is not allowed on field '{field}'")]
    OperatorNotAllowed { field: String, op: crate::fraud::model::Operator },
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("IN/NOT_IN condition on '{0}' has no values")]
    EmptyValueSet(String),
}

impl CompileError {
    pub fn to_engine_code(&self) -> EngineErrorCode {
        match self {
            CompileError::UnresolvedField(_) => EngineErrorCode::UnresolvedField,
            _ => EngineErrorCode::SchemaIncompatible,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("manifest object not found at {0}")]
    ManifestNotFound(String),
    #[error("artifact object not found at {0}")]
    ArtifactNotFound(String),
    #[error("checksum mismatch: manifest said {expected}, artifact hashed to {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("ruleset schema_version {0} is not supported")]
    SchemaIncompatible(String),
    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("manifest/artifact JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LoaderError {
    pub fn to_engine_code(&self) -> EngineErrorCode {
        match self {
            LoaderError::ManifestNotFound(_) | LoaderError::ArtifactNotFound(_) => {
                EngineErrorCode::ArtifactNotFound
            }
            LoaderError::ChecksumMismatch { .. } => EngineErrorCode::ChecksumMismatch,
            LoaderError::SchemaIncompatible(_) => EngineErrorCode::SchemaIncompatible,
            LoaderError::Compile(c) => c.to_engine_code(),
            LoaderError::ObjectStore(_) | LoaderError::Decode(_) => {
                EngineErrorCode::ArtifactNotFound
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum VelocityError {
    #[error("circuit breaker open for velocity dependency")]
    CircuitOpen,
    #[error("redis operation timed out")]
    Timeout,
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
