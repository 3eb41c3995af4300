//! Transform orchestration
//!
//! Applies a stored transformer to a stored input payload, validated against
//! stored input/output schemas, exactly once per (input, transformer) pair.
//! A successful application writes the derived payload and its lineage edge
//! atomically.

use crate::db::{Database, DbError, Payload, PayloadDraft, PayloadKind, epoch_seconds};
use crate::engine::{EngineError, SchemaRole, TransformEngine, transform_record};
use serde_json::Value;

/// The four payload ids a transform request names, in the operator form
/// `input:inputSchema/transformer:outputSchema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSpec {
    pub input_id: i64,
    pub input_schema_id: i64,
    pub transformer_id: i64,
    pub output_schema_id: i64,
}

impl std::str::FromStr for TransformSpec {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            TransformError::Spec(format!(
                "invalid transform spec '{}' (expected input:inputSchema/transformer:outputSchema)",
                s
            ))
        };

        let (left, right) = s.split_once('/').ok_or_else(invalid)?;
        let (input, input_schema) = left.split_once(':').ok_or_else(invalid)?;
        let (transformer, output_schema) = right.split_once(':').ok_or_else(invalid)?;

        Ok(TransformSpec {
            input_id: input.parse().map_err(|_| invalid())?,
            input_schema_id: input_schema.parse().map_err(|_| invalid())?,
            transformer_id: transformer.parse().map_err(|_| invalid())?,
            output_schema_id: output_schema.parse().map_err(|_| invalid())?,
        })
    }
}

impl std::fmt::Display for TransformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}:{}",
            self.input_id, self.input_schema_id, self.transformer_id, self.output_schema_id
        )
    }
}

/// Error type for transform application
#[derive(Debug)]
pub enum TransformError {
    /// A referenced payload id does not exist. Nothing was written.
    NotFound(i64),
    /// The (input, transformer) pair was already applied. A normal rejected
    /// retry, not a fault.
    AlreadyTransformed { input_id: i64, transformer_id: i64 },
    /// The input payload is not valid JSON.
    MalformedInput(serde_json::Error),
    Engine(EngineError),
    Storage(DbError),
    Spec(String),
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::NotFound(id) => write!(f, "No payload with id {}", id),
            TransformError::AlreadyTransformed {
                input_id,
                transformer_id,
            } => write!(
                f,
                "Transformation already recorded for input {} and transformer {}",
                input_id, transformer_id
            ),
            TransformError::MalformedInput(e) => {
                write!(f, "Input payload is not valid JSON: {}", e)
            }
            TransformError::Engine(e) => write!(f, "{}", e),
            TransformError::Storage(e) => write!(f, "{}", e),
            TransformError::Spec(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<DbError> for TransformError {
    fn from(e: DbError) -> Self {
        TransformError::Storage(e)
    }
}

impl From<EngineError> for TransformError {
    fn from(e: EngineError) -> Self {
        TransformError::Engine(e)
    }
}

/// A successful transform application
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub output_id: i64,
    pub edge_id: i64,
    pub output: Value,
}

/// Resolves transform requests against the store and records the results.
/// Holds no state of its own; the store handle and the capability are
/// injected at construction.
pub struct Orchestrator<'a> {
    db: &'a Database,
    engine: &'a dyn TransformEngine,
}

impl<'a> Orchestrator<'a> {
    pub fn new(db: &'a Database, engine: &'a dyn TransformEngine) -> Self {
        Self { db, engine }
    }

    /// Apply `spec`. On success the derived payload and its lineage edge are
    /// committed together; every failure before that point leaves the store
    /// untouched.
    pub fn apply(&self, spec: &TransformSpec) -> Result<TransformOutcome, TransformError> {
        let input = self.resolve(spec.input_id)?;
        let input_schema = self.resolve(spec.input_schema_id)?;
        let transformer_def = self.resolve(spec.transformer_id)?;
        let output_schema = self.resolve(spec.output_schema_id)?;

        // Gate before any engine work: the pair may only be applied once.
        if self
            .db
            .transformation_exists(spec.input_id, spec.transformer_id)?
        {
            return Err(TransformError::AlreadyTransformed {
                input_id: spec.input_id,
                transformer_id: spec.transformer_id,
            });
        }

        let input_validator = self
            .engine
            .validator(SchemaRole::Input, &input_schema.payload)?;
        let output_validator = self
            .engine
            .validator(SchemaRole::Output, &output_schema.payload)?;
        let transformer = self.engine.transformer(&transformer_def.payload)?;

        let input_value: Value =
            serde_json::from_str(&input.payload).map_err(TransformError::MalformedInput)?;

        let output = transform_record(
            &input_value,
            input_validator.as_ref(),
            output_validator.as_ref(),
            transformer.as_ref(),
        )?;

        let canonical = serde_json::to_string(&output)
            .map_err(|e| TransformError::Engine(EngineError::TransformFailed(e.to_string())))?;

        // The derived payload inherits the input's topic; both timestamps
        // and time_executed are the application time.
        let now = epoch_seconds();
        let mut draft = PayloadDraft::new(PayloadKind::Derived, "cli", &input.topic, canonical);
        draft.time = now;
        draft.time_added = now;

        let record = self
            .db
            .record_derived(
                &draft,
                spec.input_id,
                spec.input_schema_id,
                spec.transformer_id,
                spec.output_schema_id,
                now,
            )
            .map_err(|e| match e {
                // A concurrent writer won the race; the unique index rejected
                // this edge and rolled the derived payload back with it.
                DbError::Constraint(_) => TransformError::AlreadyTransformed {
                    input_id: spec.input_id,
                    transformer_id: spec.transformer_id,
                },
                other => TransformError::Storage(other),
            })?;

        log::info!(
            "applied transform {}: derived payload {} (edge {})",
            spec,
            record.output_id,
            record.edge_id
        );

        Ok(TransformOutcome {
            output_id: record.output_id,
            edge_id: record.edge_id,
            output,
        })
    }

    fn resolve(&self, id: i64) -> Result<Payload, TransformError> {
        self.db
            .get_payload(id)?
            .ok_or(TransformError::NotFound(id))
    }
}
