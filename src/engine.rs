//! Schema validation and record transformation capability
//!
//! The orchestrator treats validation and transformation as an opaque
//! capability behind the traits here: it builds two validators and a
//! transformer from stored payload content, then calls [`transform_record`].
//! The shipped [`ExpressionEngine`] validates with JSON Schema and evaluates
//! JMESPath expressions, but nothing in the core depends on that choice.

use serde_json::Value;

/// Which side of a transform a schema governs. Used to label validator
/// construction and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRole {
    Input,
    Output,
}

impl std::fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaRole::Input => f.write_str("input"),
            SchemaRole::Output => f.write_str("output"),
        }
    }
}

/// Error type for capability failures. Opaque to the orchestrator: it
/// surfaces the message and never retries.
#[derive(Debug)]
pub enum EngineError {
    InvalidSchema { role: SchemaRole, message: String },
    ValidationFailed { role: SchemaRole, message: String },
    InvalidExpression(String),
    TransformFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSchema { role, message } => {
                write!(f, "Invalid {} schema: {}", role, message)
            }
            EngineError::ValidationFailed { role, message } => {
                write!(f, "{} validation failed: {}", role, message)
            }
            EngineError::InvalidExpression(msg) => {
                write!(f, "Invalid transformer expression: {}", msg)
            }
            EngineError::TransformFailed(msg) => write!(f, "Transform failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Checks one JSON value against a schema.
pub trait RecordValidator {
    fn validate(&self, value: &Value) -> Result<(), EngineError>;
}

/// Maps a validated input value to an output value.
pub trait RecordTransform {
    fn apply(&self, input: &Value) -> Result<Value, EngineError>;
}

/// Builds validators and transformers from stored payload content.
pub trait TransformEngine {
    fn validator(
        &self,
        role: SchemaRole,
        schema: &str,
    ) -> Result<Box<dyn RecordValidator>, EngineError>;

    fn transformer(&self, definition: &str) -> Result<Box<dyn RecordTransform>, EngineError>;
}

/// Validate the input, apply the transformer, validate the result. The
/// single entry point the orchestrator calls.
pub fn transform_record(
    input: &Value,
    input_validator: &dyn RecordValidator,
    output_validator: &dyn RecordValidator,
    transformer: &dyn RecordTransform,
) -> Result<Value, EngineError> {
    input_validator.validate(input)?;
    let output = transformer.apply(input)?;
    output_validator.validate(&output)?;
    Ok(output)
}

// ============================================================================
// Default Engine
// ============================================================================

/// The default capability: JSON Schema validation, JMESPath expressions as
/// the transformer definition language.
#[derive(Debug, Default)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    pub fn new() -> Self {
        Self
    }
}

struct JsonSchemaValidator {
    role: SchemaRole,
    validator: jsonschema::Validator,
}

impl RecordValidator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<(), EngineError> {
        self.validator
            .validate(value)
            .map_err(|e| EngineError::ValidationFailed {
                role: self.role,
                message: e.to_string(),
            })
    }
}

struct JmespathTransform {
    expression: jmespath::Expression<'static>,
}

impl RecordTransform for JmespathTransform {
    fn apply(&self, input: &Value) -> Result<Value, EngineError> {
        let data = jmespath::Variable::from_json(&input.to_string())
            .map_err(|e| EngineError::TransformFailed(e.to_string()))?;
        let result = self
            .expression
            .search(data)
            .map_err(|e| EngineError::TransformFailed(e.to_string()))?;
        serde_json::to_value(result.as_ref())
            .map_err(|e| EngineError::TransformFailed(e.to_string()))
    }
}

impl TransformEngine for ExpressionEngine {
    fn validator(
        &self,
        role: SchemaRole,
        schema: &str,
    ) -> Result<Box<dyn RecordValidator>, EngineError> {
        let schema_value: Value =
            serde_json::from_str(schema).map_err(|e| EngineError::InvalidSchema {
                role,
                message: e.to_string(),
            })?;

        let validator =
            jsonschema::validator_for(&schema_value).map_err(|e| EngineError::InvalidSchema {
                role,
                message: e.to_string(),
            })?;

        Ok(Box::new(JsonSchemaValidator { role, validator }))
    }

    fn transformer(&self, definition: &str) -> Result<Box<dyn RecordTransform>, EngineError> {
        let expression = jmespath::compile(definition)
            .map_err(|e| EngineError::InvalidExpression(e.to_string()))?;

        Ok(Box::new(JmespathTransform { expression }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OBJECT_WITH_A: &str = r#"{"type":"object","required":["a"]}"#;

    #[test]
    fn test_validator_accepts_matching_value() {
        let engine = ExpressionEngine::new();
        let validator = engine.validator(SchemaRole::Input, OBJECT_WITH_A).unwrap();
        assert!(validator.validate(&json!({"a": 1})).is_ok());
    }

    #[test]
    fn test_validator_rejects_missing_key() {
        let engine = ExpressionEngine::new();
        let validator = engine.validator(SchemaRole::Input, OBJECT_WITH_A).unwrap();

        match validator.validate(&json!({"b": 1})) {
            Err(EngineError::ValidationFailed { role, .. }) => {
                assert_eq!(role, SchemaRole::Input);
            }
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_validator_rejects_malformed_schema() {
        let engine = ExpressionEngine::new();
        assert!(matches!(
            engine.validator(SchemaRole::Output, "not json"),
            Err(EngineError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_transformer_projects_fields() {
        let engine = ExpressionEngine::new();
        let transform = engine.transformer("{a: a, source: 'copy'}").unwrap();

        let output = transform.apply(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(output, json!({"a": 1, "source": "copy"}));
    }

    #[test]
    fn test_transformer_identity_expression() {
        let engine = ExpressionEngine::new();
        let transform = engine.transformer("@").unwrap();

        let input = json!({"a": 1, "nested": {"b": [1, 2]}});
        assert_eq!(transform.apply(&input).unwrap(), input);
    }

    #[test]
    fn test_transformer_rejects_bad_expression() {
        let engine = ExpressionEngine::new();
        assert!(matches!(
            engine.transformer("{unclosed"),
            Err(EngineError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_transform_record_validates_both_sides() {
        let engine = ExpressionEngine::new();
        let input_validator = engine.validator(SchemaRole::Input, OBJECT_WITH_A).unwrap();
        let output_validator = engine
            .validator(SchemaRole::Output, r#"{"type":"object","required":["a"]}"#)
            .unwrap();
        let transformer = engine.transformer("{a: a}").unwrap();

        let output = transform_record(
            &json!({"a": 7, "extra": true}),
            input_validator.as_ref(),
            output_validator.as_ref(),
            transformer.as_ref(),
        )
        .unwrap();
        assert_eq!(output, json!({"a": 7}));

        // Input that fails its schema never reaches the transformer.
        let err = transform_record(
            &json!({"b": 7}),
            input_validator.as_ref(),
            output_validator.as_ref(),
            transformer.as_ref(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ValidationFailed {
                role: SchemaRole::Input,
                ..
            }
        ));
    }

    #[test]
    fn test_transform_record_rejects_nonconforming_output() {
        let engine = ExpressionEngine::new();
        let input_validator = engine.validator(SchemaRole::Input, r#"{"type":"object"}"#).unwrap();
        let output_validator = engine
            .validator(SchemaRole::Output, r#"{"type":"object","required":["a"]}"#)
            .unwrap();
        // Drops the required key, so the output schema rejects the result.
        let transformer = engine.transformer("{b: a}").unwrap();

        let err = transform_record(
            &json!({"a": 1}),
            input_validator.as_ref(),
            output_validator.as_ref(),
            transformer.as_ref(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ValidationFailed {
                role: SchemaRole::Output,
                ..
            }
        ));
    }
}
