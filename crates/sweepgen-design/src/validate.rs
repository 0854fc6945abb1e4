use std::fs;
use std::path::Path;

use jsonschema::JSONSchema;
use serde_json::Value;
use sweepgen_core::errors::{ErrorInfo, SweepError};

/// Pluggable structural validation of configuration documents.
pub trait DocumentValidator: Send + Sync {
    /// Returns every violation found in `doc`; `Ok` when it is valid.
    fn validate(&self, doc: &Value) -> Result<(), Vec<String>>;
}

/// Validator backed by a compiled JSON Schema.
pub struct JsonSchemaValidator {
    schema: JSONSchema,
}

impl JsonSchemaValidator {
    pub fn from_value(schema: &Value) -> Result<Self, SweepError> {
        let compiled = JSONSchema::compile(schema).map_err(|err| {
            SweepError::MalformedInput(ErrorInfo::new("schema.compile", err.to_string()))
        })?;
        Ok(Self { schema: compiled })
    }

    /// Loads and compiles a JSON Schema file.
    pub fn from_path(path: &Path) -> Result<Self, SweepError> {
        let bytes = fs::read(path).map_err(|err| {
            SweepError::MalformedInput(
                ErrorInfo::new("schema.read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let schema: Value = serde_json::from_slice(&bytes).map_err(|err| {
            SweepError::MalformedInput(
                ErrorInfo::new("schema.parse", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_value(&schema)
    }
}

impl DocumentValidator for JsonSchemaValidator {
    fn validate(&self, doc: &Value) -> Result<(), Vec<String>> {
        self.schema.validate(doc).map_err(|errors| {
            errors
                .map(|err| format!("{}: {}", err.instance_path, err))
                .collect()
        })
    }
}

/// Converts validator output into a [`SweepError::SchemaViolation`].
pub(crate) fn schema_violation(code: &str, violations: Vec<String>) -> SweepError {
    let mut info = ErrorInfo::new(code, "document violates the configuration schema")
        .with_context("violations", violations.len().to_string());
    if let Some(first) = violations.first() {
        info = info.with_hint(first.clone());
    }
    SweepError::SchemaViolation(info)
}
