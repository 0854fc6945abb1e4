//! Structured error types shared across sweepgen crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code used for registry calls that ran out of time.
pub const REGISTRY_TIMEOUT: &str = "registry.timeout";

/// Structured payload attached to every [`SweepError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (sweep, arm, row, path, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type returned by the sweep combination engine.
///
/// Every variant except [`SweepError::RegistryConflict`] is unrecoverable
/// for the current run: the operator has to fix the inputs and re-invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail")]
pub enum SweepError {
    /// Bad directory layout, unparsable document or unusable configuration.
    #[error("malformed input: {0}")]
    MalformedInput(ErrorInfo),
    /// A document failed structural schema validation.
    #[error("schema violation: {0}")]
    SchemaViolation(ErrorInfo),
    /// The experiment design resolved to zero combinations.
    #[error("empty design: {0}")]
    EmptyDesign(ErrorInfo),
    /// A manifest row references a sweep or arm that no longer exists.
    #[error("unresolved arm: {0}")]
    UnresolvedArm(ErrorInfo),
    /// A delta targets a location missing after prior edits.
    #[error("merge error: {0}")]
    Merge(ErrorInfo),
    /// Registry reconciliation failed (description mismatch or timeout).
    #[error("registry conflict: {0}")]
    RegistryConflict(ErrorInfo),
    /// Filesystem failures while writing outputs.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Encoding failures for documents, manifests or hashes.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SweepError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SweepError::MalformedInput(info)
            | SweepError::SchemaViolation(info)
            | SweepError::EmptyDesign(info)
            | SweepError::UnresolvedArm(info)
            | SweepError::Merge(info)
            | SweepError::RegistryConflict(info)
            | SweepError::Io(info)
            | SweepError::Serde(info) => info,
        }
    }

    /// Builds the timeout sub-case of [`SweepError::RegistryConflict`].
    pub fn registry_timeout(message: impl Into<String>) -> Self {
        SweepError::RegistryConflict(ErrorInfo::new(REGISTRY_TIMEOUT, message))
    }

    /// True when the operation may succeed if simply attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SweepError::RegistryConflict(info) if info.code == REGISTRY_TIMEOUT)
    }
}
