use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute path could not be tokenized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("malformed attribute path \"{path}\": {reason}")]
    Malformed { path: String, reason: &'static str },
}

/// Page retrieval failure. Transient errors are retried, permanent ones are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure (HTTP {status})")]
    Permanent { status: u16 },

    #[error("page timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status code. `None` means the response is usable.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 | 500..=599 => Some(Self::Transient(format!("HTTP {}", status))),
            _ => Some(Self::Permanent { status }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedPath,
    TypeInferenceAmbiguity,
    StructuralMismatch,
    FetchFailure,
    InsufficientElements,
    TruncatedObject,
    ExampleFallback,
    SpanFallback,
    DuplicateOperation,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedPath => "malformed_path",
            Self::TypeInferenceAmbiguity => "type_inference_ambiguity",
            Self::StructuralMismatch => "structural_mismatch",
            Self::FetchFailure => "fetch_failure",
            Self::InsufficientElements => "insufficient_elements",
            Self::TruncatedObject => "truncated_object",
            Self::ExampleFallback => "example_fallback",
            Self::SpanFallback => "span_fallback",
            Self::DuplicateOperation => "duplicate_operation",
        }
    }
}

/// A non-fatal condition attached to an endpoint's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl From<&PathError> for Diagnostic {
    fn from(err: &PathError) -> Self {
        Diagnostic::new(DiagnosticKind::MalformedPath, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FetchError::from_status(200), None);
        assert!(FetchError::from_status(429).unwrap().is_transient());
        assert!(FetchError::from_status(503).unwrap().is_transient());
        assert_eq!(
            FetchError::from_status(404),
            Some(FetchError::Permanent { status: 404 })
        );
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::new(DiagnosticKind::StructuralMismatch, "data[2] differs from data[0]");
        assert_eq!(d.to_string(), "structural_mismatch: data[2] differs from data[0]");
    }

    #[test]
    fn path_error_converts_to_diagnostic() {
        let err = PathError::Malformed {
            path: "object-x".into(),
            reason: "fewer than three segments",
        };
        let d = Diagnostic::from(&err);
        assert_eq!(d.kind, DiagnosticKind::MalformedPath);
        assert!(d.message.contains("object-x"));
    }
}
