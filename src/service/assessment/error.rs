//! Error types for variant assessment

use std::fmt;

use thiserror::Error;

use crate::model::VariantRequest;
use crate::service::llm::ProviderError;

/// What went wrong with one payload field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Invalid(String),
}

/// One unrecoverable payload field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub problem: FieldProblem,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            FieldProblem::Missing => write!(f, "{}: missing", self.field),
            FieldProblem::Invalid(reason) => write!(f, "{}: {}", self.field, reason),
        }
    }
}

/// Model output could not be turned into an assessment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    errors: Vec<FieldError>,
}

impl ParseError {
    pub(crate) fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub(crate) fn single(field: &str, problem: FieldProblem) -> Self {
        Self::new(vec![FieldError {
            field: field.to_string(),
            problem,
        }])
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Names of the fields that could not be recovered
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }

    pub fn names_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "malformed model output ({})", details.join("; "))
    }
}

impl std::error::Error for ParseError {}

/// Error type for a single variant assessment
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssessmentError {
    /// Provider failed fatally or transient retries were exhausted
    #[error("assessment of {request} failed after {attempts} provider attempt(s): {source}")]
    Provider {
        request: VariantRequest,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// Output was still malformed after the reformat prompt
    #[error("assessment of {request} failed: {source}")]
    Parse {
        request: VariantRequest,
        #[source]
        source: ParseError,
    },

    /// Assessment task ended without reporting a result
    #[error("assessment of {request} aborted: {message}")]
    Aborted {
        request: VariantRequest,
        message: String,
    },
}

impl AssessmentError {
    pub fn request(&self) -> &VariantRequest {
        match self {
            AssessmentError::Provider { request, .. }
            | AssessmentError::Parse { request, .. }
            | AssessmentError::Aborted { request, .. } => request,
        }
    }

    /// Stable identifier written to batch artifacts
    pub fn kind(&self) -> &'static str {
        match self {
            AssessmentError::Provider { source, .. } if source.is_retryable() => {
                "transient_provider_error"
            }
            AssessmentError::Provider { .. } => "fatal_provider_error",
            AssessmentError::Parse { .. } => "parse_error",
            AssessmentError::Aborted { .. } => "aborted",
        }
    }
}
