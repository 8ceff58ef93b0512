//! Error taxonomy shared by the pipeline, the stores, and the HTTP layer.
//!
//! Malformed planner or classifier output is deliberately absent: it is
//! recovered locally and reported through
//! [`PlanOutcome::Fallback`](crate::plan::PlanOutcome::Fallback).

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("{dependency} timed out")]
    DependencyTimeout { dependency: String },
    #[error("{dependency} unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },
    #[error("no text could be extracted from the image")]
    EmptyExtraction,
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn unavailable(dependency: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            message: format!("{err:#}"),
        }
    }
}

/// Store and provider traits return `anyhow::Result`. A core [`Error`]
/// raised inside them keeps its variant; anything else is a storage failure.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) => Self::Storage {
                message: format!("{err:#}"),
            },
        }
    }
}
