use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the accuracy pipeline
#[derive(Debug, Error)]
pub enum AccuracyError {
    /// A merge or aggregation ran over zero samples. Kept distinct from a
    /// metric that happens to evaluate to zero.
    #[error("No samples to aggregate: {context}")]
    EmptyResult { context: String },

    #[error("Effective capacity missing for location {location_id}")]
    MissingCapacity {
        location_id: Uuid,
        timestamp: Option<DateTime<Utc>>,
    },

    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by a forecast, observation or location collaborator
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl AccuracyError {
    pub fn empty(context: impl Into<String>) -> Self {
        AccuracyError::EmptyResult {
            context: context.into(),
        }
    }

    /// Wrap a collaborator failure, unwrapping it when the collaborator
    /// already raised one of ours
    pub fn from_upstream(err: anyhow::Error) -> Self {
        match err.downcast::<AccuracyError>() {
            Ok(own) => own,
            Err(other) => AccuracyError::Upstream(other),
        }
    }

    /// True when the error signals an empty sample set rather than a failure
    pub fn is_empty_result(&self) -> bool {
        matches!(self, AccuracyError::EmptyResult { .. })
    }
}

pub type Result<T> = std::result::Result<T, AccuracyError>;
