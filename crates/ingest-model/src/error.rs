use chrono::{DateTime, Utc};

/// The error taxonomy surfaced across the ingest boundary. Callers are
/// expected to match on this to pick an HTTP status (or equivalent); the
/// `Repository` variant is intentionally opaque (see `anyhow` guidance) since
/// infrastructure failures shouldn't leak storage internals.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("idempotency key conflict")]
    Conflict,

    #[error("event was previously rejected: {reason}")]
    PreviouslyRejected {
        reason: String,
        reviewed_at: DateTime<Utc>,
        reviewed_by: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("repository error")]
    Repository(#[source] anyhow::Error),
}

impl IngestError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Repository(err)
    }
}
