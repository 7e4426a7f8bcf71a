use taskwing_protocol::{ErrorCode, ErrorEnvelope, HasErrorCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("reference '{reference}' matches several tasks")]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("cycle detected: {0}")]
    Cycle(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("archive entry not found: {0}")]
    ArchiveNotFound(String),
}

impl HasErrorCode for TaskError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::ArchiveNotFound(_) => ErrorCode::TaskNotFound,
            Self::Ambiguous { .. } => ErrorCode::AmbiguousReference,
            Self::Cycle(_) => ErrorCode::CycleDetected,
            Self::Integrity(_) => ErrorCode::IntegrityViolation,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::IoError(_) | Self::Json(_) => ErrorCode::Internal,
        }
    }

    fn to_envelope(&self) -> ErrorEnvelope {
        let envelope = ErrorEnvelope::new(self.code(), self.to_string());
        match self {
            Self::Ambiguous {
                reference,
                candidates,
            } => envelope
                .with_detail("reference", reference.clone())
                .with_detail("candidates", candidates.clone())
                .with_hint("Use one of the candidate ids or a longer id prefix"),
            Self::NotFound(id) => envelope
                .with_detail("reference", id.clone())
                .with_hint("Use list-tasks or find-task to look up ids"),
            _ => envelope,
        }
    }
}
