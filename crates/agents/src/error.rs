use crate::model::ModelError;
use taskwing_protocol::{ErrorCode, HasErrorCode, PathError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("failed to parse model response: {reason}")]
    ParseFailure { reason: String, preview: String },

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Path(#[from] PathError),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("tool denied: {0}")]
    ToolDenied(String),

    #[error("git unavailable: {0}")]
    GitUnavailable(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HasErrorCode for AgentError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownAgent(_) => ErrorCode::UnknownAgent,
            Self::ParseFailure { .. } => ErrorCode::ParseFailure,
            Self::Model(ModelError::Cancelled) | Self::Cancelled => {
                ErrorCode::CancellationRequested
            }
            Self::Model(_) => ErrorCode::ModelUnavailable,
            Self::Path(_) => ErrorCode::PathTraversal,
            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::CommandNotAllowed(_) => ErrorCode::CommandNotAllowed,
            Self::ToolDenied(_) => ErrorCode::ToolDenied,
            Self::GitUnavailable(_) => ErrorCode::GitUnavailable,
            Self::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::IoError(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::FileNotFound
            }
            Self::IoError(_) | Self::Json(_) => ErrorCode::Internal,
        }
    }

    fn to_envelope(&self) -> taskwing_protocol::ErrorEnvelope {
        let envelope = taskwing_protocol::ErrorEnvelope::new(self.code(), self.to_string());
        match self {
            Self::ParseFailure { preview, .. } => envelope.with_detail("preview", preview.clone()),
            _ => envelope,
        }
    }
}

impl AgentError {
    #[must_use]
    pub const fn is_tool_binding_unsupported(&self) -> bool {
        matches!(self, Self::Model(ModelError::ToolBindingUnsupported(_)))
    }
}
