use taskwing_agents::AgentError;
use taskwing_protocol::{ErrorCode, HasErrorCode};
use taskwing_watcher::WatcherError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("engine stopped")]
    Stopped,

    #[error("{0}")]
    Other(String),
}

impl HasErrorCode for EngineError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Watcher(err) => err.code(),
            Self::Agent(err) => err.code(),
            Self::Toml(_) | Self::InvalidConfig(_) => ErrorCode::InvalidArgument,
            Self::Stopped => ErrorCode::ScheduleStopped,
            Self::IoError(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::FileNotFound
            }
            Self::IoError(_) | Self::Json(_) | Self::Other(_) => ErrorCode::Internal,
        }
    }
}
