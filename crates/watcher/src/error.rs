use taskwing_protocol::{ErrorCode, HasErrorCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatcherError>;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("watch backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("watcher stopped")]
    Stopped,

    #[error("{0}")]
    Other(String),
}

impl HasErrorCode for WatcherError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::IoError(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::FileNotFound
            }
            Self::InvalidPath(_) => ErrorCode::FileNotFound,
            Self::Stopped => ErrorCode::ScheduleStopped,
            _ => ErrorCode::Internal,
        }
    }
}
