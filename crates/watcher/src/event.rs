use crate::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Modify,
    Delete,
    Rename,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Rename => "rename",
        }
    }

    /// Delete and rename invalidate the stored digest.
    #[must_use]
    pub const fn clears_hash(self) -> bool {
        matches!(self, Self::Delete | Self::Rename)
    }
}

/// A single categorized change, with `path` relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub operation: Operation,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, operation: Operation, category: Category) -> Self {
        Self {
            path: path.into(),
            operation,
            category,
            timestamp: Utc::now(),
        }
    }

    /// Forward-slash relative path, as used in findings and activity entries.
    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }
}
