//! Argument types for every tool. Their JSON schemas are what `tools/list` advertises.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use taskwing_protocol::ErrorEnvelope;
use taskwing_tasks::{NewTask, Task, TaskPriority, TaskStatus};

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TaskSummaryRequest {
    /// Maximum number of ready tasks to list (default: 5)
    #[serde(default)]
    pub ready_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BoardSnapshotRequest {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AddTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Parent task: id, id prefix or title words
    #[serde(default)]
    pub parent: Option<String>,
    /// Tasks this one depends on: ids, id prefixes or title words
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BatchCreateTasksRequest {
    /// Created together or not at all. `depends_on` holds positions of earlier entries.
    pub tasks: Vec<NewTask>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListTasksRequest {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Only subtasks of this task (reference)
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TaskReferenceRequest {
    /// Task id, id prefix (8+ characters) or words from the title
    pub reference: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct UpdateTaskRequest {
    /// Task id, id prefix (8+ characters) or words from the title
    pub reference: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// New parent reference; an empty string detaches the task
    #[serde(default)]
    pub parent: Option<String>,
    /// Replaces the dependency list; entries are references
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SetCurrentTaskRequest {
    /// Task to make current; omit together with `clear` to unset
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub clear: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClearSelection {
    #[default]
    Done,
    Status,
    All,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ClearTasksRequest {
    /// Which tasks to remove (default: done)
    #[serde(default)]
    pub scope: ClearSelection,
    /// Required with scope `status`
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Move the removed tasks into the archive first
    #[serde(default)]
    pub archive: bool,
    /// Must be true for scope `all`
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BulkAction {
    MarkDone,
    Delete,
    SetStatus,
    SetPriority,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BulkTasksRequest {
    pub action: BulkAction,
    /// Each entry is resolved on its own; failures do not stop the rest
    pub references: Vec<String>,
    /// Required for `set-status`
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Required for `set-priority`
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub reference: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub action: BulkAction,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BulkItemResult>,
}
