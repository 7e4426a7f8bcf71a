//! The task tool surface.
//!
//! Every tool is a plain synchronous function over a [`ToolContext`]; the server runs them on
//! the blocking pool. A handler returns display text plus a structured JSON value, or an
//! [`ErrorEnvelope`] carrying one of the stable error codes.

mod create;
mod mutate;
mod overview;
mod read;
mod remove;
mod render;
pub mod schemas;

use log::warn;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use taskwing_protocol::jsonrpc::ToolDescriptor;
use taskwing_protocol::{ErrorCode, ErrorEnvelope, HasErrorCode};
use taskwing_tasks::{ArchiveStore, SpecStore, TaskStore};

pub type ToolResult = std::result::Result<ToolOutput, ErrorEnvelope>;

/// Stores a tool call may touch.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub store: TaskStore,
    pub archive: ArchiveStore,
    pub specs: SpecStore,
}

impl ToolContext {
    pub fn open(root: &Path) -> taskwing_tasks::Result<Self> {
        Ok(Self {
            store: TaskStore::open(root)?,
            archive: ArchiveStore::for_root(root),
            specs: SpecStore::for_root(root),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Value,
}

impl ToolOutput {
    pub fn new(text: impl Into<String>, structured: &impl Serialize) -> ToolResult {
        let structured = serde_json::to_value(structured)
            .map_err(|err| ErrorEnvelope::new(ErrorCode::Internal, err.to_string()))?;
        Ok(Self {
            text: text.into(),
            structured,
        })
    }
}

type Handler = fn(&ToolContext, Value) -> ToolResult;

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    schema: fn() -> Value,
    handler: Handler,
}

impl ToolSpec {
    #[must_use]
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: (self.schema)(),
        }
    }

    pub fn call(&self, ctx: &ToolContext, arguments: Value) -> ToolResult {
        (self.handler)(ctx, arguments)
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec").field("name", &self.name).finish_non_exhaustive()
    }
}

pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "task-summary",
        description: "Counts by status and priority, the current task and the next ready tasks.",
        schema: schema::<schemas::TaskSummaryRequest>,
        handler: overview::task_summary,
    },
    ToolSpec {
        name: "board-snapshot",
        description: "All tasks grouped into todo/doing/review/done columns.",
        schema: schema::<schemas::BoardSnapshotRequest>,
        handler: overview::board_snapshot,
    },
    ToolSpec {
        name: "add-task",
        description: "Create one task. Parent and dependencies accept ids, id prefixes or titles.",
        schema: schema::<schemas::AddTaskRequest>,
        handler: create::add_task,
    },
    ToolSpec {
        name: "batch-create-tasks",
        description: "Create several tasks atomically; later entries may depend on earlier ones by position.",
        schema: schema::<schemas::BatchCreateTasksRequest>,
        handler: create::batch_create_tasks,
    },
    ToolSpec {
        name: "generate-plan",
        description: "Create a plan's tasks (explicit list or checklist lines in the description) and save it under .taskwing/specs.",
        schema: schema::<taskwing_tasks::PlanRequest>,
        handler: create::generate_plan,
    },
    ToolSpec {
        name: "list-tasks",
        description: "List tasks, optionally by status or parent.",
        schema: schema::<schemas::ListTasksRequest>,
        handler: read::list_tasks,
    },
    ToolSpec {
        name: "get-task",
        description: "Full details of one task.",
        schema: schema::<schemas::TaskReferenceRequest>,
        handler: read::get_task,
    },
    ToolSpec {
        name: "find-task",
        description: "Resolve a free-form reference; returns candidates with scores when ambiguous.",
        schema: schema::<schemas::TaskReferenceRequest>,
        handler: read::find_task,
    },
    ToolSpec {
        name: "query-tasks",
        description: "Filter by status, priority, parent or text and sort by priority, created, updated or title.",
        schema: schema::<taskwing_tasks::TaskQuery>,
        handler: read::query_tasks,
    },
    ToolSpec {
        name: "update-task",
        description: "Change fields of one task. Dependency changes that would form a cycle are rejected.",
        schema: schema::<schemas::UpdateTaskRequest>,
        handler: mutate::update_task,
    },
    ToolSpec {
        name: "mark-done",
        description: "Mark one task done.",
        schema: schema::<schemas::TaskReferenceRequest>,
        handler: mutate::mark_done,
    },
    ToolSpec {
        name: "set-current-task",
        description: "Set or clear the task currently being worked on.",
        schema: schema::<schemas::SetCurrentTaskRequest>,
        handler: mutate::set_current_task,
    },
    ToolSpec {
        name: "delete-task",
        description: "Delete one task. Subtasks are detached and dependents lose the dependency.",
        schema: schema::<schemas::TaskReferenceRequest>,
        handler: remove::delete_task,
    },
    ToolSpec {
        name: "clear-tasks",
        description: "Remove done tasks (or a status, or everything with confirm), optionally archiving them.",
        schema: schema::<schemas::ClearTasksRequest>,
        handler: remove::clear_tasks,
    },
    ToolSpec {
        name: "bulk-tasks",
        description: "Apply mark-done, delete, set-status or set-priority to many references with per-item results.",
        schema: schema::<schemas::BulkTasksRequest>,
        handler: remove::bulk_tasks,
    },
];

#[must_use]
pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

#[must_use]
pub fn descriptors() -> Vec<ToolDescriptor> {
    TOOLS.iter().map(ToolSpec::descriptor).collect()
}

fn schema<T: JsonSchema>() -> Value {
    let mut value = schema_or_fallback(
        std::any::type_name::<T>(),
        serde_json::to_value(schemars::schema_for!(T)),
    );
    sanitize_json_schema_value(&mut value);
    value
}

fn schema_or_fallback(type_name: &str, schema: serde_json::Result<Value>) -> Value {
    schema.unwrap_or_else(|err| {
        warn!("schema for {type_name} did not serialize ({err}); advertising a bare object");
        json!({ "type": "object" })
    })
}

/// Keeps advertised schemas compact and draft-07 friendly.
fn sanitize_json_schema_value(schema: &mut Value) {
    match schema {
        Value::Array(items) => items.iter_mut().for_each(sanitize_json_schema_value),
        Value::Object(map) => {
            map.remove("title");
            map.remove("$schema");
            if matches!(map.get("nullable"), Some(Value::Bool(true))) {
                map.remove("nullable");
            }
            if let Some(format) = map.get("format").and_then(Value::as_str) {
                if !matches!(format, "date-time" | "date" | "uuid") {
                    map.remove("format");
                }
            }
            for (key, value) in map.iter_mut() {
                // Property and definition maps are keyed by name, not schema keywords.
                match (key.as_str(), value) {
                    ("properties" | "$defs" | "definitions", Value::Object(named)) => {
                        named.values_mut().for_each(sanitize_json_schema_value);
                    }
                    (_, value) => sanitize_json_schema_value(value),
                }
            }
        }
        _ => {}
    }
}

/// Missing or `null` arguments decode as `{}`.
fn decode<T: DeserializeOwned>(arguments: Value) -> Result<T, ErrorEnvelope> {
    let arguments = if arguments.is_null() {
        Value::Object(Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|err| {
        ErrorEnvelope::new(ErrorCode::InvalidArgument, format!("invalid arguments: {err}"))
            .with_hint("Check tools/list for the argument schema")
    })
}

fn invalid(message: impl Into<String>) -> ErrorEnvelope {
    ErrorEnvelope::new(ErrorCode::InvalidArgument, message)
}

trait OrEnvelope<T> {
    fn or_envelope(self) -> Result<T, ErrorEnvelope>;
}

impl<T, E: HasErrorCode + fmt::Display> OrEnvelope<T> for Result<T, E> {
    fn or_envelope(self) -> Result<T, ErrorEnvelope> {
        self.map_err(|err| err.to_envelope())
    }
}

/// Resolves a reference to exactly one task id.
fn resolve_id(ctx: &ToolContext, reference: &str) -> Result<String, ErrorEnvelope> {
    if reference.trim().is_empty() {
        return Err(invalid("reference must not be empty"));
    }
    ctx.store
        .resolve(reference)
        .and_then(taskwing_tasks::Resolution::into_task_id)
        .or_envelope()
}

fn resolve_all(ctx: &ToolContext, references: &[String]) -> Result<Vec<String>, ErrorEnvelope> {
    references
        .iter()
        .filter(|reference| !reference.trim().is_empty())
        .map(|reference| resolve_id(ctx, reference))
        .collect()
}
