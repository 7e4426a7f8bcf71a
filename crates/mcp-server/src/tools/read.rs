use super::schemas::{ListTasksRequest, TaskReferenceRequest};
use super::{decode, render, resolve_id, OrEnvelope, ToolContext, ToolOutput, ToolResult};
use serde_json::{json, Value};
use taskwing_tasks::{SortKey, TaskQuery};

pub(super) fn list_tasks(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: ListTasksRequest = decode(arguments)?;
    let parent_id = match request.parent.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(reference) => Some(resolve_id(ctx, reference)?),
        None => None,
    };
    let query = TaskQuery {
        status: request.status,
        parent_id,
        sort: SortKey::Created,
        limit: request.limit,
        ..TaskQuery::default()
    };
    let tasks = query.apply(&ctx.store.list().or_envelope()?);
    ToolOutput::new(
        render::task_list("Tasks", &tasks),
        &json!({ "count": tasks.len(), "tasks": tasks }),
    )
}

pub(super) fn get_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: TaskReferenceRequest = decode(arguments)?;
    let id = resolve_id(ctx, &request.reference)?;
    let task = ctx.store.get(&id).or_envelope()?;
    ToolOutput::new(render::task_detail(&task), &task)
}

/// Never fails on ambiguity; the candidate list is the answer.
pub(super) fn find_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: TaskReferenceRequest = decode(arguments)?;
    let resolution = ctx.store.resolve(&request.reference).or_envelope()?;
    ToolOutput::new(render::resolution(&resolution), &resolution)
}

pub(super) fn query_tasks(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let query: TaskQuery = decode(arguments)?;
    let tasks = query.apply(&ctx.store.list().or_envelope()?);
    ToolOutput::new(
        render::task_list("Matching tasks", &tasks),
        &json!({ "count": tasks.len(), "tasks": tasks }),
    )
}
