use super::schemas::{SetCurrentTaskRequest, TaskReferenceRequest, UpdateTaskRequest};
use super::{decode, invalid, render, resolve_all, resolve_id, OrEnvelope, ToolContext, ToolOutput, ToolResult};
use serde_json::{json, Value};
use taskwing_tasks::TaskPatch;

pub(super) fn update_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: UpdateTaskRequest = decode(arguments)?;
    let id = resolve_id(ctx, &request.reference)?;
    let parent_id = match request.parent {
        Some(reference) if reference.trim().is_empty() => Some(String::new()),
        Some(reference) => Some(resolve_id(ctx, &reference)?),
        None => None,
    };
    let dependencies = match request.dependencies {
        Some(references) => Some(resolve_all(ctx, &references)?),
        None => None,
    };
    let patch = TaskPatch {
        title: request.title,
        description: request.description,
        acceptance_criteria: request.acceptance_criteria,
        status: request.status,
        priority: request.priority,
        parent_id,
        dependencies,
    };
    if patch.is_empty() {
        return Err(invalid("nothing to update").with_hint("Pass at least one field to change"));
    }
    let task = ctx.store.update(&id, patch).or_envelope()?;
    ToolOutput::new(format!("Updated {}", render::task_line(&task)), &task)
}

pub(super) fn mark_done(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: TaskReferenceRequest = decode(arguments)?;
    let id = resolve_id(ctx, &request.reference)?;
    let task = ctx.store.mark_done(&id).or_envelope()?;
    ToolOutput::new(format!("Done: {}", render::task_line(&task)), &task)
}

pub(super) fn set_current_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: SetCurrentTaskRequest = decode(arguments)?;
    match request.reference.as_deref().filter(|r| !r.trim().is_empty()) {
        Some(_) if request.clear => Err(invalid("pass either reference or clear, not both")),
        Some(reference) => {
            let id = resolve_id(ctx, reference)?;
            let task = ctx.store.set_current(&id).or_envelope()?;
            ToolOutput::new(
                format!("Current task: {}", render::task_line(&task)),
                &json!({ "current": task }),
            )
        }
        None if request.clear => {
            ctx.store.clear_current().or_envelope()?;
            ToolOutput::new("Current task cleared", &json!({ "current": null }))
        }
        None => Err(invalid("reference is required unless clear is true")),
    }
}
