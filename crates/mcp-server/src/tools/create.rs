use super::schemas::{AddTaskRequest, BatchCreateTasksRequest};
use super::{decode, invalid, render, resolve_all, resolve_id, OrEnvelope, ToolContext, ToolOutput, ToolResult};
use serde_json::{json, Value};
use taskwing_tasks::{NewTask, PlanRequest};

pub(super) fn add_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: AddTaskRequest = decode(arguments)?;
    if request.title.trim().is_empty() {
        return Err(invalid("title must not be empty"));
    }
    let parent_id = match request.parent.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(reference) => Some(resolve_id(ctx, reference)?),
        None => None,
    };
    let task = ctx
        .store
        .add(NewTask {
            title: request.title,
            description: request.description,
            acceptance_criteria: request.acceptance_criteria,
            priority: request.priority,
            status: request.status,
            parent_id,
            dependencies: resolve_all(ctx, &request.dependencies)?,
            depends_on: Vec::new(),
        })
        .or_envelope()?;
    ToolOutput::new(format!("Created {}", render::task_line(&task)), &task)
}

pub(super) fn batch_create_tasks(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: BatchCreateTasksRequest = decode(arguments)?;
    if request.tasks.is_empty() {
        return Err(invalid("tasks must not be empty"));
    }
    let mut batch = Vec::with_capacity(request.tasks.len());
    for mut new in request.tasks {
        if let Some(parent) = new.parent_id.as_deref().filter(|p| !p.trim().is_empty()) {
            new.parent_id = Some(resolve_id(ctx, parent)?);
        }
        new.dependencies = resolve_all(ctx, &new.dependencies)?;
        batch.push(new);
    }
    let tasks = ctx.store.add_many(batch).or_envelope()?;
    ToolOutput::new(
        render::task_list("Created", &tasks),
        &json!({ "created": tasks.len(), "tasks": tasks }),
    )
}

pub(super) fn generate_plan(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: PlanRequest = decode(arguments)?;
    let plan = ctx.specs.generate_plan(&ctx.store, request).or_envelope()?;
    let text = format!(
        "{}\nSaved as specs/{}",
        render::task_list(&format!("Plan '{}'", plan.spec.title), &plan.tasks),
        plan.spec.slug
    );
    ToolOutput::new(
        text,
        &json!({ "spec": plan.spec, "tasks": plan.tasks }),
    )
}
