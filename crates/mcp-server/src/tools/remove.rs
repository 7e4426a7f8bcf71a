use super::schemas::{
    BulkAction, BulkItemResult, BulkResult, BulkTasksRequest, ClearSelection, ClearTasksRequest,
    TaskReferenceRequest,
};
use super::{decode, invalid, render, resolve_id, OrEnvelope, ToolContext, ToolOutput, ToolResult};
use log::info;
use serde_json::{json, Value};
use std::fmt::Write as _;
use taskwing_protocol::ErrorEnvelope;
use taskwing_tasks::{ClearScope, Task};

pub(super) fn delete_task(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: TaskReferenceRequest = decode(arguments)?;
    let id = resolve_id(ctx, &request.reference)?;
    let task = ctx.store.delete(&id).or_envelope()?;
    ToolOutput::new(format!("Deleted {}", render::task_line(&task)), &task)
}

pub(super) fn clear_tasks(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: ClearTasksRequest = decode(arguments)?;
    let scope = match (request.scope, request.status) {
        (ClearSelection::Done, _) => ClearScope::Done,
        (ClearSelection::Status, Some(status)) => ClearScope::Status(status),
        (ClearSelection::Status, None) => return Err(invalid("scope 'status' needs a status")),
        (ClearSelection::All, _) if !request.confirm => {
            return Err(invalid("scope 'all' deletes every task")
                .with_hint("Repeat the call with confirm=true"))
        }
        (ClearSelection::All, _) => ClearScope::All,
    };

    let removed = ctx.store.clear(scope).or_envelope()?;
    let archived = if request.archive {
        ctx.archive.archive_all(removed.clone()).or_envelope()?.len()
    } else {
        0
    };
    info!("cleared {} task(s), archived {archived}", removed.len());

    let mut text = render::task_list("Removed", &removed);
    if request.archive {
        let _ = write!(text, "\nArchived {archived} task(s)");
    }
    ToolOutput::new(
        text,
        &json!({ "removed": removed.len(), "archived": archived, "tasks": removed }),
    )
}

pub(super) fn bulk_tasks(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: BulkTasksRequest = decode(arguments)?;
    if request.references.is_empty() {
        return Err(invalid("references must not be empty"));
    }
    match request.action {
        BulkAction::SetStatus if request.status.is_none() => {
            return Err(invalid("set-status needs a status"));
        }
        BulkAction::SetPriority if request.priority.is_none() => {
            return Err(invalid("set-priority needs a priority"));
        }
        _ => {}
    }

    let items: Vec<BulkItemResult> = request
        .references
        .iter()
        .map(|reference| {
            let outcome = apply_one(ctx, &request, reference);
            match outcome {
                Ok(task) => BulkItemResult {
                    reference: reference.clone(),
                    ok: true,
                    task: Some(task),
                    error: None,
                },
                Err(error) => BulkItemResult {
                    reference: reference.clone(),
                    ok: false,
                    task: None,
                    error: Some(error),
                },
            }
        })
        .collect();
    let succeeded = items.iter().filter(|item| item.ok).count();
    let result = BulkResult {
        action: request.action,
        succeeded,
        failed: items.len() - succeeded,
        items,
    };

    let mut text = format!("{succeeded}/{} succeeded", result.items.len());
    for item in result.items.iter().filter(|item| !item.ok) {
        if let Some(error) = &item.error {
            let _ = write!(text, "\n- {}: {}", item.reference, error);
        }
    }
    ToolOutput::new(text, &result)
}

fn apply_one(
    ctx: &ToolContext,
    request: &BulkTasksRequest,
    reference: &str,
) -> Result<Task, ErrorEnvelope> {
    let id = resolve_id(ctx, reference)?;
    let result = match (request.action, request.status, request.priority) {
        (BulkAction::MarkDone, _, _) => ctx.store.mark_done(&id),
        (BulkAction::Delete, _, _) => ctx.store.delete(&id),
        (BulkAction::SetStatus, Some(status), _) => ctx.store.set_status(&id, status),
        (BulkAction::SetPriority, _, Some(priority)) => ctx.store.set_priority(&id, priority),
        (BulkAction::SetStatus | BulkAction::SetPriority, _, _) => {
            return Err(invalid("missing value for bulk action"))
        }
    };
    result.or_envelope()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use taskwing_protocol::ErrorCode;

    #[test]
    fn bulk_reports_each_item() {
        let (_dir, ctx) = context();
        ok(&ctx, "add-task", json!({"title": "Alpha release"}));
        ok(&ctx, "add-task", json!({"title": "Beta release"}));

        let result = ok(
            &ctx,
            "bulk-tasks",
            json!({"action": "mark-done", "references": ["alpha release", "beta release", "gamma"]}),
        );
        assert_eq!(result["succeeded"], 2);
        assert_eq!(result["failed"], 1);
        assert_eq!(result["items"][2]["error"]["code"], "TaskNotFound");

        let err = call(&ctx, "bulk-tasks", json!({"action": "set-status", "references": ["alpha"]}))
            .expect_err("missing status");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn clear_with_archive_moves_done_tasks() {
        let (dir, ctx) = context();
        ok(&ctx, "add-task", json!({"title": "Keep me"}));
        ok(&ctx, "add-task", json!({"title": "Finished work"}));
        ok(&ctx, "mark-done", json!({"reference": "finished work"}));

        let cleared = ok(&ctx, "clear-tasks", json!({"archive": true}));
        assert_eq!(cleared["removed"], 1);
        assert_eq!(cleared["archived"], 1);
        assert!(dir.path().join(".taskwing/archive/index.json").is_file());
        assert_eq!(ok(&ctx, "list-tasks", json!({}))["count"], 1);

        let err = call(&ctx, "clear-tasks", json!({"scope": "all"})).expect_err("needs confirm");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        ok(&ctx, "clear-tasks", json!({"scope": "all", "confirm": true}));
        assert_eq!(ok(&ctx, "list-tasks", json!({}))["count"], 0);
    }

    #[test]
    fn delete_by_reference() {
        let (_dir, ctx) = context();
        ok(&ctx, "add-task", json!({"title": "Obsolete spike"}));
        let deleted = ok(&ctx, "delete-task", json!({"reference": "obsolete spike"}));
        assert_eq!(deleted["title"], "Obsolete spike");
        let err = call(&ctx, "delete-task", json!({"reference": "obsolete spike"}))
            .expect_err("gone");
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }
}
