use super::schemas::{BoardSnapshotRequest, TaskSummaryRequest};
use super::{decode, render, OrEnvelope, ToolContext, ToolOutput, ToolResult};
use serde_json::Value;
use std::fmt::Write as _;
use taskwing_tasks::{board, summarize};

const DEFAULT_READY_LIMIT: usize = 5;

pub(super) fn task_summary(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let request: TaskSummaryRequest = decode(arguments)?;
    let tasks = ctx.store.list().or_envelope()?;
    let current = ctx.store.current().or_envelope()?;
    let summary = summarize(
        &tasks,
        current,
        request.ready_limit.unwrap_or(DEFAULT_READY_LIMIT),
    );
    ToolOutput::new(render::summary(&summary), &summary)
}

pub(super) fn board_snapshot(ctx: &ToolContext, arguments: Value) -> ToolResult {
    let BoardSnapshotRequest {} = decode(arguments)?;
    let tasks = ctx.store.list().or_envelope()?;
    let current = ctx.store.current().or_envelope()?;
    let snapshot = board(&tasks, current.map(|task| task.id));

    let mut text = String::new();
    for (column, cards) in &snapshot.columns {
        let _ = write!(text, "{column} ({})", cards.len());
        for card in cards {
            let marker = if snapshot.current_task_id.as_deref() == Some(card.id.as_str()) {
                "*"
            } else {
                "-"
            };
            let short = card.id.get(..8).unwrap_or(&card.id);
            let _ = write!(text, "\n  {marker} {} ({short}, {})", card.title, card.priority);
        }
        text.push('\n');
    }
    ToolOutput::new(text.trim_end(), &snapshot)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn summary_and_board_report_current_task() {
        let (_dir, ctx) = context();
        let created = ok(&ctx, "add-task", json!({"title": "Wire login", "priority": "high"}));
        let id = created["id"].as_str().expect("id").to_string();
        ok(&ctx, "set-current-task", json!({"reference": id}));

        let summary = ok(&ctx, "task-summary", json!({}));
        assert_eq!(summary["total"], 1);
        assert_eq!(summary["current"]["id"], id.as_str());
        assert_eq!(summary["ready"][0]["title"], "Wire login");

        let board = ok(&ctx, "board-snapshot", json!({}));
        assert_eq!(board["current_task_id"], id.as_str());
        assert_eq!(board["columns"]["todo"][0]["title"], "Wire login");
        assert_eq!(board["columns"]["done"], json!([]));
    }
}
