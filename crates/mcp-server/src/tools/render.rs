use std::fmt::Write as _;
use taskwing_tasks::{Resolution, Task, TaskSummary};

pub(super) fn task_line(task: &Task) -> String {
    format!(
        "[{}] {} ({}, {})",
        task.status,
        task.title,
        task.short_id(),
        task.priority
    )
}

pub(super) fn task_list(header: &str, tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return format!("{header}: none");
    }
    let mut out = format!("{header} ({}):", tasks.len());
    for task in tasks {
        out.push_str("\n- ");
        out.push_str(&task_line(task));
    }
    out
}

pub(super) fn task_detail(task: &Task) -> String {
    let mut out = task_line(task);
    let _ = write!(out, "\nid: {}", task.id);
    if !task.description.is_empty() {
        let _ = write!(out, "\n\n{}", task.description);
    }
    if !task.acceptance_criteria.is_empty() {
        let _ = write!(out, "\n\nAcceptance criteria:\n{}", task.acceptance_criteria);
    }
    if let Some(parent) = &task.parent_id {
        let _ = write!(out, "\nparent: {parent}");
    }
    for (label, ids) in [
        ("subtasks", &task.subtask_ids),
        ("depends on", &task.dependencies),
        ("blocks", &task.dependents),
    ] {
        if !ids.is_empty() {
            let _ = write!(out, "\n{label}: {}", ids.join(", "));
        }
    }
    out
}

pub(super) fn resolution(resolution: &Resolution) -> String {
    let mut out = resolution.message.clone();
    if !resolution.resolved {
        for hit in &resolution.matches {
            let _ = write!(out, "\n- {} ({}, score {:.2})", hit.title, hit.id, hit.score);
        }
    }
    out
}

pub(super) fn summary(summary: &TaskSummary) -> String {
    let counts: Vec<String> = summary
        .by_status
        .iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect();
    let mut out = format!("{} task(s): {}", summary.total, counts.join(", "));
    if let Some(current) = &summary.current {
        let _ = write!(out, "\ncurrent: {}", task_line(current));
    }
    if summary.blocked > 0 {
        let _ = write!(out, "\nblocked: {}", summary.blocked);
    }
    out.push('\n');
    out.push_str(&task_list("ready", &summary.ready));
    out
}
