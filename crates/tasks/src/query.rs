//! Filtering, sorting and board views over a task snapshot.

use crate::model::{Task, TaskPriority, TaskStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Highest priority first, then oldest.
    #[default]
    Priority,
    Created,
    Updated,
    Title,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Only direct subtasks of this id.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Case-insensitive substring of title or description.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskQuery {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|status| task.status != status) {
            return false;
        }
        if self.priority.is_some_and(|priority| task.priority != priority) {
            return false;
        }
        if let Some(parent) = self.parent_id.as_deref().filter(|p| !p.trim().is_empty()) {
            if task.parent_id.as_deref() != Some(parent.trim()) {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            if !task.title.to_lowercase().contains(&needle)
                && !task.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        let mut out: Vec<Task> = tasks.iter().filter(|task| self.matches(task)).cloned().collect();
        out.sort_by(|a, b| {
            let ordering = match self.sort {
                SortKey::Priority => b
                    .priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at)),
                SortKey::Created => a.created_at.cmp(&b.created_at),
                SortKey::Updated => a.updated_at.cmp(&b.updated_at),
                SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            }
            .then_with(|| a.id.cmp(&b.id));
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Counts plus what to pick up next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Task>,
    /// Open tasks whose dependencies are all done, highest priority first.
    pub ready: Vec<Task>,
    pub blocked: usize,
}

#[must_use]
pub fn summarize(tasks: &[Task], current: Option<Task>, ready_limit: usize) -> TaskSummary {
    let mut by_status: BTreeMap<String, usize> = TaskStatus::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    let mut by_priority: BTreeMap<String, usize> = TaskPriority::ALL
        .iter()
        .map(|priority| (priority.as_str().to_string(), 0))
        .collect();
    for task in tasks {
        *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
        *by_priority.entry(task.priority.as_str().to_string()).or_default() += 1;
    }

    let status_of: HashMap<&str, TaskStatus> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.status))
        .collect();
    let unblocked = |task: &Task| {
        task.dependencies
            .iter()
            .all(|dep| status_of.get(dep.as_str()) == Some(&TaskStatus::Done))
    };
    let mut blocked = 0;
    let mut ready_candidates = Vec::new();
    for task in tasks.iter().filter(|task| !task.is_done()) {
        if unblocked(task) {
            ready_candidates.push(task.clone());
        } else {
            blocked += 1;
        }
    }
    let ready = TaskQuery {
        limit: Some(ready_limit),
        ..TaskQuery::default()
    }
    .apply(&ready_candidates);

    TaskSummary {
        total: tasks.len(),
        by_status,
        by_priority,
        current,
        ready,
        blocked,
    }
}

/// Tasks grouped into status columns, each sorted by priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub columns: BTreeMap<String, Vec<BoardCard>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardCard {
    pub id: String,
    pub title: String,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub subtasks: usize,
    pub dependencies: usize,
}

#[must_use]
pub fn board(tasks: &[Task], current_task_id: Option<String>) -> BoardSnapshot {
    let columns: BTreeMap<String, Vec<BoardCard>> = TaskStatus::ALL
        .iter()
        .map(|&status| {
            let cards: Vec<BoardCard> = TaskQuery {
                status: Some(status),
                ..TaskQuery::default()
            }
            .apply(tasks)
            .into_iter()
            .map(|task| BoardCard {
                subtasks: task.subtask_ids.len(),
                dependencies: task.dependencies.len(),
                id: task.id,
                title: task.title,
                priority: task.priority,
                parent_id: task.parent_id,
            })
            .collect();
            (status.as_str().to_string(), cards)
        })
        .collect();
    BoardSnapshot {
        columns,
        current_task_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn task(id: &str, title: &str, priority: TaskPriority, age_secs: i64) -> Task {
        let mut task = Task::new(title);
        task.id = id.to_string();
        task.priority = priority;
        task.created_at = Utc::now() - Duration::seconds(age_secs);
        task
    }

    #[test]
    fn filters_and_sorts_by_priority() {
        let mut tasks = vec![
            task("a", "Write docs", TaskPriority::Low, 30),
            task("b", "Fix login bug", TaskPriority::Urgent, 10),
            task("c", "Login page polish", TaskPriority::High, 20),
        ];
        tasks[2].description = "docs too".into();

        let ids = |query: TaskQuery| -> Vec<String> {
            query.apply(&tasks).into_iter().map(|task| task.id).collect()
        };
        assert_eq!(ids(TaskQuery::default()), vec!["b", "c", "a"]);
        assert_eq!(
            ids(TaskQuery {
                text: Some("LOGIN".into()),
                ..TaskQuery::default()
            }),
            vec!["b", "c"]
        );
        assert_eq!(
            ids(TaskQuery {
                text: Some("docs".into()),
                sort: SortKey::Created,
                ..TaskQuery::default()
            }),
            vec!["a", "c"]
        );
        assert_eq!(
            ids(TaskQuery {
                sort: SortKey::Title,
                descending: true,
                limit: Some(1),
                ..TaskQuery::default()
            }),
            vec!["a"]
        );
    }

    #[test]
    fn summary_reports_ready_and_blocked() {
        let mut done = task("d", "Done", TaskPriority::Low, 40);
        done.status = TaskStatus::Done;
        done.completed_at = Some(Utc::now());
        let mut ready = task("r", "Ready", TaskPriority::Medium, 30);
        ready.dependencies = vec!["d".into()];
        let mut blocked = task("b", "Blocked", TaskPriority::Urgent, 20);
        blocked.dependencies = vec!["r".into()];
        let tasks = vec![done, ready, blocked];

        let summary = summarize(&tasks, None, 5);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status["done"], 1);
        assert_eq!(summary.by_status["todo"], 2);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.ready.len(), 1);
        assert_eq!(summary.ready[0].id, "r");

        let board = board(&tasks, Some("r".into()));
        assert_eq!(board.columns["todo"].len(), 2);
        assert_eq!(board.columns["todo"][0].id, "b");
        assert!(board.columns["review"].is_empty());
    }
}
