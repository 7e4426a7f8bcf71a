//! Plans written to `.taskwing/specs/<slug>/` for tools outside the server.
//!
//! A plan is a titled document plus an ordered list of tasks. Generating one creates the tasks
//! in the [`TaskStore`] first and only then writes `spec.json`, `spec.md` and `tasks.json`, so
//! a rejected batch leaves no spec directory behind.

use crate::model::{NewTask, Task};
use crate::store::TaskStore;
use crate::{slugify, Result, TaskError};
use chrono::{DateTime, Utc};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use taskwing_protocol::fsio::{read_json, state_dir, write_json_atomic};

pub const SPECS_DIR_NAME: &str = "specs";
pub const SPEC_FILE_NAME: &str = "spec.json";
pub const SPEC_MARKDOWN_NAME: &str = "spec.md";
pub const SPEC_TASKS_NAME: &str = "tasks.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanRequest {
    pub title: String,
    /// Free text; checklist lines are turned into tasks when `tasks` is empty.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<NewTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub spec: Spec,
    pub tasks: Vec<Task>,
    pub dir: PathBuf,
}

/// Extracts items from `- [ ] x`, `- [x] x`, `* x`, `- x`, `1. x` and `1) x` lines.
#[must_use]
pub fn parse_checklist(text: &str) -> Vec<String> {
    text.lines().filter_map(checklist_item).collect()
}

fn checklist_item(line: &str) -> Option<String> {
    let line = line.trim();
    let rest = if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        let rest = rest.trim_start();
        ["[ ]", "[x]", "[X]"]
            .iter()
            .find_map(|box_| rest.strip_prefix(box_))
            .unwrap_or(rest)
    } else {
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let tail = &line[digits..];
        tail.strip_prefix(". ").or_else(|| tail.strip_prefix(") "))?
    };
    let item = rest.trim();
    (!item.is_empty()).then(|| item.to_string())
}

#[derive(Debug, Clone)]
pub struct SpecStore {
    dir: PathBuf,
}

impl SpecStore {
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            dir: state_dir(root).join(SPECS_DIR_NAME),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, slug: &str) -> Result<Option<Spec>> {
        Ok(read_json(&self.dir.join(slug).join(SPEC_FILE_NAME))?)
    }

    /// Every saved spec, ordered by slug.
    pub fn list(&self) -> Result<Vec<Spec>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut specs = Vec::new();
        for entry in entries {
            let path = entry?.path().join(SPEC_FILE_NAME);
            if let Some(spec) = read_json::<Spec>(&path)? {
                specs.push(spec);
            }
        }
        specs.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(specs)
    }

    /// Creates the plan's tasks and persists the spec next to them.
    ///
    /// Tasks parsed from a checklist depend on the item before them.
    pub fn generate_plan(&self, store: &TaskStore, request: PlanRequest) -> Result<GeneratedPlan> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::InvalidArgument("plan title must not be empty".to_string()));
        }
        let batch = if request.tasks.is_empty() {
            parse_checklist(&request.description)
                .into_iter()
                .enumerate()
                .map(|(position, item)| NewTask {
                    depends_on: position.checked_sub(1).into_iter().collect(),
                    ..NewTask::titled(item)
                })
                .collect()
        } else {
            request.tasks
        };
        if batch.is_empty() {
            return Err(TaskError::InvalidArgument(
                "plan has no tasks and its description has no checklist items".to_string(),
            ));
        }

        let tasks = store.add_many(batch)?;
        let slug = self.free_slug(&title);
        let spec = Spec {
            slug: slug.clone(),
            title,
            description: request.description.trim().to_string(),
            created_at: Utc::now(),
            task_ids: tasks.iter().map(|task| task.id.clone()).collect(),
        };
        let dir = self.dir.join(&slug);
        write_json_atomic(&dir.join(SPEC_FILE_NAME), &spec)?;
        write_json_atomic(&dir.join(SPEC_TASKS_NAME), &tasks)?;
        std::fs::write(dir.join(SPEC_MARKDOWN_NAME), render_markdown(&spec, &tasks))?;
        info!("generated plan '{}' with {} task(s)", spec.slug, tasks.len());
        Ok(GeneratedPlan { spec, tasks, dir })
    }

    fn free_slug(&self, title: &str) -> String {
        let base = slugify(title);
        if !self.dir.join(&base).exists() {
            return base;
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.dir.join(candidate).exists())
            .unwrap_or(base)
    }
}

fn render_markdown(spec: &Spec, tasks: &[Task]) -> String {
    let mut out = format!("# {}\n\n", spec.title);
    if !spec.description.is_empty() {
        let _ = writeln!(out, "{}\n", spec.description);
    }
    out.push_str("## Tasks\n\n");
    for task in tasks {
        let mark = if task.is_done() { "x" } else { " " };
        let _ = write!(out, "- [{mark}] {} `{}` ({})", task.title, task.short_id(), task.priority);
        if !task.dependencies.is_empty() {
            let deps: Vec<&str> = task
                .dependencies
                .iter()
                .map(|dep| dep.get(..8).unwrap_or(dep))
                .collect();
            let _ = write!(out, " after {}", deps.join(", "));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn checklist_lines_are_recognised() {
        let text = "Intro line\n- [ ] Design schema\n- [x] Pick a name\n  * Write docs\n1. Ship\n2) Announce\n-not an item\n- [ ]   \n";
        assert_eq!(
            parse_checklist(text),
            vec!["Design schema", "Pick a name", "Write docs", "Ship", "Announce"]
        );
    }

    #[test]
    fn plan_from_checklist_chains_tasks_and_writes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::open(dir.path()).expect("store");
        let specs = SpecStore::for_root(dir.path());

        let plan = specs
            .generate_plan(
                &store,
                PlanRequest {
                    title: "Auth Rollout".into(),
                    description: "- [ ] Schema\n- [ ] Endpoints\n- [ ] UI".into(),
                    tasks: Vec::new(),
                },
            )
            .expect("plan");
        assert_eq!(plan.spec.slug, "auth-rollout");
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.tasks[1].dependencies, vec![plan.tasks[0].id.clone()]);
        assert_eq!(plan.tasks[2].dependencies, vec![plan.tasks[1].id.clone()]);
        for name in [SPEC_FILE_NAME, SPEC_MARKDOWN_NAME, SPEC_TASKS_NAME] {
            assert!(plan.dir.join(name).is_file(), "{name}");
        }
        let markdown = std::fs::read_to_string(plan.dir.join(SPEC_MARKDOWN_NAME)).expect("md");
        assert!(markdown.starts_with("# Auth Rollout"));
        assert!(markdown.contains("- [ ] Endpoints"));

        let again = specs
            .generate_plan(
                &store,
                PlanRequest {
                    title: "Auth rollout".into(),
                    tasks: vec![NewTask::titled("Retro")],
                    ..PlanRequest::default()
                },
            )
            .expect("second plan");
        assert_eq!(again.spec.slug, "auth-rollout-2");
        assert_eq!(specs.list().expect("list").len(), 2);
        assert_eq!(store.list().expect("tasks").len(), 4);
    }

    #[test]
    fn empty_plan_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::open(dir.path()).expect("store");
        let specs = SpecStore::for_root(dir.path());
        let err = specs
            .generate_plan(
                &store,
                PlanRequest {
                    title: "Nothing".into(),
                    description: "just prose".into(),
                    tasks: Vec::new(),
                },
            )
            .expect_err("no tasks");
        assert!(matches!(err, TaskError::InvalidArgument(_)));
        assert!(!specs.dir().exists());
    }
}
