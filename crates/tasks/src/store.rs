//! The authoritative task list at `.taskwing/tasks/tasks.json`.
//!
//! Every mutation runs under an exclusive advisory lock on `tasks.lock`, re-reads the file,
//! applies the change to the in-memory copy, re-derives back-links, validates the whole set and
//! only then replaces the file. A failed validation leaves the file untouched.

use crate::graph::{rebuild_links, validate, would_create_cycle};
use crate::model::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
use crate::resolver::{resolve, Resolution};
use crate::{Result, TaskError};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use taskwing_protocol::fsio::{read_json, state_dir, write_json_atomic};

pub const TASKS_DIR_NAME: &str = "tasks";
pub const TASKS_FILE_NAME: &str = "tasks.json";
pub const CURRENT_FILE_NAME: &str = "current.json";
const LOCK_FILE_NAME: &str = "tasks.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTask {
    pub task_id: String,
    pub set_at: DateTime<Utc>,
}

/// Selection used by `clear-tasks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearScope {
    #[default]
    Done,
    Status(TaskStatus),
    All,
}

impl ClearScope {
    fn matches(self, task: &Task) -> bool {
        match self {
            Self::Done => task.is_done(),
            Self::Status(status) => task.status == status,
            Self::All => true,
        }
    }
}

/// Held for the duration of one read-modify-write.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    /// Opens (creating if needed) the store under `<root>/.taskwing/tasks` and checks that the
    /// existing file is readable.
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self {
            dir: state_dir(root).join(TASKS_DIR_NAME),
        };
        std::fs::create_dir_all(&store.dir)?;
        let tasks = store.list()?;
        debug!("task store at {} holds {} task(s)", store.dir.display(), tasks.len());
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.dir.join(TASKS_FILE_NAME)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE_NAME)
    }

    fn lock(&self) -> Result<StoreLock> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE_NAME))?;
        file.lock_exclusive()?;
        Ok(StoreLock { file })
    }

    /// Snapshot of every task, in stored order.
    pub fn list(&self) -> Result<Vec<Task>> {
        Ok(read_json(&self.tasks_path())?.unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.list()?
            .into_iter()
            .find(|task| task.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub fn resolve(&self, reference: &str) -> Result<Resolution> {
        Ok(resolve(reference, &self.list()?))
    }

    /// Resolves `reference` and loads the task, failing on ambiguity.
    pub fn find(&self, reference: &str) -> Result<Task> {
        let id = self.resolve(reference)?.into_task_id()?;
        self.get(&id)
    }

    /// Locked read-modify-write; `apply` sees the current set and nothing is written on error.
    pub fn mutate<T>(&self, apply: impl FnOnce(&mut Vec<Task>) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut tasks = self.list()?;
        let out = apply(&mut tasks)?;
        rebuild_links(&mut tasks);
        validate(&tasks)?;
        write_json_atomic(&self.tasks_path(), &tasks)?;
        Ok(out)
    }

    pub fn add(&self, new: NewTask) -> Result<Task> {
        let mut created = self.add_many(vec![new])?;
        created
            .pop()
            .ok_or_else(|| TaskError::Integrity("task was not created".to_string()))
    }

    /// Creates every task or none. `depends_on` indexes earlier entries of the same batch.
    pub fn add_many(&self, batch: Vec<NewTask>) -> Result<Vec<Task>> {
        if batch.is_empty() {
            return Err(TaskError::InvalidArgument("no tasks given".to_string()));
        }
        self.mutate(|tasks| {
            let now = Utc::now();
            let mut created: Vec<Task> = Vec::with_capacity(batch.len());
            for (position, new) in batch.into_iter().enumerate() {
                let title = new.title.trim();
                if title.is_empty() {
                    return Err(TaskError::InvalidArgument(format!(
                        "task #{position} has an empty title"
                    )));
                }
                let mut task = Task::new(title);
                task.created_at = now;
                task.updated_at = now;
                task.description = new.description.trim().to_string();
                task.acceptance_criteria = new.acceptance_criteria.trim().to_string();
                task.priority = new.priority.unwrap_or_default();
                task.set_status(new.status.unwrap_or_default(), now);
                task.parent_id = non_empty(new.parent_id);
                task.dependencies = new
                    .dependencies
                    .into_iter()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect();
                for index in new.depends_on {
                    let Some(earlier) = created.get(index).filter(|_| index < position) else {
                        return Err(TaskError::InvalidArgument(format!(
                            "task #{position} depends on #{index}, which is not an earlier task"
                        )));
                    };
                    task.dependencies.push(earlier.id.clone());
                }
                created.push(task);
            }
            let ids: Vec<String> = created.iter().map(|task| task.id.clone()).collect();
            tasks.extend(created);
            Ok(ids)
        })
        .and_then(|ids| {
            let all = self.list()?;
            Ok(ids
                .iter()
                .filter_map(|id| all.iter().find(|task| &task.id == id).cloned())
                .collect())
        })
    }

    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return Err(TaskError::InvalidArgument("nothing to update".to_string()));
        }
        self.mutate(|tasks| {
            if let Some(deps) = &patch.dependencies {
                for dep in deps {
                    if would_create_cycle(tasks, id, dep) {
                        return Err(TaskError::Cycle(format!("{id} cannot depend on {dep}")));
                    }
                }
            }
            let now = Utc::now();
            let task = find_mut(tasks, id)?;
            if let Some(title) = patch.title {
                let title = title.trim();
                if title.is_empty() {
                    return Err(TaskError::InvalidArgument("title must not be empty".to_string()));
                }
                task.title = title.to_string();
            }
            if let Some(description) = patch.description {
                task.description = description.trim().to_string();
            }
            if let Some(criteria) = patch.acceptance_criteria {
                task.acceptance_criteria = criteria.trim().to_string();
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(parent) = patch.parent_id {
                task.parent_id = non_empty(Some(parent));
            }
            if let Some(deps) = patch.dependencies {
                task.dependencies = deps;
            }
            match patch.status {
                Some(status) => task.set_status(status, now),
                None => task.updated_at = now,
            }
            Ok(())
        })?;
        self.get(id)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        self.update(
            id,
            TaskPatch {
                status: Some(status),
                ..TaskPatch::default()
            },
        )
    }

    pub fn set_priority(&self, id: &str, priority: TaskPriority) -> Result<Task> {
        self.update(
            id,
            TaskPatch {
                priority: Some(priority),
                ..TaskPatch::default()
            },
        )
    }

    pub fn mark_done(&self, id: &str) -> Result<Task> {
        self.set_status(id, TaskStatus::Done)
    }

    /// Deletes one task. Its subtasks are detached and other tasks drop it as a dependency.
    pub fn delete(&self, id: &str) -> Result<Task> {
        let removed = self.delete_where(|task| task.id == id)?;
        removed
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub fn clear(&self, scope: ClearScope) -> Result<Vec<Task>> {
        self.delete_where(|task| scope.matches(task))
    }

    fn delete_where(&self, mut doomed: impl FnMut(&Task) -> bool) -> Result<Vec<Task>> {
        let removed = self.mutate(|tasks| {
            let (removed, kept): (Vec<Task>, Vec<Task>) =
                std::mem::take(tasks).into_iter().partition(|task| doomed(task));
            let gone: HashSet<&str> = removed.iter().map(|task| task.id.as_str()).collect();
            *tasks = kept;
            for task in tasks.iter_mut() {
                if task
                    .parent_id
                    .as_deref()
                    .is_some_and(|parent| gone.contains(parent))
                {
                    task.parent_id = None;
                }
                task.dependencies.retain(|dep| !gone.contains(dep.as_str()));
            }
            Ok(removed)
        })?;

        if let Some(current) = self.current_pointer()? {
            if removed.iter().any(|task| task.id == current.task_id) {
                self.clear_current()?;
            }
        }
        Ok(removed)
    }

    pub fn set_current(&self, id: &str) -> Result<Task> {
        let task = self.get(id)?;
        write_json_atomic(
            &self.current_path(),
            &CurrentTask {
                task_id: task.id.clone(),
                set_at: Utc::now(),
            },
        )?;
        Ok(task)
    }

    /// The current task, or `None` when unset or pointing at a deleted task.
    pub fn current(&self) -> Result<Option<Task>> {
        let Some(pointer) = self.current_pointer()? else {
            return Ok(None);
        };
        match self.get(&pointer.task_id) {
            Ok(task) => Ok(Some(task)),
            Err(TaskError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn clear_current(&self) -> Result<()> {
        match std::fs::remove_file(self.current_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn current_pointer(&self) -> Result<Option<CurrentTask>> {
        Ok(read_json(&self.current_path())?)
    }
}

fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Result<&'a mut Task> {
    tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| TaskError::NotFound(id.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::open(dir.path()).expect("open");
        (dir, store)
    }

    #[test]
    fn add_links_parent_and_dependencies() {
        let (_dir, store) = store();
        let epic = store.add(NewTask::titled("Auth epic")).expect("epic");
        let child = store
            .add(NewTask {
                title: "Login form".into(),
                parent_id: Some(epic.id.clone()),
                dependencies: vec![epic.id.clone()],
                ..NewTask::default()
            })
            .expect("child");

        let epic = store.get(&epic.id).expect("reload");
        assert_eq!(epic.subtask_ids, vec![child.id.clone()]);
        assert_eq!(epic.dependents, vec![child.id.clone()]);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (_dir, store) = store();
        let err = store
            .add_many(vec![
                NewTask::titled("First"),
                NewTask {
                    title: "Second".into(),
                    dependencies: vec!["missing".into()],
                    ..NewTask::default()
                },
            ])
            .expect_err("dangling dependency");
        assert!(matches!(err, TaskError::Integrity(_)));
        assert!(store.list().expect("list").is_empty());

        let created = store
            .add_many(vec![
                NewTask::titled("Design"),
                NewTask {
                    title: "Build".into(),
                    depends_on: vec![0],
                    ..NewTask::default()
                },
            ])
            .expect("batch");
        assert_eq!(created[1].dependencies, vec![created[0].id.clone()]);

        let forward = store.add_many(vec![NewTask {
            title: "Self".into(),
            depends_on: vec![0],
            ..NewTask::default()
        }]);
        assert!(matches!(forward, Err(TaskError::InvalidArgument(_))));
    }

    #[test]
    fn update_refuses_cycles() {
        let (_dir, store) = store();
        let created = store
            .add_many(vec![
                NewTask::titled("A"),
                NewTask {
                    title: "B".into(),
                    depends_on: vec![0],
                    ..NewTask::default()
                },
            ])
            .expect("batch");
        let err = store
            .update(
                &created[0].id,
                TaskPatch {
                    dependencies: Some(vec![created[1].id.clone()]),
                    ..TaskPatch::default()
                },
            )
            .expect_err("cycle");
        assert!(matches!(err, TaskError::Cycle(_)));
        assert!(store.get(&created[0].id).expect("a").dependencies.is_empty());
    }

    #[test]
    fn mark_done_sets_completed_at() {
        let (_dir, store) = store();
        let task = store.add(NewTask::titled("Ship")).expect("add");
        let done = store.mark_done(&task.id).expect("done");
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.completed_at.is_some());
        let reopened = store.set_status(&task.id, TaskStatus::Doing).expect("reopen");
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn delete_detaches_and_clears_current() {
        let (_dir, store) = store();
        let parent = store.add(NewTask::titled("Parent")).expect("parent");
        let child = store
            .add(NewTask {
                title: "Child".into(),
                parent_id: Some(parent.id.clone()),
                dependencies: vec![parent.id.clone()],
                ..NewTask::default()
            })
            .expect("child");
        store.set_current(&parent.id).expect("current");

        store.delete(&parent.id).expect("delete");
        let child = store.get(&child.id).expect("child survives");
        assert_eq!(child.parent_id, None);
        assert!(child.dependencies.is_empty());
        assert_eq!(store.current().expect("current"), None);
        assert!(matches!(store.delete(&parent.id), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn clear_removes_only_the_scope() {
        let (_dir, store) = store();
        let keep = store.add(NewTask::titled("Open")).expect("open");
        let done = store.add(NewTask::titled("Closed")).expect("closed");
        store.mark_done(&done.id).expect("done");

        let removed = store.clear(ClearScope::Done).expect("clear");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().expect("list")[0].id, keep.id);
    }

    #[test]
    fn find_uses_the_resolver() {
        let (_dir, store) = store();
        let task = store.add(NewTask::titled("Write release notes")).expect("add");
        assert_eq!(store.find("release notes write").expect("find").id, task.id);
        assert!(matches!(store.find("zzz"), Err(TaskError::NotFound(_))));
    }
}
