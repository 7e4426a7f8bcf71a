//! Link maintenance and integrity checks over the whole task set.

use crate::model::Task;
use crate::{Result, TaskError};
use std::collections::{HashMap, HashSet};

/// Recomputes `subtask_ids` and `dependents` from the forward links, in creation order.
pub fn rebuild_links(tasks: &mut [Task]) {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by(|&a, &b| {
        tasks[a]
            .created_at
            .cmp(&tasks[b].created_at)
            .then_with(|| tasks[a].id.cmp(&tasks[b].id))
    });

    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for &idx in &order {
        let task = &tasks[idx];
        if let Some(parent) = &task.parent_id {
            children
                .entry(parent.clone())
                .or_default()
                .push(task.id.clone());
        }
        for dep in &task.dependencies {
            dependents
                .entry(dep.clone())
                .or_default()
                .push(task.id.clone());
        }
    }
    for task in tasks.iter_mut() {
        task.dependencies = dedup_keep_order(std::mem::take(&mut task.dependencies));
        task.subtask_ids = children.remove(&task.id).unwrap_or_default();
        task.dependents = dedup_keep_order(dependents.remove(&task.id).unwrap_or_default());
    }
}

fn dedup_keep_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Checks every invariant of a task set about to be persisted.
pub fn validate(tasks: &[Task]) -> Result<()> {
    let ids: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    if ids.len() != tasks.len() {
        return Err(TaskError::Integrity("duplicate task id".to_string()));
    }

    for task in tasks {
        if task.title.trim().is_empty() {
            return Err(TaskError::Integrity(format!("task {} has an empty title", task.id)));
        }
        if task.is_done() != task.completed_at.is_some() {
            return Err(TaskError::Integrity(format!(
                "task {} is {} but completed_at is {}",
                task.id,
                task.status,
                if task.completed_at.is_some() { "set" } else { "unset" }
            )));
        }
        let referenced = task
            .parent_id
            .iter()
            .chain(&task.dependencies)
            .chain(&task.dependents)
            .chain(&task.subtask_ids);
        for id in referenced {
            if !ids.contains(id.as_str()) {
                return Err(TaskError::Integrity(format!(
                    "task {} references missing task {id}",
                    task.id
                )));
            }
        }
    }

    if let Some(id) = find_dependency_cycle(tasks) {
        return Err(TaskError::Cycle(format!("dependency cycle through task {id}")));
    }
    if let Some(id) = find_parent_cycle(tasks) {
        return Err(TaskError::Cycle(format!("parent cycle through task {id}")));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Returns a task id on a dependency cycle, if any.
#[must_use]
pub fn find_dependency_cycle(tasks: &[Task]) -> Option<String> {
    let adjacency: HashMap<&str, Vec<&str>> = tasks
        .iter()
        .map(|task| {
            (
                task.id.as_str(),
                task.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for task in tasks {
        if marks.contains_key(task.id.as_str()) {
            continue;
        }
        // Iterative DFS: (node, next child index).
        let mut stack: Vec<(&str, usize)> = vec![(task.id.as_str(), 0)];
        marks.insert(task.id.as_str(), Mark::Visiting);
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
            if next >= children.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            top.1 += 1;
            let child = children[next];
            match marks.get(child) {
                Some(Mark::Visiting) => return Some(child.to_string()),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child, Mark::Visiting);
                    stack.push((child, 0));
                }
            }
        }
    }
    None
}

/// Returns a task id whose parent chain loops back on itself, if any.
#[must_use]
pub fn find_parent_cycle(tasks: &[Task]) -> Option<String> {
    let parents: HashMap<&str, &str> = tasks
        .iter()
        .filter_map(|task| task.parent_id.as_deref().map(|parent| (task.id.as_str(), parent)))
        .collect();
    for task in tasks {
        let mut seen = HashSet::new();
        let mut current = task.id.as_str();
        while let Some(&parent) = parents.get(current) {
            if !seen.insert(current) {
                return Some(current.to_string());
            }
            current = parent;
        }
    }
    None
}

/// Whether adding `from → to` would close a dependency cycle.
#[must_use]
pub fn would_create_cycle(tasks: &[Task], from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    let adjacency: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.dependencies.as_slice()))
        .collect();
    let mut visited = HashSet::new();
    let mut stack = vec![to];
    while let Some(node) = stack.pop() {
        if node == from {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(deps) = adjacency.get(node) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn task(id: &str) -> Task {
        let mut task = Task::new(format!("Task {id}"));
        task.id = id.to_string();
        task
    }

    #[test]
    fn links_are_derived_from_forward_edges() {
        let a = task("a");
        let mut b = task("b");
        b.parent_id = Some("a".into());
        b.dependencies = vec!["a".into(), "a".into()];
        let mut tasks = vec![a, b];
        rebuild_links(&mut tasks);

        assert_eq!(tasks[0].subtask_ids, vec!["b"]);
        assert_eq!(tasks[0].dependents, vec!["b"]);
        assert_eq!(tasks[1].dependencies, vec!["a"]);
        validate(&tasks).expect("valid");
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let mut a = task("a");
        let mut b = task("b");
        let mut c = task("c");
        a.dependencies = vec!["b".into()];
        b.dependencies = vec!["c".into()];
        c.dependencies = vec!["a".into()];
        let mut tasks = vec![a, b, c];
        rebuild_links(&mut tasks);
        assert!(matches!(validate(&tasks), Err(TaskError::Cycle(_))));
        assert!(would_create_cycle(&tasks[..2], "c", "a"));
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let mut a = task("a");
        let mut b = task("b");
        a.parent_id = Some("b".into());
        b.parent_id = Some("a".into());
        assert!(find_parent_cycle(&[a, b]).is_some());
    }

    #[test]
    fn dangling_references_and_done_without_timestamp_fail() {
        let mut a = task("a");
        a.dependencies = vec!["ghost".into()];
        assert!(matches!(validate(&[a]), Err(TaskError::Integrity(_))));

        let mut done = task("d");
        done.status = TaskStatus::Done;
        assert!(matches!(validate(&[done.clone()]), Err(TaskError::Integrity(_))));
        done.completed_at = Some(Utc::now());
        validate(&[done]).expect("consistent");
    }
}
