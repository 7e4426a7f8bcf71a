//! Maps a free-form reference (id, id prefix or words from a title) to a task.
//!
//! Resolution order is fixed: exact id, unique id prefix of at least [`MIN_PREFIX_LEN`]
//! characters, then fuzzy token-set matching on titles and descriptions. Results are fully
//! determined by the reference and the task set.

use crate::model::Task;
use crate::{Result, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MIN_PREFIX_LEN: usize = 8;
pub const CONFIDENT_SCORE: f64 = 0.7;
/// Description hits count for less than title hits.
pub const DESCRIPTION_WEIGHT: f64 = 0.8;
pub const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactId,
    IdPrefix,
    Title,
    Description,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMatch {
    pub id: String,
    pub title: String,
    pub score: f64,
    pub matched_on: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub reference: String,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub matches: Vec<ReferenceMatch>,
    pub message: String,
}

impl Resolution {
    fn confident(reference: &str, hit: ReferenceMatch) -> Self {
        Self {
            reference: reference.to_string(),
            resolved: true,
            task_id: Some(hit.id.clone()),
            message: format!("Resolved to '{}' ({})", hit.title, short(&hit.id)),
            matches: vec![hit],
        }
    }

    /// The resolved id, or the matching error for callers that need exactly one task.
    pub fn into_task_id(self) -> Result<String> {
        if let Some(id) = self.task_id {
            return Ok(id);
        }
        if self.matches.is_empty() {
            return Err(TaskError::NotFound(self.reference));
        }
        Err(TaskError::Ambiguous {
            reference: self.reference,
            candidates: self.matches.into_iter().map(|hit| hit.id).collect(),
        })
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[must_use]
pub fn resolve(reference: &str, tasks: &[Task]) -> Resolution {
    let needle = reference.trim();
    if needle.is_empty() {
        return Resolution {
            reference: reference.to_string(),
            resolved: false,
            task_id: None,
            matches: Vec::new(),
            message: "Empty reference".to_string(),
        };
    }
    let lowered = needle.to_ascii_lowercase();

    if let Some(task) = tasks.iter().find(|task| task.id.eq_ignore_ascii_case(needle)) {
        return Resolution::confident(needle, hit(task, 1.0, MatchKind::ExactId));
    }

    if lowered.len() >= MIN_PREFIX_LEN {
        let prefixed: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.id.to_ascii_lowercase().starts_with(&lowered))
            .collect();
        if let [task] = prefixed.as_slice() {
            return Resolution::confident(needle, hit(task, 1.0, MatchKind::IdPrefix));
        }
    }

    let query = tokens(needle);
    let mut matches: Vec<ReferenceMatch> = tasks
        .iter()
        .filter_map(|task| {
            let title = jaccard(&query, &tokens(&task.title));
            let description = jaccard(&query, &tokens(&task.description)) * DESCRIPTION_WEIGHT;
            let (score, kind) = if description > title {
                (description, MatchKind::Description)
            } else {
                (title, MatchKind::Title)
            };
            (score > 0.0).then(|| hit(task, round(score), kind))
        })
        .collect();
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(MAX_CANDIDATES);

    let unique_top = match matches.as_slice() {
        [top] => top.score >= CONFIDENT_SCORE,
        [top, second, ..] => top.score >= CONFIDENT_SCORE && second.score < top.score,
        [] => false,
    };
    if unique_top {
        let top = matches.swap_remove(0);
        return Resolution::confident(needle, top);
    }

    let message = match matches.first() {
        None => format!("No task matches '{needle}'"),
        Some(top) => format!(
            "'{needle}' is ambiguous ({} candidates); best match is '{}' ({}, score {:.2})",
            matches.len(),
            top.title,
            short(&top.id),
            top.score
        ),
    };
    Resolution {
        reference: needle.to_string(),
        resolved: false,
        task_id: None,
        matches,
        message,
    }
}

fn hit(task: &Task, score: f64, matched_on: MatchKind) -> ReferenceMatch {
    ReferenceMatch {
        id: task.id.clone(),
        title: task.title.clone(),
        score,
        matched_on,
    }
}

fn round(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

/// Lower-cased alphanumeric words.
fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.union(b).count();
    shared as f64 / union as f64
}
