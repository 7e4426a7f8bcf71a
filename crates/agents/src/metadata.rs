//! Well-known keys of the open `Finding::metadata` map, with typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const COMPONENT: &str = "component";
pub const SEVERITY: &str = "severity";
pub const QUESTIONS: &str = "questions";
pub const TASKS: &str = "tasks";
pub const IS_READY_TO_PLAN: &str = "is_ready_to_plan";

pub const WELL_KNOWN_KEYS: &[&str] = &[COMPONENT, SEVERITY, QUESTIONS, TASKS, IS_READY_TO_PLAN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "major" => Some(Self::High),
            "critical" | "blocker" => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One step of a plan carried under [`TASKS`]. `depends_on` holds indices into the same list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlannedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

#[must_use]
pub fn component(metadata: &Map<String, Value>) -> Option<&str> {
    metadata.get(COMPONENT).and_then(Value::as_str)
}

#[must_use]
pub fn severity(metadata: &Map<String, Value>) -> Option<Severity> {
    metadata
        .get(SEVERITY)
        .and_then(Value::as_str)
        .and_then(Severity::parse)
}

#[must_use]
pub fn questions(metadata: &Map<String, Value>) -> Vec<String> {
    metadata
        .get(QUESTIONS)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[must_use]
pub fn is_ready_to_plan(metadata: &Map<String, Value>) -> Option<bool> {
    metadata.get(IS_READY_TO_PLAN).and_then(Value::as_bool)
}

/// Planned tasks; malformed entries are skipped.
#[must_use]
pub fn tasks(metadata: &Map<String, Value>) -> Vec<PlannedTask> {
    let Some(items) = metadata.get(TASKS).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<PlannedTask>(item.clone()).ok())
        .filter(|task| !task.title.trim().is_empty())
        .collect()
}

pub fn set_questions(metadata: &mut Map<String, Value>, questions: &[String]) {
    metadata.insert(
        QUESTIONS.to_string(),
        Value::Array(questions.iter().cloned().map(Value::String).collect()),
    );
}

pub fn set_tasks(metadata: &mut Map<String, Value>, tasks: &[PlannedTask]) {
    let items = tasks
        .iter()
        .filter_map(|task| serde_json::to_value(task).ok())
        .collect();
    metadata.insert(TASKS.to_string(), Value::Array(items));
}
