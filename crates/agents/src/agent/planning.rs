use super::{AgentConfig, AgentCore, Input, Output};
use crate::finding::{Confidence, Finding, FindingType};
use crate::metadata::{self, PlannedTask, IS_READY_TO_PLAN};
use crate::Result;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const GOAL_KEYS: &[&str] = &["goal", "request", "description"];

const CLARIFYING_PROMPT: &str = r#"You help refine a development goal for the project "{{project}}" before it is planned.

Goal:
{{goal}}

Known context:
{{context}}

Ask only the questions whose answers would change the plan. When the goal is specific enough, say so.
Respond with a single JSON object and nothing else:
{"questions": ["..."], "is_ready_to_plan": false, "refined_goal": "..."}"#;

const PLANNING_PROMPT: &str = r#"You break a development goal for the project "{{project}}" into an ordered task list.

Goal:
{{goal}}

Known context:
{{context}}

Each task must be independently reviewable. depends_on lists indices of earlier tasks in this list.
Respond with a single JSON object and nothing else:
{"summary": "...", "tasks": [{"title": "...", "description": "...", "acceptance_criteria": "...", "priority": "high|medium|low", "depends_on": [0]}]}"#;

#[derive(Debug, Deserialize)]
struct ClarifyReply {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    is_ready_to_plan: bool,
    #[serde(default)]
    refined_goal: String,
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tasks: Vec<PlannedTask>,
}

fn known_context(input: &Input) -> String {
    input
        .context_str(&["context", "knowledge"])
        .unwrap_or("(none)")
        .to_string()
}

/// Turns a vague goal into clarifying questions, or declares it ready to plan.
#[derive(Clone)]
pub struct ClarifyingAgent {
    pub(crate) core: AgentCore,
}

impl ClarifyingAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "clarifying",
                "Asks the questions needed before a goal can be planned",
                CLARIFYING_PROMPT,
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let Some(goal) = input.context_str(GOAL_KEYS) else {
            return Ok(Output::empty(self.core.name()));
        };
        let context = known_context(input);
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("goal", goal),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<ClarifyReply>(prompt, input.max_tokens, cancel)
            .await?;
        let name = self.core.name();
        Ok(self
            .core
            .output_from(shot, |reply| vec![clarification_finding(goal, reply, name)]))
    }
}

fn clarification_finding(goal: &str, reply: ClarifyReply, agent: &str) -> Finding {
    let questions: Vec<String> = reply
        .questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    let refined = match reply.refined_goal.trim() {
        "" => goal.to_string(),
        refined => refined.to_string(),
    };
    let ready = reply.is_ready_to_plan || questions.is_empty();
    let title = if ready {
        format!("Ready to plan: {refined}")
    } else {
        format!("Clarification needed: {refined}")
    };
    let description = if questions.is_empty() {
        refined.clone()
    } else {
        questions
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut finding = Finding::new(FindingType::Refinement, title, description, agent)
        .with_confidence(if ready { Confidence::High } else { Confidence::Medium })
        .with_metadata(IS_READY_TO_PLAN, ready)
        .with_metadata("refined_goal", refined);
    metadata::set_questions(&mut finding.metadata, &questions);
    finding
}

/// Produces an ordered task list for a goal.
#[derive(Clone)]
pub struct PlanningAgent {
    pub(crate) core: AgentCore,
}

impl PlanningAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "planning",
                "Breaks a goal into ordered, dependent tasks",
                PLANNING_PROMPT,
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let Some(goal) = input.context_str(GOAL_KEYS) else {
            return Ok(Output::empty(self.core.name()));
        };
        let context = known_context(input);
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("goal", goal),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<PlanReply>(prompt, input.max_tokens, cancel)
            .await?;
        let name = self.core.name();
        Ok(self.core.output_from(shot, |reply| {
            plan_finding(goal, reply, name).into_iter().collect()
        }))
    }
}

fn plan_finding(goal: &str, reply: PlanReply, agent: &str) -> Option<Finding> {
    let tasks = sanitize_tasks(reply.tasks);
    if tasks.is_empty() {
        return None;
    }
    let summary = match reply.summary.trim() {
        "" => goal.to_string(),
        summary => summary.to_string(),
    };
    let description = tasks
        .iter()
        .enumerate()
        .map(|(idx, task)| format!("{}. {}", idx + 1, task.title))
        .collect::<Vec<_>>()
        .join("\n");
    let mut finding = Finding::new(FindingType::Plan, format!("Plan: {summary}"), description, agent);
    metadata::set_tasks(&mut finding.metadata, &tasks);
    Some(finding)
}

/// Drops untitled tasks and any dependency that does not point at an earlier task.
fn sanitize_tasks(tasks: Vec<PlannedTask>) -> Vec<PlannedTask> {
    let mut kept: Vec<PlannedTask> = Vec::new();
    let mut remap = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        task.title = task.title.trim().to_string();
        if task.title.is_empty() {
            remap.push(None);
            continue;
        }
        let position = kept.len();
        let mut deps: Vec<usize> = task
            .depends_on
            .iter()
            .filter_map(|dep| remap.get(*dep).copied().flatten())
            .filter(|dep| *dep < position)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        task.depends_on = deps;
        remap.push(Some(position));
        kept.push(task);
    }
    kept
}
