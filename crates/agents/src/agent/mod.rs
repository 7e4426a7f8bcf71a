//! Agent runtime: a value-typed [`AgentCore`] carrying the model glue, embedded in each
//! concrete agent, and the tagged [`Agent`] variant the registry hands out.

mod analysis;
mod duplicate;
mod planning;
mod react;
mod verification;

pub use analysis::{CodeAgent, DepsAgent, DocAgent, GitAgent};
pub use duplicate::{DuplicateAgent, DUPLICATE_THRESHOLD};
pub use planning::{ClarifyingAgent, PlanningAgent};
pub use react::ReactCodeAgent;
pub use verification::VerificationAgent;

use crate::finding::Finding;
use crate::model::{ChatMessage, ChatRequest, ChatResponse, SharedModel};
use crate::parse::parse_json_response;
use crate::stream::{NodeHooks, StreamBus, StreamEvent, StreamEventType};
use crate::{AgentError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use taskwing_protocol::{ErrorEnvelope, HasErrorCode};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REACT_ITERATIONS: usize = 10;
pub const MAX_REACT_ITERATIONS: usize = 20;
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Bootstrap,
    Watch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub base_path: PathBuf,
    pub project_name: String,
    pub mode: Mode,
    /// Repo-relative paths; only meaningful in watch mode.
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub verbose: bool,
    /// Values handed from one agent to the next (`findings`, `goal`, ...).
    #[serde(default)]
    pub existing_context: Map<String, Value>,
}

impl Input {
    pub fn bootstrap(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            project_name: project_name_of(&base_path),
            base_path,
            mode: Mode::Bootstrap,
            changed_files: Vec::new(),
            max_tokens: None,
            verbose: false,
            existing_context: Map::new(),
        }
    }

    pub fn watch(base_path: impl Into<PathBuf>, changed_files: Vec<String>) -> Self {
        Self {
            mode: Mode::Watch,
            changed_files,
            ..Self::bootstrap(base_path)
        }
    }

    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.existing_context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Changed files in watch mode, nothing in bootstrap mode.
    #[must_use]
    pub fn scoped_files(&self) -> &[String] {
        match self.mode {
            Mode::Watch => &self.changed_files,
            Mode::Bootstrap => &[],
        }
    }

    #[must_use]
    pub fn context_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.existing_context.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// Findings handed over under `existing_context["findings"]`; malformed entries are skipped.
    #[must_use]
    pub fn context_findings(&self) -> Vec<Finding> {
        let Some(Value::Array(items)) = self.existing_context.get("findings") else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value::<Finding>(item.clone()).ok())
            .collect()
    }
}

fn project_name_of(base: &Path) -> String {
    base.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub agent_name: String,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub raw_response: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
    /// Non-fatal failure (e.g. an unparseable reply); findings are empty when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl Output {
    pub fn empty(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            findings: Vec::new(),
            raw_response: String::new(),
            tokens_used: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn failed(agent_name: impl Into<String>, error: ErrorEnvelope) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(agent_name)
        }
    }

    #[must_use]
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone)]
pub struct AgentConfig {
    pub model: Option<SharedModel>,
    pub stream: Option<StreamBus>,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            stream: None,
            max_iterations: DEFAULT_REACT_ITERATIONS,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            command_timeout: crate::process::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field(
                "model",
                &self.model.as_ref().map(|model| model.model_name().to_string()),
            )
            .field("max_iterations", &self.max_iterations)
            .field("model_timeout", &self.model_timeout)
            .finish_non_exhaustive()
    }
}

impl AgentConfig {
    #[must_use]
    pub fn with_model(mut self, model: SharedModel) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamBus) -> Self {
        self.stream = Some(stream);
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Iteration bound actually applied by tool-calling agents.
    #[must_use]
    pub fn clamped_iterations(&self) -> usize {
        self.max_iterations.clamp(1, MAX_REACT_ITERATIONS)
    }
}

/// Shared model glue embedded in every agent.
#[derive(Clone)]
pub struct AgentCore {
    name: &'static str,
    description: &'static str,
    prompt: &'static str,
    model: Option<SharedModel>,
    stream: Option<StreamBus>,
    model_timeout: Duration,
}

pub(crate) struct SingleShot<T> {
    pub parsed: Result<T>,
    pub raw: String,
    pub tokens: u64,
}

impl AgentCore {
    pub fn new(
        name: &'static str,
        description: &'static str,
        prompt: &'static str,
        config: &AgentConfig,
    ) -> Self {
        Self {
            name,
            description,
            prompt,
            model: config.model.clone(),
            stream: config.stream.clone(),
            model_timeout: config.model_timeout,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }

    #[must_use]
    pub fn stream(&self) -> Option<&StreamBus> {
        self.stream.as_ref()
    }

    /// Substitutes `{{key}}` placeholders of the prompt template.
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = self.prompt.to_string();
        for (key, value) in vars {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        out
    }

    fn model(&self) -> Result<&SharedModel> {
        self.model.as_ref().ok_or_else(|| {
            AgentError::Model(crate::model::ModelError::Unavailable(format!(
                "agent {} has no model configured",
                self.name
            )))
        })
    }

    /// One model call under the configured deadline and the caller's cancellation.
    pub async fn invoke(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let model = self.model()?;
        let hooks = self
            .stream
            .clone()
            .map(|stream| NodeHooks::new(stream, self.name));
        let model_name = model.model_name().to_string();
        if let Some(hooks) = &hooks {
            hooks.model_start(&model_name, request.messages.len());
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(self.model_timeout, model.generate(request)) => match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(AgentError::Model(err)),
                Err(_) => Err(AgentError::BudgetExceeded(format!(
                    "model call exceeded {} s",
                    self.model_timeout.as_secs()
                ))),
            },
        };

        if let Some(hooks) = &hooks {
            match &result {
                Ok(response) => hooks.model_end(&model_name, response.usage, started.elapsed()),
                Err(err) => hooks.model_error(&model_name, &err.to_string()),
            }
        }
        result
    }

    /// Prompt → model → fenced-JSON decode. Model failures are errors; decode failures are
    /// carried in the result so the raw reply survives.
    pub(crate) async fn single_shot<T: DeserializeOwned>(
        &self,
        prompt: String,
        max_tokens: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<SingleShot<T>> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            tools: Vec::new(),
            max_tokens,
        };
        let response = self.invoke(request, cancel).await?;
        if let Some(stream) = &self.stream {
            stream.emit_simple(StreamEventType::LlmChunk, self.name, response.content.clone());
        }
        Ok(SingleShot {
            parsed: parse_json_response::<T>(&response.content),
            raw: response.content,
            tokens: response.usage.total_tokens,
        })
    }

    pub(crate) fn output_from<T>(
        &self,
        shot: SingleShot<T>,
        convert: impl FnOnce(T) -> Vec<Finding>,
    ) -> Output {
        let mut output = Output::empty(self.name);
        output.raw_response = shot.raw;
        output.tokens_used = shot.tokens;
        match shot.parsed {
            Ok(parsed) => output.findings = convert(parsed),
            Err(err) => {
                log::warn!("{}: {err}", self.name);
                output.error = Some(err.to_envelope());
            }
        }
        output
    }
}

/// Built-in agents as a closed set of variants.
#[derive(Clone)]
pub enum Agent {
    Doc(DocAgent),
    Code(CodeAgent),
    ReactCode(ReactCodeAgent),
    Git(GitAgent),
    Deps(DepsAgent),
    Clarifying(ClarifyingAgent),
    Planning(PlanningAgent),
    Duplicate(DuplicateAgent),
    Verification(VerificationAgent),
}

impl Agent {
    fn core(&self) -> &AgentCore {
        match self {
            Self::Doc(agent) => &agent.core,
            Self::Code(agent) => &agent.core,
            Self::ReactCode(agent) => &agent.core,
            Self::Git(agent) => &agent.core,
            Self::Deps(agent) => &agent.core,
            Self::Clarifying(agent) => &agent.core,
            Self::Planning(agent) => &agent.core,
            Self::Duplicate(agent) => &agent.core,
            Self::Verification(agent) => &agent.core,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.core().name()
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        self.core().description()
    }

    /// Runs the agent and stamps name and wall-clock duration on the output.
    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let started = Instant::now();
        let mut output = match self {
            Self::Doc(agent) => agent.run(input, cancel).await,
            Self::Code(agent) => agent.run(input, cancel).await,
            Self::ReactCode(agent) => agent.run(input, cancel).await,
            Self::Git(agent) => agent.run(input, cancel).await,
            Self::Deps(agent) => agent.run(input, cancel).await,
            Self::Clarifying(agent) => agent.run(input, cancel).await,
            Self::Planning(agent) => agent.run(input, cancel).await,
            Self::Duplicate(agent) => agent.run(input, cancel).await,
            Self::Verification(agent) => agent.run(input, cancel).await,
        }?;
        output.agent_name = self.name().to_string();
        output.duration_ms = started.elapsed().as_millis() as u64;

        if let Some(stream) = self.core().stream() {
            for finding in &output.findings {
                stream.emit(
                    StreamEvent::new(StreamEventType::Finding, self.name(), finding.title.clone())
                        .with_metadata("type", finding.finding_type.as_str())
                        .with_metadata("confidence", finding.confidence.as_str()),
                );
            }
        }
        Ok(output)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Agent").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[test]
    fn render_replaces_placeholders() {
        let core = AgentCore::new(
            "t",
            "test",
            "Project {{project}}: {{context}} ({{project}})",
            &AgentConfig::default(),
        );
        assert_eq!(
            core.render(&[("project", "demo"), ("context", "ctx")]),
            "Project demo: ctx (demo)"
        );
    }

    #[test]
    fn iterations_are_clamped() {
        assert_eq!(AgentConfig::default().clamped_iterations(), 10);
        assert_eq!(AgentConfig::default().with_max_iterations(50).clamped_iterations(), 20);
        assert_eq!(AgentConfig::default().with_max_iterations(0).clamped_iterations(), 1);
    }

    #[test]
    fn watch_input_scopes_changed_files() {
        let input = Input::watch("/repo/demo", vec!["a.go".to_string()]);
        assert_eq!(input.project_name, "demo");
        assert_eq!(input.scoped_files(), ["a.go".to_string()]);
        let bootstrap = Input::bootstrap("/repo/demo");
        assert!(bootstrap.scoped_files().is_empty());
    }

    #[tokio::test]
    async fn invoke_without_model_is_unavailable() {
        let core = AgentCore::new("t", "test", "", &AgentConfig::default());
        let err = core
            .invoke(ChatRequest::default(), &CancellationToken::new())
            .await
            .expect_err("no model");
        assert_eq!(err.code(), taskwing_protocol::ErrorCode::ModelUnavailable);
    }

    #[tokio::test]
    async fn invoke_honours_cancellation() {
        let config = AgentConfig::default().with_model(ScriptedModel::new("m").then_text("x").shared());
        let core = AgentCore::new("t", "test", "", &config);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = core
            .invoke(ChatRequest::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AgentError::Cancelled));
    }
}
