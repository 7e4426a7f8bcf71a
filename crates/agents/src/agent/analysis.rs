use super::{AgentConfig, AgentCore, Input, Output};
use crate::context::ContextGatherer;
use crate::finding::{Confidence, Evidence, Finding, FindingType};
use crate::process::ProcessRunner;
use crate::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub(crate) const FINDINGS_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"findings": [{
  "type": "feature|decision|dependency|pattern|risk|todo|constraint",
  "title": "short summary",
  "description": "what and where",
  "why": "optional rationale",
  "tradeoffs": "optional",
  "confidence": "high|medium|low",
  "source_files": ["repo/relative/path"],
  "evidence": [{"file_path": "repo/relative/path", "start_line": 0, "end_line": 0,
                "snippet": "exact text copied from the file", "grep_pattern": "", "evidence_type": "code|doc|git"}],
  "metadata": {"component": "optional", "severity": "optional"}
}]}
Only cite text that appears verbatim in the context. Use start_line 0 when unsure of line numbers."#;

const DOC_PROMPT: &str = r#"You analyze the documentation of the project "{{project}}".
Extract the product features, architectural decisions and constraints the documents state.

{{format}}

Documentation:
{{context}}"#;

const CODE_PROMPT: &str = r#"You analyze source code of the project "{{project}}" ({{mode}} mode).
Identify architectural patterns, design decisions, risks and notable TODOs.
{{scope}}

{{format}}

Source:
{{context}}"#;

const GIT_PROMPT: &str = r#"You analyze the version-control history of the project "{{project}}".
Infer decisions and feature milestones from commit messages. Use evidence_type "git" with file_path ".git"
and a snippet copied from a commit line (a hash prefix is acceptable).

{{format}}

History:
{{context}}"#;

const DEPS_PROMPT: &str = r#"You analyze dependency and build manifests of the project "{{project}}".
Report key dependencies, why they are used, and risks (outdated, duplicated or heavy dependencies).
Use type "dependency" unless a risk is clearly stated.

{{format}}

Manifests:
{{context}}"#;

#[derive(Debug, Deserialize)]
pub(crate) struct FindingsReply {
    #[serde(default)]
    pub findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawConfidence {
    Score(f64),
    Label(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFinding {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, alias = "summary")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub tradeoffs: Option<String>,
    #[serde(default)]
    pub confidence: Option<RawConfidence>,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl FindingsReply {
    /// Converts model output into validated findings; invalid entries are dropped.
    pub(crate) fn into_findings(self, agent: &str, default_type: FindingType) -> Vec<Finding> {
        self.findings
            .into_iter()
            .filter_map(|raw| raw.into_finding(agent, default_type))
            .collect()
    }
}

impl RawFinding {
    fn into_finding(self, agent: &str, default_type: FindingType) -> Option<Finding> {
        if self.title.trim().is_empty() {
            return None;
        }
        let kind = self
            .kind
            .as_deref()
            .and_then(FindingType::parse)
            .unwrap_or(default_type);
        let mut finding = Finding::new(kind, self.title, self.description, agent);
        finding.why = self.why.filter(|s| !s.trim().is_empty());
        finding.tradeoffs = self.tradeoffs.filter(|s| !s.trim().is_empty());
        finding.metadata = self.metadata;
        match self.confidence {
            Some(RawConfidence::Score(score)) => finding.set_score(score),
            Some(RawConfidence::Label(label)) => {
                let confidence = Confidence::parse(&label).unwrap_or(Confidence::Medium);
                finding = finding.with_confidence(confidence);
            }
            None => {}
        }
        for path in &self.source_files {
            finding.push_source_file(path);
        }
        for evidence in self.evidence {
            let evidence = evidence.normalized();
            if evidence.is_git() {
                finding.evidence.push(evidence);
                continue;
            }
            if evidence.file_path.trim().is_empty()
                || taskwing_protocol::normalize_relative(&evidence.file_path).is_err()
            {
                continue;
            }
            finding.push_source_file(&evidence.file_path);
            finding.evidence.push(evidence);
        }
        finding.validate().ok()?;
        Some(finding)
    }
}

/// Root and `docs/` markdown.
#[derive(Clone)]
pub struct DocAgent {
    pub(crate) core: AgentCore,
}

impl DocAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "doc",
                "Extracts features, decisions and constraints from markdown documentation",
                DOC_PROMPT,
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let gatherer = ContextGatherer::new(&input.base_path);
        let context = match input.scoped_files() {
            [] => gatherer.gather_markdown(),
            changed => gatherer.gather_files(changed),
        };
        self.analyze(input, context, cancel).await
    }

    async fn analyze(
        &self,
        input: &Input,
        context: String,
        cancel: &CancellationToken,
    ) -> Result<Output> {
        if context.trim().is_empty() {
            return Ok(Output::empty(self.core.name()));
        }
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("format", FINDINGS_FORMAT),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<FindingsReply>(prompt, input.max_tokens, cancel)
            .await?;
        Ok(self.core.output_from(shot, |reply| {
            reply.into_findings(self.core.name(), FindingType::Feature)
        }))
    }
}

/// Deterministic code analysis over a prepared context string.
#[derive(Clone)]
pub struct CodeAgent {
    pub(crate) core: AgentCore,
}

impl CodeAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "code",
                "Identifies patterns, decisions and risks in source files",
                CODE_PROMPT,
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let context = ContextGatherer::new(&input.base_path).gather_code_context(input.scoped_files());
        self.analyze(input, context, cancel).await
    }

    pub(crate) async fn analyze(
        &self,
        input: &Input,
        context: String,
        cancel: &CancellationToken,
    ) -> Result<Output> {
        if context.trim().is_empty() {
            return Ok(Output::empty(self.core.name()));
        }
        let scope = match input.scoped_files() {
            [] => String::new(),
            changed => format!("Focus on the changed files: {}.", changed.join(", ")),
        };
        let mode = match input.mode {
            super::Mode::Bootstrap => "bootstrap",
            super::Mode::Watch => "watch",
        };
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("mode", mode),
            ("scope", scope.as_str()),
            ("format", FINDINGS_FORMAT),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<FindingsReply>(prompt, input.max_tokens, cancel)
            .await?;
        Ok(self.core.output_from(shot, |reply| {
            reply.into_findings(self.core.name(), FindingType::Pattern)
        }))
    }
}

/// Commit history.
#[derive(Clone)]
pub struct GitAgent {
    pub(crate) core: AgentCore,
    command_timeout: std::time::Duration,
}

impl GitAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "git",
                "Infers decisions and milestones from git history",
                GIT_PROMPT,
                config,
            ),
            command_timeout: config.command_timeout,
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let runner = ProcessRunner::new(&input.base_path).with_timeout(self.command_timeout);
        let context = ContextGatherer::new(&input.base_path)
            .git_summary(&runner, cancel)
            .await;
        if context.trim().is_empty() {
            return Ok(Output::empty(self.core.name()));
        }
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("format", FINDINGS_FORMAT),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<FindingsReply>(prompt, input.max_tokens, cancel)
            .await?;
        Ok(self.core.output_from(shot, |reply| {
            reply.into_findings(self.core.name(), FindingType::Decision)
        }))
    }
}

/// Dependency manifests.
#[derive(Clone)]
pub struct DepsAgent {
    pub(crate) core: AgentCore,
}

impl DepsAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "deps",
                "Summarizes dependencies and dependency risks from manifests",
                DEPS_PROMPT,
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let context = ContextGatherer::new(&input.base_path).gather_manifests();
        if context.trim().is_empty() {
            return Ok(Output::empty(self.core.name()));
        }
        let prompt = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("format", FINDINGS_FORMAT),
            ("context", context.as_str()),
        ]);
        let shot = self
            .core
            .single_shot::<FindingsReply>(prompt, input.max_tokens, cancel)
            .await?;
        Ok(self.core.output_from(shot, |reply| {
            reply.into_findings(self.core.name(), FindingType::Dependency)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::VerificationStatus;
    use crate::model::ScriptedModel;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use taskwing_protocol::ErrorCode;

    fn config_with(model: Arc<ScriptedModel>) -> AgentConfig {
        AgentConfig::default().with_model(model)
    }

    #[tokio::test]
    async fn doc_agent_turns_reply_into_findings() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("README.md"), "v1\n## Auth: JWT\n").expect("write");
        let model = Arc::new(ScriptedModel::new("scripted").then_text(
            r#"```json
{"findings":[{"type":"feature","title":"Auth: JWT","description":"JWT auth",
  "confidence":"medium","source_files":["README.md"],
  "evidence":[{"file_path":"README.md","snippet":"Auth: JWT"}]}]}
```"#,
        ));
        let agent = DocAgent::new(&config_with(model.clone()));
        let output = agent
            .run(&Input::watch(dir.path(), vec!["README.md".to_string()]), &CancellationToken::new())
            .await
            .expect("run");

        assert!(output.error.is_none());
        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.title, "Auth: JWT");
        assert_eq!(finding.finding_type, FindingType::Feature);
        assert_eq!(finding.source_files, vec!["README.md".to_string()]);
        assert_eq!(finding.source_agent, "doc");
        assert_eq!(finding.verification_status, VerificationStatus::Pending);
        assert_eq!(model.call_count(), 1);
        let prompt = &model.calls()[0].messages[0].content;
        assert!(prompt.contains("## Auth: JWT"));
    }

    #[tokio::test]
    async fn parse_failure_keeps_raw_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("README.md"), "# Demo").expect("write");
        let model = Arc::new(ScriptedModel::new("scripted").then_text("I could not decide."));
        let agent = DocAgent::new(&config_with(model));
        let output = agent
            .run(&Input::bootstrap(dir.path()), &CancellationToken::new())
            .await
            .expect("run");
        assert!(output.findings.is_empty());
        assert_eq!(output.raw_response, "I could not decide.");
        assert_eq!(
            output.error.as_ref().map(|e| e.code),
            Some(ErrorCode::ParseFailure)
        );
    }

    #[tokio::test]
    async fn empty_context_skips_the_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = Arc::new(ScriptedModel::new("scripted"));
        let config = config_with(model.clone());
        let cancel = CancellationToken::new();
        let input = Input::bootstrap(dir.path());

        let doc = DocAgent::new(&config).run(&input, &cancel).await.expect("doc");
        let deps = DepsAgent::new(&config).run(&input, &cancel).await.expect("deps");
        let code = CodeAgent::new(&config).run(&input, &cancel).await.expect("code");
        assert!(doc.findings.is_empty() && doc.error.is_none());
        assert!(deps.findings.is_empty() && deps.error.is_none());
        assert!(code.findings.is_empty() && code.error.is_none());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn code_agent_watch_prompt_names_changed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("pkg")).expect("mkdir");
        std::fs::write(dir.path().join("pkg/a.go"), "package pkg\n// TODO: retry\n").expect("write");
        let model = Arc::new(ScriptedModel::new("scripted").then_text(
            r#"{"findings":[{"type":"todo","title":"Retry missing","confidence":0.55,
               "evidence":[{"file_path":"pkg/a.go","start_line":2,"snippet":"// TODO: retry"},
                           {"file_path":"/etc/passwd","snippet":"root"}]}]}"#,
        ));
        let output = CodeAgent::new(&config_with(model.clone()))
            .run(
                &Input::watch(dir.path(), vec!["pkg/a.go".to_string()]),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        let finding = &output.findings[0];
        assert_eq!(finding.finding_type, FindingType::Todo);
        assert_eq!(finding.confidence, Confidence::Medium);
        assert_eq!(finding.evidence.len(), 1, "absolute evidence dropped");
        assert_eq!(finding.evidence[0].end_line, 2);
        assert_eq!(finding.source_files, vec!["pkg/a.go".to_string()]);
        let prompt = &model.calls()[0].messages[0].content;
        assert!(prompt.contains("Focus on the changed files: pkg/a.go."));
    }

    #[test]
    fn raw_findings_without_title_are_dropped() {
        let reply: FindingsReply = serde_json::from_str(
            r#"{"findings":[{"title":""},{"summary":"Uses tokio","type":"unknown"}]}"#,
        )
        .expect("decode");
        let findings = reply.into_findings("deps", FindingType::Dependency);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "Uses tokio");
        assert_eq!(findings[0].finding_type, FindingType::Dependency);
    }
}
