use super::analysis::{FindingsReply, FINDINGS_FORMAT};
use super::{AgentConfig, AgentCore, CodeAgent, Input, Output};
use crate::context::ContextGatherer;
use crate::finding::FindingType;
use crate::model::{ChatMessage, ChatRequest};
use crate::parse::parse_json_response;
use crate::process::ProcessRunner;
use crate::stream::NodeHooks;
use crate::tools::AgentTools;
use crate::{AgentError, Result};
use log::{debug, warn};
use std::time::{Duration, Instant};
use taskwing_protocol::HasErrorCode;
use tokio_util::sync::CancellationToken;

const REACT_PROMPT: &str = r#"You are a code analyst exploring the project "{{project}}" with tools.
Use read_file, grep_search, list_dir and exec_command to gather evidence before concluding.
When you are done, reply without tool calls and put your final answer in this format.

{{format}}"#;

/// Tool-calling exploration loop with a one-time fallback to [`CodeAgent`] when the model
/// cannot bind tools.
#[derive(Clone)]
pub struct ReactCodeAgent {
    pub(crate) core: AgentCore,
    fallback: CodeAgent,
    max_iterations: usize,
    command_timeout: Duration,
}

impl ReactCodeAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "react_code",
                "Explores the codebase with tools before reporting findings",
                REACT_PROMPT,
                config,
            ),
            fallback: CodeAgent::new(config),
            max_iterations: config.clamped_iterations(),
            command_timeout: config.command_timeout,
        }
    }

    #[must_use]
    pub const fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let name = self.core.name();
        let tools = AgentTools::new(&input.base_path).with_runner(
            ProcessRunner::new(&input.base_path).with_timeout(self.command_timeout),
        );
        let hooks = self.core.stream().cloned().map(|s| NodeHooks::new(s, name));

        let system = self.core.render(&[
            ("project", input.project_name.as_str()),
            ("format", FINDINGS_FORMAT),
        ]);
        let task = match input.scoped_files() {
            [] => "Analyze the architecture of this repository and report findings.".to_string(),
            changed => format!(
                "These files changed: {}. Analyze them and report findings.",
                changed.join(", ")
            ),
        };
        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(task)];

        let mut tokens = 0u64;
        let mut last_content = String::new();
        let mut final_answer = None;
        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let request = ChatRequest {
                messages: messages.clone(),
                tools: AgentTools::schemas(),
                max_tokens: input.max_tokens,
            };
            let response = match self.core.invoke(request, cancel).await {
                Ok(response) => response,
                Err(err) if iteration == 0 && err.is_tool_binding_unsupported() => {
                    warn!("{name}: {err}; falling back to single-shot analysis");
                    return self.run_fallback(input, cancel).await;
                }
                Err(err) => return Err(err),
            };
            tokens += response.usage.total_tokens;
            last_content = response.content.clone();

            if response.tool_calls.is_empty() {
                final_answer = Some(response.content);
                break;
            }

            debug!(
                "{name}: iteration {} requested {} tool call(s)",
                iteration + 1,
                response.tool_calls.len()
            );
            let calls = response.tool_calls.clone();
            messages.push(ChatMessage::assistant(response.content, response.tool_calls));
            for call in &calls {
                if let Some(hooks) = &hooks {
                    hooks.tool_start(&call.name, &call.arguments);
                }
                let started = Instant::now();
                let (ok, text) = match tools.execute(call, cancel).await {
                    Ok(text) => (true, text),
                    Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                    Err(err) => (false, format!("Error ({}): {err}", err.code())),
                };
                if let Some(hooks) = &hooks {
                    hooks.tool_end(&call.name, ok, text.len(), started.elapsed());
                }
                messages.push(ChatMessage::tool_result(call.id.clone(), text));
            }
        }

        let mut output = Output::empty(name);
        output.tokens_used = tokens;
        let Some(answer) = final_answer else {
            warn!(
                "{name}: no final answer after {} iterations",
                self.max_iterations
            );
            output.raw_response = last_content;
            return Ok(output);
        };

        output.raw_response = answer.clone();
        match parse_json_response::<FindingsReply>(&answer) {
            Ok(reply) => output.findings = reply.into_findings(name, FindingType::Pattern),
            Err(err) => {
                warn!("{name}: {err}");
                output.error = Some(err.to_envelope());
            }
        }
        Ok(output)
    }

    async fn run_fallback(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let context =
            ContextGatherer::new(&input.base_path).gather_code_context(input.scoped_files());
        let mut output = self.fallback.analyze(input, context, cancel).await?;
        output.agent_name = self.core.name().to_string();
        for finding in &mut output.findings {
            finding.source_agent = self.core.name().to_string();
        }
        Ok(output)
    }
}
