//! Runs a batch of agents concurrently over one input.
//!
//! `run_all` is total: every agent yields exactly one [`Output`], in the order the agents were
//! given, whether it succeeded, failed, panicked or ran past the batch deadline.

use crate::agent::{Agent, Input, Output};
use crate::finding::{Finding, FindingType};
use crate::stream::{StreamBus, StreamEvent, StreamEventType};
use crate::AgentError;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskwing_protocol::{ErrorCode, ErrorEnvelope, HasErrorCode};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    stream: Option<StreamBus>,
    timeout: Option<Duration>,
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamBus) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Per-agent deadline; an agent exceeding it yields a `BudgetExceeded` output.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn run_all(
        &self,
        agents: Vec<Agent>,
        input: &Input,
        cancel: &CancellationToken,
    ) -> Vec<Output> {
        let names: Vec<&'static str> = agents.iter().map(Agent::name).collect();
        let input = Arc::new(input.clone());
        let mut join = JoinSet::new();

        for (idx, agent) in agents.into_iter().enumerate() {
            let input = Arc::clone(&input);
            let cancel = cancel.child_token();
            let stream = self.stream.clone();
            let timeout = self.timeout;
            join.spawn(async move {
                let name = agent.name();
                emit(&stream, StreamEvent::new(StreamEventType::AgentStart, name, "started"));
                let started = Instant::now();
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, agent.run(&input, &cancel))
                        .await
                        .unwrap_or_else(|_| {
                            cancel.cancel();
                            Err(AgentError::BudgetExceeded(format!(
                                "agent {name} exceeded {} ms",
                                limit.as_millis()
                            )))
                        }),
                    None => agent.run(&input, &cancel).await,
                };
                let output = match result {
                    Ok(output) => output,
                    Err(err) => {
                        let mut failed = Output::failed(name, err.to_envelope());
                        failed.duration_ms = started.elapsed().as_millis() as u64;
                        failed
                    }
                };
                report(&stream, &output);
                (idx, output)
            });
        }

        let mut slots: Vec<Option<Output>> = vec![None; names.len()];
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((idx, output)) => slots[idx] = Some(output),
                Err(err) => warn!("agent task failed to join: {err}"),
            }
        }

        slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    let envelope =
                        ErrorEnvelope::new(ErrorCode::Internal, format!("agent {name} panicked"));
                    emit(
                        &self.stream,
                        StreamEvent::new(StreamEventType::AgentError, name, envelope.message.clone()),
                    );
                    Output::failed(name, envelope)
                })
            })
            .collect()
    }
}

fn emit(stream: &Option<StreamBus>, event: StreamEvent) {
    if let Some(stream) = stream {
        stream.emit(event);
    }
}

fn report(stream: &Option<StreamBus>, output: &Output) {
    match &output.error {
        Some(error) => {
            debug!("{} failed: {error}", output.agent_name);
            emit(
                stream,
                StreamEvent::new(StreamEventType::AgentError, &output.agent_name, error.message.clone())
                    .with_metadata("code", error.code.as_str()),
            );
        }
        None => emit(
            stream,
            StreamEvent::new(
                StreamEventType::AgentEnd,
                &output.agent_name,
                format!(
                    "{} finding(s) in {} ms",
                    output.findings.len(),
                    output.duration_ms
                ),
            )
            .with_metadata("findings", output.findings.len() as u64),
        ),
    }
}

/// Findings from every output, grouped by type; each group keeps output order.
#[must_use]
pub fn group_by_type(outputs: &[Output]) -> BTreeMap<FindingType, Vec<Finding>> {
    let mut groups: BTreeMap<FindingType, Vec<Finding>> = BTreeMap::new();
    for finding in outputs.iter().flat_map(|o| &o.findings) {
        groups
            .entry(finding.finding_type)
            .or_default()
            .push(finding.clone());
    }
    groups
}

#[must_use]
pub fn flatten(outputs: &[Output]) -> Vec<Finding> {
    outputs.iter().flat_map(|o| o.findings.clone()).collect()
}
