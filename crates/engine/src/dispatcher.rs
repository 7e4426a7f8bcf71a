//! Routes a debounced batch to its agent and hands the verified findings on.

use crate::activity::{ActivityEntry, ActivityLog, ActivityType};
use crate::debug_log::DebugLogger;
use crate::findings::{FindingsHandler, HandleSummary};
use log::{debug, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskwing_agents::{registry, AgentConfig, Input, Orchestrator, StreamBus, Verifier};
use taskwing_protocol::{ErrorEnvelope, HasErrorCode};
use taskwing_watcher::{Category, FileChangeEvent, Operation};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMPONENT: &str = "dispatcher";

/// Registry id of the agent that analyzes a category, if any.
#[must_use]
pub const fn agent_id_for(category: Category) -> Option<&'static str> {
    match category {
        Category::Code => Some("code"),
        Category::Docs => Some("doc"),
        Category::Deps => Some("deps"),
        Category::Config | Category::Git | Category::Ignore => None,
    }
}

/// Outcome of one dispatched batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub category: Category,
    pub agent: String,
    pub changed_files: Vec<String>,
    pub findings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<HandleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

#[derive(Clone, Default)]
pub struct DispatcherOptions {
    pub agent_config: AgentConfig,
    pub project_name: Option<String>,
    pub output_limit: Option<u32>,
    pub handler: Option<Arc<dyn FindingsHandler>>,
    pub activity: Option<ActivityLog>,
    pub stream: Option<StreamBus>,
    pub debug_log: DebugLogger,
    /// Per-run deadline; unset means the agent's own model timeout applies.
    pub timeout: Option<Duration>,
}

struct DispatcherInner {
    root: PathBuf,
    options: DispatcherOptions,
    cancel: CancellationToken,
    in_flight: Mutex<Vec<JoinHandle<Option<DispatchReport>>>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("root", &self.inner.root)
            .field("has_handler", &self.inner.options.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(root: impl Into<PathBuf>, options: DispatcherOptions) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                root: root.into(),
                options,
                cancel: CancellationToken::new(),
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Starts the category's agent in the background; returns false when nothing handles it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, category: Category, events: Vec<FileChangeEvent>) -> bool {
        if agent_id_for(category).is_none() || self.inner.cancel.is_cancelled() {
            debug!("no agent for {} batch of {}", category, events.len());
            return false;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_batch(category, events).await });
        let mut guard = match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|handle| !handle.is_finished());
        guard.push(handle);
        true
    }

    /// Runs one batch to completion. `None` when the category has no agent or the batch
    /// carries nothing to analyze.
    pub async fn run_batch(
        &self,
        category: Category,
        events: Vec<FileChangeEvent>,
    ) -> Option<DispatchReport> {
        let agent_id = agent_id_for(category)?;
        let changed_files = changed_paths(&events);
        if changed_files.is_empty() {
            debug!("{category} batch only removed files; skipping {agent_id}");
            return None;
        }
        let options = &self.inner.options;

        let agent = match registry::create(agent_id, &options.agent_config) {
            Ok(agent) => agent,
            Err(err) => {
                warn!("cannot create agent {agent_id}: {err}");
                self.record_error(agent_id, category, &err.to_envelope());
                return Some(DispatchReport {
                    category,
                    agent: agent_id.to_string(),
                    changed_files,
                    findings: 0,
                    stored: None,
                    error: Some(err.to_envelope()),
                });
            }
        };

        let mut input = Input::watch(&self.inner.root, changed_files.clone())
            .with_max_tokens(options.output_limit);
        if let Some(name) = &options.project_name {
            input = input.with_project_name(name.clone());
        }

        self.record(
            ActivityEntry::new(
                ActivityType::AgentStart,
                format!("{agent_id} started on {} file(s)", changed_files.len()),
            )
            .with_agent(agent_id)
            .with_category(category.as_str())
            .with_detail("files", changed_files.clone()),
        );
        let phase = options.debug_log.start_phase(COMPONENT, agent_id);

        let mut orchestrator = Orchestrator::new();
        if let Some(stream) = &options.stream {
            orchestrator = orchestrator.with_stream(stream.clone());
        }
        if let Some(timeout) = options.timeout {
            orchestrator = orchestrator.with_timeout(timeout);
        }
        let cancel = self.inner.cancel.child_token();
        let mut outputs = orchestrator.run_all(vec![agent], &input, &cancel).await;
        let Some(output) = outputs.pop() else {
            phase.end();
            return None;
        };

        if let Some(error) = output.error {
            phase.fail(&error);
            self.record_error(agent_id, category, &error);
            return Some(DispatchReport {
                category,
                agent: agent_id.to_string(),
                changed_files,
                findings: 0,
                stored: None,
                error: Some(error),
            });
        }

        let findings = Verifier::new(&self.inner.root)
            .verify_findings(output.findings, &cancel)
            .await;
        phase.end();
        self.record(
            ActivityEntry::new(
                ActivityType::AgentRun,
                format!("{agent_id} produced {} finding(s)", findings.len()),
            )
            .with_agent(agent_id)
            .with_category(category.as_str())
            .with_detail("duration_ms", output.duration_ms)
            .with_detail("tokens", output.tokens_used),
        );
        for finding in &findings {
            self.record(
                ActivityEntry::new(ActivityType::Finding, finding.title.clone())
                    .with_agent(agent_id)
                    .with_category(category.as_str())
                    .with_detail("type", finding.finding_type.as_str())
                    .with_detail("verification", finding.verification_status.as_str())
                    .with_detail("confidence", finding.confidence_score),
            );
        }

        let count = findings.len();
        let stored = match &options.handler {
            Some(_) if findings.is_empty() => None,
            Some(handler) => match handler.handle(agent_id, findings).await {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!("findings handler failed for {agent_id}: {err}");
                    let envelope = err.to_envelope();
                    self.record_error(agent_id, category, &envelope);
                    return Some(DispatchReport {
                        category,
                        agent: agent_id.to_string(),
                        changed_files,
                        findings: count,
                        stored: None,
                        error: Some(envelope),
                    });
                }
            },
            None => {
                if count > 0 {
                    warn!("no findings handler configured; {count} finding(s) from {agent_id} not persisted");
                    for finding in &findings {
                        warn!("  [{}] {}", finding.finding_type.as_str(), finding.title);
                    }
                }
                None
            }
        };

        Some(DispatchReport {
            category,
            agent: agent_id.to_string(),
            changed_files,
            findings: count,
            stored,
            error: None,
        })
    }

    /// Waits for every batch dispatched so far and returns their reports.
    pub async fn wait_idle(&self) -> Vec<DispatchReport> {
        let handles: Vec<_> = {
            let mut guard = match self.inner.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.drain(..).collect()
        };
        let mut reports = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => warn!("dispatch task failed: {err}"),
            }
        }
        reports
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        match self.inner.in_flight.lock() {
            Ok(guard) => guard.iter().filter(|handle| !handle.is_finished()).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .filter(|handle| !handle.is_finished())
                .count(),
        }
    }

    /// Cancels running batches and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    fn record(&self, entry: ActivityEntry) {
        if let Some(activity) = &self.inner.options.activity {
            activity.add_entry(entry);
        }
    }

    fn record_error(&self, agent_id: &str, category: Category, error: &ErrorEnvelope) {
        self.inner
            .options
            .debug_log
            .error(COMPONENT, "agent_error", format!("{agent_id}: {error}"));
        self.record(
            ActivityEntry::new(ActivityType::Error, error.message.clone())
                .with_agent(agent_id)
                .with_category(category.as_str())
                .with_detail("code", error.code.as_str()),
        );
    }
}

/// Changed paths in arrival order, deduplicated; deletions carry nothing to read.
fn changed_paths(events: &[FileChangeEvent]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        if event.operation == Operation::Delete {
            continue;
        }
        let path = event.display_path();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}
