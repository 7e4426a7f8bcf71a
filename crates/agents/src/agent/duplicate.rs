use super::{AgentConfig, AgentCore, Input, Output};
use crate::finding::{Confidence, Finding, FindingType};
use crate::verifier::jaccard_similarity;
use crate::Result;
use log::debug;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Minimum title similarity for two findings to count as duplicates.
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

/// Groups near-identical findings handed over in `existing_context["findings"]`.
/// Runs without a model.
#[derive(Clone)]
pub struct DuplicateAgent {
    pub(crate) core: AgentCore,
}

impl DuplicateAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "duplicate",
                "Flags findings whose titles describe the same thing",
                "",
                config,
            ),
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        if cancel.is_cancelled() {
            return Err(crate::AgentError::Cancelled);
        }
        let findings = input.context_findings();
        let clusters = cluster_by_title(&findings, DUPLICATE_THRESHOLD);
        debug!(
            "duplicate: {} finding(s), {} cluster(s)",
            findings.len(),
            clusters.len()
        );

        let name = self.core.name();
        let out = clusters
            .iter()
            .map(|members| cluster_finding(&findings, members, name))
            .collect();
        Ok(Output::empty(name).with_findings(out))
    }
}

/// Index clusters of size ≥ 2, each in first-seen order, ordered by their first member.
#[must_use]
pub fn cluster_by_title(findings: &[Finding], threshold: f64) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..findings.len()).collect();
    for i in 0..findings.len() {
        for j in (i + 1)..findings.len() {
            if jaccard_similarity(&findings[i].title, &findings[j].title) >= threshold {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root = vec![usize::MAX; findings.len()];
    for idx in 0..findings.len() {
        let r = root(&mut parent, idx);
        if slot_of_root[r] == usize::MAX {
            slot_of_root[r] = clusters.len();
            clusters.push(Vec::new());
        }
        clusters[slot_of_root[r]].push(idx);
    }
    clusters.retain(|members| members.len() > 1);
    clusters
}

fn root(parent: &mut [usize], mut idx: usize) -> usize {
    while parent[idx] != idx {
        parent[idx] = parent[parent[idx]];
        idx = parent[idx];
    }
    idx
}

fn cluster_finding(findings: &[Finding], members: &[usize], agent: &str) -> Finding {
    let head = &findings[members[0]];
    let keys: Vec<Value> = members
        .iter()
        .map(|idx| Value::String(findings[*idx].canonical_key()))
        .collect();
    let description = members
        .iter()
        .map(|idx| {
            let f = &findings[*idx];
            format!("- {} ({})", f.title, f.source_agent)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = Finding::new(
        FindingType::Refinement,
        format!("Duplicate findings: {}", head.title),
        description,
        agent,
    )
    .with_confidence(Confidence::High)
    .with_metadata("duplicates", Value::Array(keys))
    .with_metadata("canonical_key", head.canonical_key());
    for idx in members {
        for file in &findings[*idx].source_files {
            out.push_source_file(file);
        }
    }
    out
}
