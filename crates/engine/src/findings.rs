//! Where verified findings go: the [`FindingsHandler`] seam and its file-backed implementation.

use crate::notifier::{BatchSummary, Notifier};
use crate::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskwing_agents::{Evidence, Finding};
use taskwing_protocol::fsio::{read_json, state_dir, write_json_atomic};
use tokio::sync::Mutex;

pub const KNOWLEDGE_DIR_NAME: &str = "knowledge";
pub const FINDINGS_FILE_NAME: &str = "findings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSummary {
    pub added: usize,
    pub updated: usize,
}

/// Receives the verified findings of one agent run.
#[async_trait]
pub trait FindingsHandler: Send + Sync {
    async fn handle(&self, source: &str, findings: Vec<Finding>) -> Result<HandleSummary>;
}

/// Findings keyed by [`Finding::canonical_key`] in `.taskwing/knowledge/findings.json`.
pub struct FileKnowledgeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    notifier: Option<Arc<Notifier>>,
}

impl std::fmt::Debug for FileKnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKnowledgeStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileKnowledgeStore {
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: state_dir(root)
                .join(KNOWLEDGE_DIR_NAME)
                .join(FINDINGS_FILE_NAME),
            write_lock: Mutex::new(()),
            notifier: None,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<Finding>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Adds new findings and merges those whose canonical key is already stored.
    pub async fn upsert(&self, findings: Vec<Finding>) -> Result<(Vec<Finding>, Vec<Finding>)> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.list()?;
        let mut index: HashMap<String, usize> = stored
            .iter()
            .enumerate()
            .map(|(idx, finding)| (finding.canonical_key(), idx))
            .collect();

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for finding in findings {
            let key = finding.canonical_key();
            match index.get(&key) {
                Some(&idx) => {
                    merge_into(&mut stored[idx], finding);
                    updated.push(stored[idx].clone());
                }
                None => {
                    index.insert(key, stored.len());
                    stored.push(finding.clone());
                    added.push(finding);
                }
            }
        }
        write_json_atomic(&self.path, &stored)?;
        Ok((added, updated))
    }

    /// Removes one finding by canonical key.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.list()?;
        let before = stored.len();
        stored.retain(|finding| finding.canonical_key() != key);
        if stored.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.path, &stored)?;
        if let Some(notifier) = &self.notifier {
            notifier.finding_removed(key).wait().await;
        }
        Ok(true)
    }

    /// Drops every stored finding; returns how many were removed.
    pub async fn purge(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let stored = self.list()?;
        write_json_atomic(&self.path, &Vec::<Finding>::new())?;
        if let Some(notifier) = &self.notifier {
            for finding in &stored {
                notifier.finding_removed(finding.canonical_key()).wait().await;
            }
        }
        Ok(stored.len())
    }
}

#[async_trait]
impl FindingsHandler for FileKnowledgeStore {
    async fn handle(&self, source: &str, findings: Vec<Finding>) -> Result<HandleSummary> {
        let (added, updated) = self.upsert(findings).await?;
        debug!(
            "knowledge store: {} added, {} updated from {source}",
            added.len(),
            updated.len()
        );
        if let Some(notifier) = &self.notifier {
            for finding in &added {
                notifier.finding_added(finding).wait().await;
            }
            for finding in &updated {
                notifier.finding_updated(finding).wait().await;
            }
            let total = self.list().map(|all| all.len()).unwrap_or_default();
            notifier
                .batch_complete(BatchSummary {
                    source: source.to_string(),
                    added: added.len(),
                    updated: updated.len(),
                    total,
                })
                .wait()
                .await;
        }
        Ok(HandleSummary {
            added: added.len(),
            updated: updated.len(),
        })
    }
}

/// Folds a re-discovered finding into the stored record.
///
/// Evidence and source files are unioned. The stronger verification wins, and with it the
/// confidence; on a tie the incoming run is preferred since it saw the newer tree.
pub fn merge_into(stored: &mut Finding, incoming: Finding) {
    for file in &incoming.source_files {
        stored.push_source_file(file);
    }
    for evidence in incoming.evidence {
        if !stored.evidence.iter().any(|known| same_evidence(known, &evidence)) {
            stored.evidence.push(evidence);
        }
    }
    if !incoming.description.trim().is_empty() {
        stored.description = incoming.description;
    }
    if incoming.why.is_some() {
        stored.why = incoming.why;
    }
    if incoming.tradeoffs.is_some() {
        stored.tradeoffs = incoming.tradeoffs;
    }
    for (key, value) in incoming.metadata {
        stored.metadata.insert(key, value);
    }
    if incoming.verification_status.strength() >= stored.verification_status.strength() {
        stored.verification_status = incoming.verification_status;
        stored.verification_result = incoming.verification_result;
        stored.confidence = incoming.confidence;
        stored.confidence_score = incoming.confidence_score;
    }
}

fn same_evidence(a: &Evidence, b: &Evidence) -> bool {
    a.file_path == b.file_path
        && a.start_line == b.start_line
        && a.end_line == b.end_line
        && a.snippet.trim() == b.snippet.trim()
}
