//! Bounded in-memory log of recent engine actions, persisted to `.taskwing/activity.json`.
//!
//! Writers never do I/O under the ring lock: `add_entry` hands a copy of the ring to a background
//! persister which coalesces bursts and rewrites the file atomically.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use taskwing_protocol::fsio::{read_json, state_dir, write_json_atomic};
use taskwing_protocol::redact::{redact_map, redact_text};
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_ACTIVITY_CAP: usize = 500;
pub const ACTIVITY_FILE_NAME: &str = "activity.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    FileChange,
    AgentStart,
    AgentRun,
    Finding,
    ToolCall,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    #[serde(default)]
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ActivityEntry {
    pub fn new(kind: ActivityType, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            kind,
            agent: None,
            category: None,
            path: None,
            message: message.into(),
            details: Map::new(),
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub total: usize,
    pub file_changes: usize,
    pub agent_runs: usize,
    pub findings: usize,
    pub errors: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

enum PersistMsg {
    Snapshot(Vec<ActivityEntry>),
    Flush(oneshot::Sender<()>),
}

struct ActivityInner {
    ring: Mutex<VecDeque<ActivityEntry>>,
    cap: usize,
    last_id: AtomicU64,
    persist: Option<mpsc::UnboundedSender<PersistMsg>>,
    path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ActivityLog {
    inner: Arc<ActivityInner>,
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("cap", &self.inner.cap)
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl ActivityLog {
    /// A ring with no backing file.
    #[must_use]
    pub fn in_memory(cap: usize) -> Self {
        Self::build(cap, VecDeque::new(), None, None)
    }

    /// Loads `.taskwing/activity.json` under `root` and starts the background persister.
    ///
    /// Must be called from within a tokio runtime. A corrupt file is logged and replaced.
    #[must_use]
    pub fn open(root: &Path, cap: usize) -> Self {
        let path = state_dir(root).join(ACTIVITY_FILE_NAME);
        let existing: Vec<ActivityEntry> = match read_json(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                warn!("discarding unreadable {}: {err}", path.display());
                Vec::new()
            }
        };
        let cap = cap.max(1);
        let skip = existing.len().saturating_sub(cap);
        let ring: VecDeque<ActivityEntry> = existing.into_iter().skip(skip).collect();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(path.clone(), rx));
        Self::build(cap, ring, Some(tx), Some(path))
    }

    fn build(
        cap: usize,
        ring: VecDeque<ActivityEntry>,
        persist: Option<mpsc::UnboundedSender<PersistMsg>>,
        path: Option<PathBuf>,
    ) -> Self {
        let last_id = ring.back().map_or(0, |entry| entry.id);
        Self {
            inner: Arc::new(ActivityInner {
                ring: Mutex::new(ring),
                cap: cap.max(1),
                last_id: AtomicU64::new(last_id),
                persist,
                path,
            }),
        }
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<ActivityEntry>> {
        match self.inner.ring.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.inner.cap
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Stamps id and timestamp, sanitizes, appends and schedules persistence.
    pub fn add_entry(&self, mut entry: ActivityEntry) -> ActivityEntry {
        entry.id = self.next_id();
        entry.timestamp = Utc::now();
        entry.message = redact_text(&entry.message);
        redact_map(&mut entry.details);

        let snapshot = {
            let mut ring = self.ring();
            ring.push_back(entry.clone());
            while ring.len() > self.inner.cap {
                ring.pop_front();
            }
            self.inner
                .persist
                .as_ref()
                .map(|_| ring.iter().cloned().collect::<Vec<_>>())
        };
        if let (Some(tx), Some(snapshot)) = (&self.inner.persist, snapshot) {
            let _ = tx.send(PersistMsg::Snapshot(snapshot));
        }
        entry
    }

    /// Monotonic nanosecond id; strictly increasing even when the clock stalls.
    fn next_id(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |nanos| nanos.max(0) as u64);
        let mut current = self.inner.last_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1);
            match self.inner.last_id.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Up to `n` entries, newest first.
    #[must_use]
    pub fn get_recent(&self, n: usize) -> Vec<ActivityEntry> {
        self.ring().iter().rev().take(n).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> ActivitySummary {
        let ring = self.ring();
        let mut summary = ActivitySummary {
            total: ring.len(),
            oldest: ring.front().map(|entry| entry.timestamp),
            newest: ring.back().map(|entry| entry.timestamp),
            ..ActivitySummary::default()
        };
        for entry in ring.iter() {
            match entry.kind {
                ActivityType::FileChange => summary.file_changes += 1,
                ActivityType::AgentRun => summary.agent_runs += 1,
                ActivityType::Finding => summary.findings += 1,
                ActivityType::Error => summary.errors += 1,
                ActivityType::AgentStart | ActivityType::ToolCall | ActivityType::Info => {}
            }
        }
        summary
    }

    /// Resolves once every snapshot queued before the call is on disk.
    pub async fn flush(&self) {
        let Some(tx) = &self.inner.persist else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(PersistMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn persist_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<PersistMsg>) {
    while let Some(msg) = rx.recv().await {
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut next = Some(msg);
        while let Some(msg) = next.take() {
            match msg {
                PersistMsg::Snapshot(snapshot) => latest = Some(snapshot),
                PersistMsg::Flush(done) => waiters.push(done),
            }
            next = rx.try_recv().ok();
        }

        if let Some(snapshot) = latest {
            let target = path.clone();
            let written =
                tokio::task::spawn_blocking(move || write_json_atomic(&target, &snapshot)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("failed to persist {}: {err}", path.display()),
                Err(err) => warn!("activity persister panicked: {err}"),
            }
        }
        for done in waiters {
            let _ = done.send(());
        }
    }
}
