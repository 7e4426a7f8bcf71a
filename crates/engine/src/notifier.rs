//! Fan-out of knowledge-store changes to live subscribers.
//!
//! Every notification goes to each subscriber on its own task under a per-subscriber deadline.
//! A slow or failing subscriber never delays another one or the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use taskwing_agents::Finding;
use tokio::task::JoinHandle;

pub const DEFAULT_SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REPLAY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub source: String,
    pub added: usize,
    pub updated: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Added { finding: Finding },
    Updated { finding: Finding },
    Removed { key: String },
    BatchComplete { summary: BatchSummary },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub notification: Notification,
}

#[async_trait]
pub trait FindingSubscriber: Send + Sync {
    fn name(&self) -> &str {
        "subscriber"
    }

    async fn on_finding_added(&self, finding: &Finding) -> anyhow::Result<()>;

    async fn on_finding_updated(&self, finding: &Finding) -> anyhow::Result<()>;

    async fn on_finding_removed(&self, key: &str) -> anyhow::Result<()>;

    async fn on_batch_complete(&self, summary: &BatchSummary) -> anyhow::Result<()>;
}

async fn deliver(subscriber: &dyn FindingSubscriber, notification: &Notification) -> anyhow::Result<()> {
    match notification {
        Notification::Added { finding } => subscriber.on_finding_added(finding).await,
        Notification::Updated { finding } => subscriber.on_finding_updated(finding).await,
        Notification::Removed { key } => subscriber.on_finding_removed(key).await,
        Notification::BatchComplete { summary } => subscriber.on_batch_complete(summary).await,
    }
}

/// Handles of one fan-out. Dropping it detaches the deliveries.
#[must_use = "drop to detach, or call wait()"]
pub struct FanOut {
    handles: Vec<JoinHandle<()>>,
}

impl FanOut {
    /// Waits for every delivery to finish or time out.
    pub async fn wait(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

pub struct Notifier {
    subscribers: RwLock<Vec<Arc<dyn FindingSubscriber>>>,
    replay: Mutex<VecDeque<NotificationRecord>>,
    replay_capacity: usize,
    timeout: Duration,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_TIMEOUT, DEFAULT_REPLAY_CAPACITY)
    }
}

impl Notifier {
    pub fn new(timeout: Duration, replay_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            replay: Mutex::new(VecDeque::new()),
            replay_capacity: replay_capacity.max(1),
            timeout,
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn FindingSubscriber>) {
        match self.subscribers.write() {
            Ok(mut guard) => guard.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Records `notification` for replay and spawns one bounded delivery per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, notification: Notification) -> FanOut {
        self.remember(&notification);
        let subscribers = match self.subscribers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let notification = Arc::new(notification);
        let handles = subscribers
            .into_iter()
            .map(|subscriber| {
                let notification = Arc::clone(&notification);
                let timeout = self.timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, deliver(subscriber.as_ref(), &notification))
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!("subscriber {} failed: {err:#}", subscriber.name()),
                        Err(_) => warn!(
                            "subscriber {} timed out after {} ms",
                            subscriber.name(),
                            timeout.as_millis()
                        ),
                    }
                })
            })
            .collect();
        FanOut { handles }
    }

    pub fn finding_added(&self, finding: &Finding) -> FanOut {
        self.notify(Notification::Added {
            finding: finding.clone(),
        })
    }

    pub fn finding_updated(&self, finding: &Finding) -> FanOut {
        self.notify(Notification::Updated {
            finding: finding.clone(),
        })
    }

    pub fn finding_removed(&self, key: impl Into<String>) -> FanOut {
        self.notify(Notification::Removed { key: key.into() })
    }

    pub fn batch_complete(&self, summary: BatchSummary) -> FanOut {
        self.notify(Notification::BatchComplete { summary })
    }

    fn remember(&self, notification: &Notification) {
        let mut replay = match self.replay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        replay.push_back(NotificationRecord {
            timestamp: Utc::now(),
            notification: notification.clone(),
        });
        while replay.len() > self.replay_capacity {
            replay.pop_front();
        }
    }

    /// Retained notifications, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<NotificationRecord> {
        match self.replay.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Delivers the retained history to a late subscriber, in order, under the same deadline.
    pub async fn replay_to(&self, subscriber: &dyn FindingSubscriber) -> usize {
        let records = self.recent();
        let mut delivered = 0;
        for record in &records {
            match tokio::time::timeout(self.timeout, deliver(subscriber, &record.notification)).await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => debug!("replay to {} failed: {err:#}", subscriber.name()),
                Err(_) => {
                    warn!("replay to {} timed out", subscriber.name());
                    break;
                }
            }
        }
        delivered
    }
}

/// Subscriber that records what it sees; used by tests and the tool server's status view.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    seen: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        match self.seen.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, line: String) {
        match self.seen.lock() {
            Ok(mut guard) => guard.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

#[async_trait]
impl FindingSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_finding_added(&self, finding: &Finding) -> anyhow::Result<()> {
        self.push(format!("added:{}", finding.title));
        Ok(())
    }

    async fn on_finding_updated(&self, finding: &Finding) -> anyhow::Result<()> {
        self.push(format!("updated:{}", finding.title));
        Ok(())
    }

    async fn on_finding_removed(&self, key: &str) -> anyhow::Result<()> {
        self.push(format!("removed:{key}"));
        Ok(())
    }

    async fn on_batch_complete(&self, summary: &BatchSummary) -> anyhow::Result<()> {
        self.push(format!("batch:{}+{}", summary.added, summary.updated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_agents::FindingType;

    struct Stuck;

    #[async_trait]
    impl FindingSubscriber for Stuck {
        async fn on_finding_added(&self, _finding: &Finding) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn on_finding_updated(&self, _finding: &Finding) -> anyhow::Result<()> {
            anyhow::bail!("updates unsupported")
        }

        async fn on_finding_removed(&self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn on_batch_complete(&self, _summary: &BatchSummary) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn finding(title: &str) -> Finding {
        Finding::new(FindingType::Feature, title, "", "doc")
    }

    #[tokio::test]
    async fn stuck_subscriber_does_not_block_others() {
        let notifier = Notifier::new(Duration::from_millis(50), 10);
        let recorder = Arc::new(RecordingSubscriber::default());
        notifier.subscribe(Arc::new(Stuck));
        notifier.subscribe(recorder.clone());

        let started = std::time::Instant::now();
        notifier.finding_added(&finding("Sync")).wait().await;
        notifier.finding_updated(&finding("Sync")).wait().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(recorder.seen(), vec!["added:Sync", "updated:Sync"]);
    }

    #[tokio::test]
    async fn replay_ring_is_bounded() {
        let notifier = Notifier::new(Duration::from_secs(1), 2);
        for title in ["a", "b", "c"] {
            notifier.finding_added(&finding(title)).wait().await;
        }
        notifier.finding_removed("c|doc").wait().await;

        let late = RecordingSubscriber::default();
        assert_eq!(notifier.replay_to(&late).await, 2);
        assert_eq!(late.seen(), vec!["added:c", "removed:c|doc"]);
    }

    #[test]
    fn records_serialize_flat() {
        let record = NotificationRecord {
            timestamp: Utc::now(),
            notification: Notification::Removed {
                key: "x|doc".to_string(),
            },
        };
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["kind"], "removed");
        assert_eq!(json["key"], "x|doc");
    }
}
