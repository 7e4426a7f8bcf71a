//! Wires watcher → hash tracker → classifier → debouncer → dispatcher into one running engine.

use crate::activity::{ActivityEntry, ActivityLog, ActivityType};
use crate::config::{Config, WatchConfig};
use crate::debug_log::{DebugLevel, DebugLogOptions, DebugLogger, DebugRecord};
use crate::dispatcher::{DispatchReport, Dispatcher, DispatcherOptions};
use crate::findings::{FileKnowledgeStore, FindingsHandler};
use crate::notifier::Notifier;
use crate::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskwing_agents::{SharedModel, StreamBus, StreamEvent, StreamEventType};
use taskwing_protocol::HasErrorCode;
use taskwing_watcher::{
    Category, ContentHashTracker, DebounceDelays, DebouncerSet, FileChangeEvent, FileWatcher,
    WatchStreams, WatcherConfig,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Debounces change events per category and hands each flushed batch to the dispatcher.
#[derive(Clone)]
pub struct ChangePipeline {
    debouncers: DebouncerSet,
    dispatcher: Dispatcher,
    activity: Option<ActivityLog>,
}

impl ChangePipeline {
    pub fn new(delays: DebounceDelays, dispatcher: Dispatcher, activity: Option<ActivityLog>) -> Self {
        let target = dispatcher.clone();
        let debouncers = DebouncerSet::new(
            delays,
            Arc::new(move |category: Category, batch: Vec<FileChangeEvent>| {
                debug!("flushing {} {category} event(s)", batch.len());
                target.dispatch(category, batch);
            }),
        );
        Self {
            debouncers,
            dispatcher,
            activity,
        }
    }

    /// Records the change and queues it; returns false when it was dropped.
    pub fn submit(&self, event: FileChangeEvent) -> bool {
        if let Some(activity) = &self.activity {
            activity.add_entry(
                ActivityEntry::new(
                    ActivityType::FileChange,
                    format!("{} {}", event.operation.as_str(), event.display_path()),
                )
                .with_category(event.category.as_str())
                .with_path(event.display_path()),
            );
        }
        self.debouncers.add(event)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.debouncers.pending_len()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Drops unflushed events and waits for batches already dispatched.
    pub async fn stop(&self) -> Vec<DispatchReport> {
        self.debouncers.stop();
        self.dispatcher.wait_idle().await
    }
}

/// A running watch loop over one project root.
pub struct WatchEngine {
    watcher: FileWatcher,
    pipeline: ChangePipeline,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEngine")
            .field("root", &self.watcher.root())
            .field("pending", &self.pipeline.pending_len())
            .finish_non_exhaustive()
    }
}

impl WatchEngine {
    /// Starts watching `root`. Must be called from within a tokio runtime.
    pub fn start(root: &Path, watch: &WatchConfig, options: DispatcherOptions) -> Result<Self> {
        let activity = options.activity.clone();
        let debug_log = options.debug_log.clone();
        let tracker = Arc::new(ContentHashTracker::new());
        let (watcher, streams) =
            FileWatcher::start(root, watch.classifier(), tracker, WatcherConfig::default())?;
        let dispatcher = Dispatcher::new(watcher.root().to_path_buf(), options);
        let pipeline = ChangePipeline::new(watch.delays(), dispatcher, activity.clone());
        let cancel = CancellationToken::new();

        debug_log.info(
            "watch",
            "start",
            format!(
                "watching {} ({} directories)",
                watcher.root().display(),
                watcher.watch_count()
            ),
        );
        info!("watching {}", watcher.root().display());

        let pump = tokio::spawn(pump_events(
            streams,
            pipeline.clone(),
            activity,
            cancel.clone(),
        ));
        Ok(Self {
            watcher,
            pipeline,
            cancel,
            pump: Some(pump),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.watcher.root()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        self.pipeline.dispatcher()
    }

    /// Stops the watcher, drops pending events and waits for running batches.
    pub async fn stop(mut self) -> Vec<DispatchReport> {
        self.cancel.cancel();
        self.watcher.stop();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        self.pipeline.stop().await
    }
}

async fn pump_events(
    mut streams: WatchStreams,
    pipeline: ChangePipeline,
    activity: Option<ActivityLog>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = streams.events.recv() => match event {
                Some(event) => {
                    pipeline.submit(event);
                }
                None => break,
            },
            Some(err) = streams.errors.recv() => {
                warn!("watcher error: {err}");
                if let Some(activity) = &activity {
                    activity.add_entry(
                        ActivityEntry::new(ActivityType::Error, err.to_string())
                            .with_detail("code", err.code().as_str()),
                    );
                }
            }
        }
    }
    debug!("watch pump stopped");
}

/// Takes the stream's queue and writes every event to the debug log until the bus closes.
///
/// Returns `None` when another consumer already owns the queue.
pub fn forward_stream(stream: &StreamBus, debug_log: DebugLogger) -> Option<JoinHandle<()>> {
    let mut rx = stream.take_receiver()?;
    Some(tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug_log.log(stream_record(event));
        }
        debug!("stream forwarder stopped");
    }))
}

fn stream_record(event: StreamEvent) -> DebugRecord {
    let level = match event.kind {
        StreamEventType::AgentError => DebugLevel::Warn,
        StreamEventType::AgentStart | StreamEventType::AgentEnd => DebugLevel::Info,
        _ => DebugLevel::Debug,
    };
    let mut record = DebugRecord::new(level, "stream", event.kind.as_str(), event.content);
    record.timestamp = event.timestamp;
    record.metadata = event.metadata;
    if !event.agent.is_empty() {
        record.agent = Some(event.agent);
    }
    record
}

/// Long-lived services shared by the watch engine and the tool server.
#[derive(Clone)]
pub struct EngineServices {
    pub root: PathBuf,
    pub config: Config,
    pub activity: ActivityLog,
    pub debug_log: DebugLogger,
    pub notifier: Arc<Notifier>,
    pub knowledge: Arc<FileKnowledgeStore>,
    pub stream: StreamBus,
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices")
            .field("root", &self.root)
            .field("activity", &self.activity)
            .field("debug_log", &self.debug_log)
            .finish_non_exhaustive()
    }
}

impl EngineServices {
    /// Opens the activity log, debug log and knowledge store under `root`, and starts draining
    /// the agent stream into the debug log.
    ///
    /// Must be called from within a tokio runtime. A debug log that cannot be created is fatal.
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        let debug_log = if config.debug.enabled {
            DebugLogger::open(
                root,
                DebugLogOptions {
                    stderr: config.debug.stderr,
                    retention: config.debug.retention,
                },
            )?
        } else {
            DebugLogger::disabled()
        };
        let activity = ActivityLog::open(root, config.activity.cap);
        let notifier = Arc::new(Notifier::new(
            config.notifier_timeout(),
            config.notifier.replay_capacity,
        ));
        let knowledge =
            Arc::new(FileKnowledgeStore::for_root(root).with_notifier(Arc::clone(&notifier)));
        let stream = StreamBus::new(config.stream.capacity);
        forward_stream(&stream, debug_log.clone());
        debug_log.info("engine", "open", format!("state under {}", root.display()));

        Ok(Self {
            root: root.to_path_buf(),
            config,
            activity,
            debug_log,
            notifier,
            knowledge,
            stream,
        })
    }

    /// Dispatcher wiring for this root: the knowledge store as handler, shared logs and stream.
    #[must_use]
    pub fn dispatcher_options(&self, model: Option<SharedModel>) -> DispatcherOptions {
        DispatcherOptions {
            agent_config: self
                .config
                .agent_config(model, Some(self.stream.clone())),
            project_name: self.config.project.name.clone(),
            output_limit: self.config.agents.output_limit,
            handler: Some(Arc::clone(&self.knowledge) as Arc<dyn FindingsHandler>),
            activity: Some(self.activity.clone()),
            stream: Some(self.stream.clone()),
            debug_log: self.debug_log.clone(),
            timeout: None,
        }
    }

    pub fn start_watch(&self, model: Option<SharedModel>) -> Result<WatchEngine> {
        WatchEngine::start(
            &self.root,
            &self.config.watch,
            self.dispatcher_options(model),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use taskwing_agents::{AgentConfig, ScriptedModel};
    use taskwing_watcher::Operation;

    #[tokio::test]
    async fn submit_records_file_changes() {
        let repo = tempfile::tempdir().expect("tempdir");
        let activity = ActivityLog::in_memory(10);
        let dispatcher = Dispatcher::new(repo.path(), DispatcherOptions::default());
        let pipeline =
            ChangePipeline::new(DebounceDelays::default(), dispatcher, Some(activity.clone()));

        assert!(pipeline.submit(FileChangeEvent::new(
            "app.yaml",
            Operation::Modify,
            Category::Config
        )));
        assert_eq!(pipeline.pending_len(), 1);
        assert_eq!(activity.summary().file_changes, 1);

        assert!(pipeline.stop().await.is_empty());
        assert_eq!(pipeline.pending_len(), 0);
        assert!(!pipeline.submit(FileChangeEvent::new(
            "main.go",
            Operation::Modify,
            Category::Code
        )));
    }

    #[tokio::test]
    async fn flushed_batch_reaches_the_agent() {
        let repo = tempfile::tempdir().expect("tempdir");
        std::fs::write(repo.path().join("main.go"), "package main\n").expect("write");
        let model = Arc::new(ScriptedModel::new("scripted").then_text(r#"{"findings":[]}"#));
        let dispatcher = Dispatcher::new(
            repo.path(),
            DispatcherOptions {
                agent_config: AgentConfig::default().with_model(model.clone()),
                ..DispatcherOptions::default()
            },
        );
        let delays = DebounceDelays {
            deps: Duration::from_millis(20),
            docs: Duration::from_millis(20),
            other: Duration::from_millis(20),
        };
        let pipeline = ChangePipeline::new(delays, dispatcher, None);
        pipeline.submit(FileChangeEvent::new("main.go", Operation::Modify, Category::Code));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let reports = pipeline.dispatcher().wait_idle().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].changed_files, vec!["main.go"]);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn agent_stream_events_reach_the_debug_log() {
        let repo = tempfile::tempdir().expect("tempdir");
        std::fs::write(repo.path().join("README.md"), "# Demo\n").expect("write");
        let mut config = Config::default();
        config.debug.enabled = true;
        let services = EngineServices::open(repo.path(), config).expect("open");
        assert!(services.stream.take_receiver().is_none());

        let model = Arc::new(ScriptedModel::new("scripted").then_text(r#"{"findings":[]}"#));
        let dispatcher = Dispatcher::new(
            repo.path(),
            services.dispatcher_options(Some(model as SharedModel)),
        );
        assert!(dispatcher.dispatch(
            Category::Docs,
            vec![FileChangeEvent::new("README.md", Operation::Modify, Category::Docs)],
        ));
        assert_eq!(dispatcher.wait_idle().await.len(), 1);

        let path = services.debug_log.path().expect("log path").to_path_buf();
        let mut records = Vec::new();
        for _ in 0..40 {
            records = std::fs::read_to_string(&path)
                .expect("read log")
                .lines()
                .filter_map(|line| serde_json::from_str::<DebugRecord>(line).ok())
                .filter(|record| record.component == "stream")
                .collect();
            if records.iter().any(|record| record.event == "agent_end") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let events: Vec<&str> = records.iter().map(|record| record.event.as_str()).collect();
        assert!(events.contains(&"agent_start"), "{events:?}");
        assert!(events.contains(&"agent_end"), "{events:?}");
        assert!(records
            .iter()
            .any(|record| record.agent.as_deref() == Some("doc")));
    }

    #[tokio::test]
    async fn second_forwarder_is_refused() {
        let bus = StreamBus::new(4);
        let first = forward_stream(&bus, DebugLogger::disabled()).expect("first consumer");
        assert!(forward_stream(&bus, DebugLogger::disabled()).is_none());
        bus.close();
        first.await.expect("forwarder ends when the bus closes");
    }

    #[tokio::test]
    async fn services_open_state_under_root() {
        let repo = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.debug.enabled = true;
        let services = EngineServices::open(repo.path(), config).expect("open");
        assert!(services.debug_log.is_enabled());
        assert!(services
            .knowledge
            .path()
            .starts_with(repo.path().join(".taskwing")));
        let options = services.dispatcher_options(None);
        assert!(options.handler.is_some());
        assert_eq!(options.agent_config.max_iterations, 10);
    }
}
