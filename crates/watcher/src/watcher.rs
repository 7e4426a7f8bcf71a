use crate::{
    Category, Classifier, ContentHashTracker, FileChangeEvent, Operation, Result, WatcherError,
};
use ignore::WalkBuilder;
use log::{debug, warn};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub notify_poll_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            notify_poll_interval: Duration::from_secs(2),
            channel_capacity: 1024,
        }
    }
}

/// Outbound side of a running watcher. Both channels close when the watcher stops.
pub struct WatchStreams {
    pub events: mpsc::Receiver<FileChangeEvent>,
    pub errors: mpsc::Receiver<WatcherError>,
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;
type WatchState = Arc<Mutex<HashSet<PathBuf>>>;

/// Recursive filesystem event source rooted at a project directory.
#[derive(Clone)]
pub struct FileWatcher {
    inner: Arc<FileWatcherInner>,
}

struct FileWatcherInner {
    root: PathBuf,
    watcher: SharedWatcher,
    watch_state: WatchState,
}

impl FileWatcher {
    /// Registers every watchable directory under `root` and starts translating events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        root: impl AsRef<Path>,
        classifier: Classifier,
        tracker: Arc<ContentHashTracker>,
        config: WatcherConfig,
    ) -> Result<(Self, WatchStreams)> {
        let root = root.as_ref().canonicalize().map_err(|err| {
            WatcherError::InvalidPath(format!("{}: {err}", root.as_ref().display()))
        })?;
        if !root.is_dir() {
            return Err(WatcherError::InvalidPath(root.display().to_string()));
        }

        let capacity = config.channel_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(64);

        let classifier = Arc::new(classifier);
        let (watcher, watch_state) =
            create_fs_watcher(&root, &classifier, raw_tx, config.notify_poll_interval)?;
        let watcher = Arc::new(Mutex::new(Some(watcher)));

        spawn_event_loop(
            root.clone(),
            classifier,
            tracker,
            raw_rx,
            event_tx,
            error_tx,
            watcher.clone(),
            watch_state.clone(),
        );

        Ok((
            Self {
                inner: Arc::new(FileWatcherInner {
                    root,
                    watcher,
                    watch_state,
                }),
            },
            WatchStreams {
                events: event_rx,
                errors: error_rx,
            },
        ))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.inner
            .watch_state
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }

    /// Drops the OS watcher; the event loop drains and both streams close.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.inner.watcher.lock() {
            guard.take();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.stop();
        }
    }
}

fn create_fs_watcher(
    root: &Path,
    classifier: &Classifier,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<(RecommendedWatcher, WatchState)> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )?;
    let watch_state = Arc::new(Mutex::new(HashSet::new()));
    let watch_dirs = build_watch_list(root, root, classifier);
    {
        let mut guard = watch_state
            .lock()
            .map_err(|_| WatcherError::Other("watch state lock poisoned".to_string()))?;
        for dir in watch_dirs {
            if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!("failed to watch {}: {err}", dir.display());
                continue;
            }
            guard.insert(dir);
        }
    }
    Ok((watcher, watch_state))
}

fn build_watch_list(root: &Path, start: &Path, classifier: &Classifier) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    if is_watchable_dir(root, start, classifier) {
        out.push(start.to_path_buf());
    }

    let root_owned = root.to_path_buf();
    let filter_classifier = classifier.clone();
    let mut builder = WalkBuilder::new(start);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true);
    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        !is_dir || is_watchable_dir(&root_owned, entry.path(), &filter_classifier)
    });

    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() || entry.path() == start {
            continue;
        }
        out.push(entry.path().to_path_buf());
    }

    out
}

fn is_watchable_dir(root: &Path, path: &Path, classifier: &Classifier) -> bool {
    if path == root {
        return true;
    }
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };

    relative.components().all(|component| match component {
        std::path::Component::Normal(name) => !classifier.skips_segment(&name.to_string_lossy()),
        _ => true,
    })
}

fn maybe_add_watches(
    root: &Path,
    evt: &Event,
    classifier: &Classifier,
    watcher: &SharedWatcher,
    watch_state: &WatchState,
) {
    if !matches!(evt.kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))) {
        return;
    }
    for path in &evt.paths {
        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        if meta.is_dir() && is_watchable_dir(root, path, classifier) {
            add_watch_tree(root, path, classifier, watcher, watch_state);
        }
    }
}

fn add_watch_tree(
    root: &Path,
    start: &Path,
    classifier: &Classifier,
    watcher: &SharedWatcher,
    watch_state: &WatchState,
) {
    let to_add = build_watch_list(root, start, classifier);
    if to_add.is_empty() {
        return;
    }

    let mut new_dirs: Vec<PathBuf> = Vec::new();
    {
        let Ok(mut guard) = watch_state.lock() else {
            warn!("watch state lock poisoned");
            return;
        };
        for dir in to_add {
            if guard.insert(dir.clone()) {
                new_dirs.push(dir);
            }
        }
    }
    if new_dirs.is_empty() {
        return;
    }

    let Ok(mut watcher_guard) = watcher.lock() else {
        warn!("watcher lock poisoned");
        return;
    };
    let Some(watcher) = watcher_guard.as_mut() else {
        return;
    };
    for dir in new_dirs {
        if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!("failed to watch {}: {err}", dir.display());
            if let Ok(mut guard) = watch_state.lock() {
                guard.remove(&dir);
            }
        } else {
            debug!("watching new directory {}", dir.display());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_event_loop(
    root: PathBuf,
    classifier: Arc<Classifier>,
    tracker: Arc<ContentHashTracker>,
    mut raw_rx: mpsc::Receiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<FileChangeEvent>,
    error_tx: mpsc::Sender<WatcherError>,
    watcher: SharedWatcher,
    watch_state: WatchState,
) {
    tokio::spawn(async move {
        while let Some(res) = raw_rx.recv().await {
            let evt = match res {
                Ok(evt) => evt,
                Err(err) => {
                    warn!("Watcher error: {err}");
                    let _ = error_tx.try_send(WatcherError::from(err));
                    continue;
                }
            };

            let root = root.clone();
            let classifier = Arc::clone(&classifier);
            let tracker = Arc::clone(&tracker);
            let watcher = Arc::clone(&watcher);
            let watch_state = Arc::clone(&watch_state);
            let changes = tokio::task::spawn_blocking(move || {
                maybe_add_watches(&root, &evt, &classifier, &watcher, &watch_state);
                translate_event(&root, &evt, &classifier, &tracker)
            })
            .await;

            let changes = match changes {
                Ok(changes) => changes,
                Err(err) => {
                    let _ = error_tx.try_send(WatcherError::Other(format!(
                        "event translation task failed: {err}"
                    )));
                    continue;
                }
            };
            for change in changes {
                if event_tx.send(change).await.is_err() {
                    return;
                }
            }
        }
        debug!("watcher event loop finished");
    });
}

fn operation_for(kind: &EventKind) -> Option<Operation> {
    match kind {
        EventKind::Create(_) => Some(Operation::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(Operation::Rename),
        EventKind::Modify(_) | EventKind::Any => Some(Operation::Modify),
        EventKind::Remove(_) => Some(Operation::Delete),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Classifies, hash-filters and relativizes one raw event.
fn translate_event(
    root: &Path,
    evt: &Event,
    classifier: &Classifier,
    tracker: &ContentHashTracker,
) -> Vec<FileChangeEvent> {
    let Some(operation) = operation_for(&evt.kind) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for path in &evt.paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let category = classifier.classify(relative);
        if category == Category::Ignore {
            continue;
        }
        if path.is_dir() {
            continue;
        }

        if operation.clears_hash() {
            tracker.remove(path);
            out.push(FileChangeEvent::new(relative, operation, category));
            continue;
        }

        if !tracker.has_changed(path) {
            debug!("unchanged content, dropping {}", relative.display());
            continue;
        }
        out.push(FileChangeEvent::new(relative, operation, category));
    }
    out
}
