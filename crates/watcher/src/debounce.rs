use crate::{Category, FileChangeEvent};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Callback receiving one flushed batch, in arrival order.
pub type FlushFn = Arc<dyn Fn(Vec<FileChangeEvent>) + Send + Sync>;

/// Callback receiving a flushed batch together with its category.
pub type CategoryFlushFn = Arc<dyn Fn(Category, Vec<FileChangeEvent>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceDelays {
    pub deps: Duration,
    pub docs: Duration,
    pub other: Duration,
}

impl Default for DebounceDelays {
    fn default() -> Self {
        Self {
            deps: Duration::from_secs(2),
            docs: Duration::from_secs(1),
            other: Duration::from_millis(500),
        }
    }
}

impl DebounceDelays {
    #[must_use]
    pub const fn for_category(&self, category: Category) -> Duration {
        match category {
            Category::Deps => self.deps,
            Category::Docs => self.docs,
            _ => self.other,
        }
    }
}

struct DebounceState {
    pending: Vec<FileChangeEvent>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    stopped: bool,
}

fn lock_state(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Single-shot timed batcher. Every `add` resets the timer; on expiry the pending list is
/// swapped out under the lock and handed to the flush callback.
///
/// `add` spawns the timer on the ambient tokio runtime.
#[derive(Clone)]
pub struct Debouncer {
    state: Arc<Mutex<DebounceState>>,
    delays: DebounceDelays,
    flush: FlushFn,
}

impl Debouncer {
    pub fn new(delays: DebounceDelays, flush: FlushFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(DebounceState {
                pending: Vec::new(),
                timer: None,
                generation: 0,
                stopped: false,
            })),
            delays,
            flush,
        }
    }

    /// Queues `event`; returns `false` when the debouncer is stopped and the event was dropped.
    pub fn add(&self, event: FileChangeEvent) -> bool {
        let delay = self.delays.for_category(event.category);
        let mut state = lock_state(&self.state);
        if state.stopped {
            debug!("debouncer stopped; dropping {}", event.display_path());
            return false;
        }

        state.pending.push(event);
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let shared = Arc::clone(&self.state);
        let flush = Arc::clone(&self.flush);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let batch = {
                let mut state = lock_state(&shared);
                if state.stopped || state.generation != generation {
                    return;
                }
                state.timer = None;
                std::mem::take(&mut state.pending)
            };
            if !batch.is_empty() {
                flush(batch);
            }
        }));
        true
    }

    /// Cancels the timer and drops pending events. Idempotent.
    pub fn stop(&self) {
        let mut state = lock_state(&self.state);
        state.stopped = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending.clear();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        lock_state(&self.state).stopped
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock_state(&self.state).pending.len()
    }
}

/// One [`Debouncer`] per category, created on first use.
#[derive(Clone)]
pub struct DebouncerSet {
    debouncers: Arc<Mutex<HashMap<Category, Debouncer>>>,
    stopped: Arc<AtomicBool>,
    delays: DebounceDelays,
    flush: CategoryFlushFn,
}

impl DebouncerSet {
    pub fn new(delays: DebounceDelays, flush: CategoryFlushFn) -> Self {
        Self {
            debouncers: Arc::new(Mutex::new(HashMap::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            delays,
            flush,
        }
    }

    pub fn add(&self, event: FileChangeEvent) -> bool {
        if self.is_stopped() || event.category == Category::Ignore {
            return false;
        }
        let category = event.category;
        let debouncer = {
            let mut guard = match self.debouncers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .entry(category)
                .or_insert_with(|| {
                    let flush = Arc::clone(&self.flush);
                    Debouncer::new(
                        self.delays,
                        Arc::new(move |batch: Vec<FileChangeEvent>| flush(category, batch)),
                    )
                })
                .clone()
        };
        debouncer.add(event)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let guard = match self.debouncers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for debouncer in guard.values() {
            debouncer.stop();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        let guard = match self.debouncers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.values().map(Debouncer::pending_len).sum()
    }
}
