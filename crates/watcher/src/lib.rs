//! # TaskWing watcher
//!
//! Turns raw filesystem notifications into debounced, categorized batches.
//!
//! ```text
//! notify events
//!     │
//!     ├──> Category classifier (drop `ignore`)
//!     │
//!     ├──> Content-hash tracker (drop unchanged, clear on delete/rename)
//!     │
//!     └──> Per-category debouncer
//!            └─> flush(category, Vec<FileChangeEvent>)
//! ```

mod category;
mod debounce;
mod error;
mod event;
mod hash;
mod watcher;

pub use category::{Category, Classifier, ClassifierConfig};
pub use debounce::{CategoryFlushFn, DebounceDelays, Debouncer, DebouncerSet, FlushFn};
pub use error::{Result, WatcherError};
pub use event::{FileChangeEvent, Operation};
pub use hash::ContentHashTracker;
pub use watcher::{FileWatcher, WatchStreams, WatcherConfig};
