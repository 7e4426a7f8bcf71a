//! # TaskWing engine
//!
//! Continuous analysis glue around the watcher and the agents.
//!
//! ```text
//! FileWatcher ──> ChangePipeline (debounce per category)
//!                      │
//!                      └─> Dispatcher ──> agent (code | doc | deps) ──> Verifier
//!                                                                          │
//!                              ActivityLog <── DispatchReport ──> FindingsHandler
//!                                                                          │
//!                                                                  Notifier subscribers
//! ```
//!
//! [`EngineServices`] owns the per-root state (`.taskwing/`): activity log, debug log,
//! knowledge store, notifier and stream. The tool server and the watch loop share one instance.

pub mod activity;
pub mod config;
pub mod debug_log;
pub mod dispatcher;
pub mod engine;
mod error;
pub mod findings;
pub mod notifier;

pub use activity::{ActivityEntry, ActivityLog, ActivitySummary, ActivityType};
pub use config::Config;
pub use debug_log::{DebugLogOptions, DebugLogger};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherOptions};
pub use engine::{forward_stream, ChangePipeline, EngineServices, WatchEngine};
pub use error::{EngineError, Result};
pub use findings::{FileKnowledgeStore, FindingsHandler, HandleSummary};
pub use notifier::{BatchSummary, FindingSubscriber, Notification, Notifier};
