//! Observation points around every tool call.
//!
//! The binary installs [`LogHooks`]; tests install [`RecordingHooks`] and assert on what the
//! server reported.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use taskwing_engine::{ActivityEntry, ActivityLog, ActivityType};
use taskwing_protocol::{redacted, ErrorCode};

/// How one tool call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub error: Option<ErrorCode>,
    pub elapsed: Duration,
}

impl ToolOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub trait ToolHooks: Send + Sync {
    fn on_tool_call(&self, tool: &str, arguments: &Value);

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome);
}

/// Writes to the `log` facade and, when given, to the activity log.
#[derive(Debug, Clone, Default)]
pub struct LogHooks {
    activity: Option<ActivityLog>,
}

impl LogHooks {
    #[must_use]
    pub fn new(activity: Option<ActivityLog>) -> Self {
        Self { activity }
    }
}

impl ToolHooks for LogHooks {
    fn on_tool_call(&self, tool: &str, arguments: &Value) {
        debug!("tool {tool} called with {}", redacted(arguments.clone()));
    }

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome) {
        let elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome.error {
            None => info!("tool {tool} ok in {elapsed_ms}ms"),
            Some(code) => warn!("tool {tool} failed with {code} in {elapsed_ms}ms"),
        }
        let Some(activity) = &self.activity else {
            return;
        };
        let mut entry = ActivityEntry::new(ActivityType::ToolCall, format!("tool {tool}"))
            .with_detail("tool", tool)
            .with_detail("ok", outcome.is_ok())
            .with_detail("duration_ms", elapsed_ms);
        if let Some(code) = outcome.error {
            entry = entry.with_detail("code", code.as_str());
        }
        activity.add_entry(entry);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    Call { tool: String, arguments: Value },
    Result { tool: String, error: Option<ErrorCode> },
}

/// Keeps every hook invocation in memory.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    #[must_use]
    pub fn events(&self) -> Vec<HookEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, event: HookEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl ToolHooks for RecordingHooks {
    fn on_tool_call(&self, tool: &str, arguments: &Value) {
        self.push(HookEvent::Call {
            tool: tool.to_string(),
            arguments: arguments.clone(),
        });
    }

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome) {
        self.push(HookEvent::Result {
            tool: tool.to_string(),
            error: outcome.error,
        });
    }
}
