//! Read-only resources: `taskwing://system-status`, `taskwing://tasks`, `taskwing://config`.

use crate::tools::{ToolContext, TOOLS};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use taskwing_protocol::jsonrpc::{ResourceContents, ResourceDescriptor};
use taskwing_protocol::{ErrorCode, ErrorEnvelope, HasErrorCode};

pub const SYSTEM_STATUS_URI: &str = "taskwing://system-status";
pub const TASKS_URI: &str = "taskwing://tasks";
pub const CONFIG_URI: &str = "taskwing://config";

const JSON_MIME: &str = "application/json";

/// Process facts the status resource reports.
#[derive(Debug, Clone)]
pub struct ServerFacts {
    pub project: String,
    pub watching: bool,
    pub started_at: DateTime<Utc>,
    /// Effective configuration, secrets already redacted.
    pub config: Value,
}

impl Default for ServerFacts {
    fn default() -> Self {
        Self {
            project: String::new(),
            watching: false,
            started_at: Utc::now(),
            config: json!({}),
        }
    }
}

#[must_use]
pub fn descriptors() -> Vec<ResourceDescriptor> {
    [
        (SYSTEM_STATUS_URI, "system-status", "What this server offers right now"),
        (TASKS_URI, "tasks", "Every task as JSON"),
        (CONFIG_URI, "config", "Effective configuration with secrets redacted"),
    ]
    .into_iter()
    .map(|(uri, name, description)| ResourceDescriptor {
        uri: uri.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        mime_type: JSON_MIME.to_string(),
    })
    .collect()
}

pub fn read(uri: &str, ctx: &ToolContext, facts: &ServerFacts) -> Result<ResourceContents, ErrorEnvelope> {
    let body = match uri {
        SYSTEM_STATUS_URI => system_status(ctx, facts),
        TASKS_URI => {
            let tasks = ctx.store.list().map_err(|err| err.to_envelope())?;
            json!({ "count": tasks.len(), "tasks": tasks })
        }
        CONFIG_URI => facts.config.clone(),
        other => {
            return Err(ErrorEnvelope::new(
                ErrorCode::InvalidArgument,
                format!("unknown resource '{other}'"),
            )
            .with_hint("Use resources/list"))
        }
    };
    let text = serde_json::to_string_pretty(&body)
        .map_err(|err| ErrorEnvelope::new(ErrorCode::Internal, err.to_string()))?;
    Ok(ResourceContents {
        uri: uri.to_string(),
        mime_type: JSON_MIME.to_string(),
        text,
    })
}

fn system_status(ctx: &ToolContext, facts: &ServerFacts) -> Value {
    let tasks = match ctx.store.list() {
        Ok(tasks) => json!({ "available": true, "count": tasks.len() }),
        Err(err) => json!({ "available": false, "error": err.to_envelope() }),
    };
    json!({
        "server": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
        "project": facts.project,
        "started_at": facts.started_at,
        "tasks": tasks,
        "watch": { "enabled": facts.watching },
        "tools": TOOLS.iter().map(|tool| tool.name).collect::<Vec<_>>(),
        "resources": [SYSTEM_STATUS_URI, TASKS_URI, CONFIG_URI],
    })
}
