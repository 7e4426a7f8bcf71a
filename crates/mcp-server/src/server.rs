//! The JSON-RPC session: handshake, tool calls and resource reads over one stdio pair.
//!
//! Requests are handled in arrival order. `initialize` must come first and tools or resources
//! may only be used after the client's `initialized` notification. A malformed frame, or a tool
//! call before the handshake completes, is answered with a `ProtocolError` and ends the session.

use crate::hooks::{ToolHooks, ToolOutcome};
use crate::resources::{self, ServerFacts};
use crate::tools::{self, ToolContext};
use crate::transport::{FrameError, FrameReader, FrameWriter};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskwing_protocol::jsonrpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolCallResult, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION, SERVER_NOT_INITIALIZED,
};
use taskwing_protocol::{ErrorCode, ErrorEnvelope};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub const SERVER_NAME: &str = "taskwing-mcp";
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const INSTRUCTIONS: &str = "TaskWing task tools. Tasks can be referenced by id, an id prefix of \
at least 8 characters, or words from their title; find-task shows candidates when a reference \
is ambiguous.";

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ServeOutcome {
    /// Input closed cleanly.
    Eof,
    /// The client broke the protocol; the envelope was sent before stopping.
    ProtocolViolation(ErrorEnvelope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInitialize,
    AwaitingInitialized,
    Ready,
}

enum Step {
    Reply(Option<JsonRpcResponse>),
    Abort(JsonRpcResponse, ErrorEnvelope),
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

pub struct McpServer {
    ctx: ToolContext,
    hooks: Arc<dyn ToolHooks>,
    facts: ServerFacts,
    phase: Phase,
    tool_timeout: Duration,
}

impl McpServer {
    pub fn new(ctx: ToolContext, hooks: Arc<dyn ToolHooks>) -> Self {
        Self {
            ctx,
            hooks,
            facts: ServerFacts::default(),
            phase: Phase::AwaitingInitialize,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_facts(mut self, facts: ServerFacts) -> Self {
        self.facts = facts;
        self
    }

    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Serves until the input closes or the client violates the protocol.
    pub async fn serve<R, W>(mut self, read: R, write: W) -> std::io::Result<ServeOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::new(BufReader::new(read));
        let mut writer = FrameWriter::new(write);
        loop {
            let frame = match reader.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("input closed, stopping");
                    return Ok(ServeOutcome::Eof);
                }
                Err(FrameError::Io(err)) => return Err(err),
                Err(err) => {
                    let envelope = protocol_error(err.to_string());
                    writer
                        .send(&failure(Value::Null, PARSE_ERROR, &envelope))
                        .await?;
                    return Ok(ServeOutcome::ProtocolViolation(envelope));
                }
            };

            let messages = match frame {
                Value::Array(items) if !items.is_empty() => items,
                other => vec![other],
            };
            for message in messages {
                match self.handle_message(message).await {
                    Step::Reply(Some(response)) => writer.send(&response).await?,
                    Step::Reply(None) => {}
                    Step::Abort(response, envelope) => {
                        warn!("protocol violation: {}", envelope.message);
                        writer.send(&response).await?;
                        return Ok(ServeOutcome::ProtocolViolation(envelope));
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Value) -> Step {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(err) => {
                let envelope = protocol_error(format!("invalid request: {err}"));
                return Step::Abort(failure(id, INVALID_REQUEST, &envelope), envelope);
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            let envelope = protocol_error(format!("unsupported jsonrpc version '{}'", request.jsonrpc));
            return Step::Abort(failure(id, INVALID_REQUEST, &envelope), envelope);
        }
        self.handle(request).await
    }

    async fn handle(&mut self, request: JsonRpcRequest) -> Step {
        debug!("<- {}", request.method);
        let notification = request.is_notification();
        let id = request.id.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => {
                if self.phase != Phase::AwaitingInitialize {
                    warn!("client sent initialize twice");
                }
                self.phase = Phase::AwaitingInitialized;
                Ok(initialize_result())
            }
            "initialized" | "notifications/initialized" => {
                if self.phase == Phase::AwaitingInitialize {
                    let envelope = protocol_error("initialized received before initialize");
                    return Step::Abort(failure(id, SERVER_NOT_INITIALIZED, &envelope), envelope);
                }
                self.phase = Phase::Ready;
                info!("session initialized");
                Ok(Value::Null)
            }
            "ping" => Ok(json!({})),
            "tools/list" | "resources/list" if self.phase == Phase::AwaitingInitialize => {
                Err(not_initialized("initialize first"))
            }
            "tools/list" => Ok(json!({ "tools": tools::descriptors() })),
            "resources/list" => Ok(json!({ "resources": resources::descriptors() })),
            "tools/call" | "resources/read" if self.phase != Phase::Ready => {
                let envelope = protocol_error(format!(
                    "{} before the initialization handshake completed",
                    request.method
                ));
                return Step::Abort(failure(id, SERVER_NOT_INITIALIZED, &envelope), envelope);
            }
            "tools/call" => self.call_tool(request.params).await,
            "resources/read" => self.read_resource(request.params).await,
            other => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("method not found: {other}"),
                data: None,
            }),
        };

        if notification {
            if let Err(err) = result {
                debug!("ignoring failed notification {}: {}", request.method, err.message);
            }
            return Step::Reply(None);
        }
        Step::Reply(Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::failure(id, err.code, err.message, err.data),
        }))
    }

    async fn call_tool(&self, params: Value) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params).map_err(|err| {
            invalid_params(ErrorEnvelope::new(
                ErrorCode::InvalidArgument,
                format!("invalid tools/call params: {err}"),
            ))
        })?;
        let Some(tool) = tools::find(&params.name) else {
            return Err(invalid_params(
                ErrorEnvelope::new(ErrorCode::InvalidArgument, format!("unknown tool '{}'", params.name))
                    .with_hint("Use tools/list"),
            ));
        };

        self.hooks.on_tool_call(tool.name, &params.arguments);
        let started = Instant::now();
        let ctx = self.ctx.clone();
        let arguments = params.arguments;
        let running = tokio::task::spawn_blocking(move || tool.call(&ctx, arguments));
        let result = match tokio::time::timeout(self.tool_timeout, running).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ErrorEnvelope::new(
                ErrorCode::Internal,
                format!("tool {} failed to complete: {join}", tool.name),
            )),
            Err(_) => Err(ErrorEnvelope::new(
                ErrorCode::CancellationRequested,
                format!("tool {} exceeded {}ms", tool.name, self.tool_timeout.as_millis()),
            )),
        };
        self.hooks.on_tool_result(
            tool.name,
            &ToolOutcome {
                error: result.as_ref().err().map(|err| err.code),
                elapsed: started.elapsed(),
            },
        );

        let payload = match result {
            Ok(output) => ToolCallResult::ok(output.text, output.structured),
            Err(envelope) => ToolCallResult::error(&envelope),
        };
        serde_json::to_value(payload).map_err(|err| JsonRpcError {
            code: INTERNAL_ERROR,
            message: err.to_string(),
            data: None,
        })
    }

    async fn read_resource(&self, params: Value) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = serde_json::from_value(params).map_err(|err| {
            invalid_params(ErrorEnvelope::new(
                ErrorCode::InvalidArgument,
                format!("invalid resources/read params: {err}"),
            ))
        })?;
        let ctx = self.ctx.clone();
        let facts = self.facts.clone();
        let contents = tokio::task::spawn_blocking(move || resources::read(&params.uri, &ctx, &facts))
            .await
            .map_err(|join| JsonRpcError {
                code: INTERNAL_ERROR,
                message: join.to_string(),
                data: None,
            })?
            .map_err(invalid_params)?;
        Ok(json!({ "contents": [contents] }))
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
        },
        "instructions": INSTRUCTIONS,
    })
}

fn protocol_error(message: impl Into<String>) -> ErrorEnvelope {
    ErrorEnvelope::new(ErrorCode::ProtocolError, message)
}

fn failure(id: Value, code: i64, envelope: &ErrorEnvelope) -> JsonRpcResponse {
    JsonRpcResponse::failure(id, code, envelope.message.clone(), Some(json!(envelope)))
}

fn not_initialized(message: &str) -> JsonRpcError {
    JsonRpcError {
        code: SERVER_NOT_INITIALIZED,
        message: message.to_string(),
        data: Some(json!(protocol_error(message))),
    }
}

fn invalid_params(envelope: ErrorEnvelope) -> JsonRpcError {
    JsonRpcError {
        code: INVALID_PARAMS,
        message: envelope.message.clone(),
        data: Some(json!(envelope)),
    }
}
