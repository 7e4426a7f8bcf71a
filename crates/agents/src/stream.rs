//! Bounded, typed event stream of agent, tool and model-node lifecycle.
//!
//! `emit` never blocks: events are dropped when the queue is full or the stream is closed.
//! Observers see every event emitted while the stream is open, each on its own task.

use crate::model::TokenUsage;
use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use taskwing_protocol::{redact::redact_map, redact_text};
use tokio::sync::mpsc;

pub const DEFAULT_STREAM_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    AgentStart,
    AgentEnd,
    AgentError,
    ToolCall,
    ToolResult,
    LlmChunk,
    Finding,
    Synthesis,
    NodeStart,
    NodeEnd,
}

impl StreamEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::AgentEnd => "agent_end",
            Self::AgentError => "agent_error",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::LlmChunk => "llm_chunk",
            Self::Finding => "finding",
            Self::Synthesis => "synthesis",
            Self::NodeStart => "node_start",
            Self::NodeEnd => "node_end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(kind: StreamEventType, agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            agent: agent.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn sanitized(mut self) -> Self {
        redact_map(&mut self.metadata);
        self.content = redact_text(&self.content);
        self
    }
}

pub trait StreamObserver: Send + Sync {
    fn on_event(&self, event: &StreamEvent);
}

impl<F> StreamObserver for F
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    fn on_event(&self, event: &StreamEvent) {
        self(event);
    }
}

struct StreamInner {
    tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    observers: RwLock<Vec<Arc<dyn StreamObserver>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
    emitted: AtomicU64,
}

#[derive(Clone)]
pub struct StreamBus {
    inner: Arc<StreamInner>,
}

impl Default for StreamBus {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl std::fmt::Debug for StreamBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBus")
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped_count())
            .finish_non_exhaustive()
    }
}

impl StreamBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(StreamInner {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                observers: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Hands out the single queue consumer; `None` after the first call.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        match self.inner.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn StreamObserver>) {
        match self.inner.observers.write() {
            Ok(mut guard) => guard.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Queues `event`; returns `false` when it was dropped.
    pub fn emit(&self, event: StreamEvent) -> bool {
        if self.is_closed() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let event = event.sanitized();
        self.notify_observers(&event);

        let sender = match self.inner.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => {
                self.inner.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                trace!("stream event dropped: {err}");
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn emit_simple(
        &self,
        kind: StreamEventType,
        agent: impl Into<String>,
        content: impl Into<String>,
    ) -> bool {
        self.emit(StreamEvent::new(kind, agent, content))
    }

    /// One-shot close: later emits are dropped and the receiver drains then ends.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn emitted_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    fn notify_observers(&self, event: &StreamEvent) {
        let observers: Vec<Arc<dyn StreamObserver>> = match self.inner.observers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if observers.is_empty() {
            return;
        }
        let handle = tokio::runtime::Handle::try_current().ok();
        for observer in observers {
            let event = event.clone();
            match &handle {
                Some(handle) => {
                    handle.spawn(async move { observer.on_event(&event) });
                }
                None => observer.on_event(&event),
            }
        }
    }
}

/// Translates model and tool lifecycle callbacks into `node_start` / `node_end` events with a
/// short human-readable activity line.
#[derive(Debug, Clone)]
pub struct NodeHooks {
    stream: StreamBus,
    agent: String,
}

impl NodeHooks {
    pub fn new(stream: StreamBus, agent: impl Into<String>) -> Self {
        Self {
            stream,
            agent: agent.into(),
        }
    }

    pub fn model_start(&self, model: &str, message_count: usize) {
        let content = format!("Calling {model} with {message_count} messages");
        self.stream.emit(
            StreamEvent::new(StreamEventType::NodeStart, &self.agent, content)
                .with_metadata("node", "model")
                .with_metadata("model", model)
                .with_metadata("messages", message_count),
        );
    }

    pub fn model_end(&self, model: &str, usage: TokenUsage, elapsed: Duration) {
        let content = if usage.total_tokens > 0 {
            format!(
                "{model} responded in {} ms ({} tokens: {} in, {} out)",
                elapsed.as_millis(),
                usage.total_tokens,
                usage.prompt_tokens,
                usage.completion_tokens
            )
        } else {
            format!("{model} responded in {} ms", elapsed.as_millis())
        };
        self.stream.emit(
            StreamEvent::new(StreamEventType::NodeEnd, &self.agent, content)
                .with_metadata("node", "model")
                .with_metadata("model", model)
                .with_metadata("duration_ms", elapsed.as_millis() as u64)
                .with_metadata("usage_total", usage.total_tokens),
        );
    }

    pub fn model_error(&self, model: &str, error: &str) {
        self.stream.emit(
            StreamEvent::new(
                StreamEventType::NodeEnd,
                &self.agent,
                format!("{model} failed: {error}"),
            )
            .with_metadata("node", "model")
            .with_metadata("model", model)
            .with_metadata("error", error),
        );
    }

    pub fn tool_start(&self, tool: &str, arguments: &Value) {
        self.stream.emit(
            StreamEvent::new(
                StreamEventType::ToolCall,
                &self.agent,
                format!("Running tool {tool}"),
            )
            .with_metadata("node", "tool")
            .with_metadata("tool", tool)
            .with_metadata("arguments", arguments.clone()),
        );
    }

    pub fn tool_end(&self, tool: &str, ok: bool, output_len: usize, elapsed: Duration) {
        let status = if ok { "finished" } else { "failed" };
        self.stream.emit(
            StreamEvent::new(
                StreamEventType::ToolResult,
                &self.agent,
                format!("Tool {tool} {status} in {} ms", elapsed.as_millis()),
            )
            .with_metadata("node", "tool")
            .with_metadata("tool", tool)
            .with_metadata("ok", ok)
            .with_metadata("output_bytes", output_len),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_queue_drops_without_blocking() {
        let bus = StreamBus::new(2);
        assert!(bus.emit_simple(StreamEventType::AgentStart, "doc", "a"));
        assert!(bus.emit_simple(StreamEventType::AgentEnd, "doc", "b"));
        assert!(!bus.emit_simple(StreamEventType::AgentEnd, "doc", "c"));
        assert_eq!(bus.dropped_count(), 1);
        assert_eq!(bus.emitted_count(), 2);
    }

    #[test]
    fn event_type_names_match_wire_names() {
        for kind in [
            StreamEventType::AgentStart,
            StreamEventType::AgentError,
            StreamEventType::LlmChunk,
            StreamEventType::NodeEnd,
        ] {
            assert_eq!(json!(kind), json!(kind.as_str()));
        }
    }

    #[tokio::test]
    async fn close_is_one_shot_and_drains() {
        let bus = StreamBus::new(8);
        let mut rx = bus.take_receiver().expect("receiver");
        assert!(bus.take_receiver().is_none());
        bus.emit_simple(StreamEventType::Finding, "code", "x");
        bus.close();
        bus.close();
        assert!(!bus.emit_simple(StreamEventType::Finding, "code", "y"));
        assert_eq!(rx.recv().await.map(|e| e.content), Some("x".to_string()));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn metadata_is_redacted_before_queueing() {
        let bus = StreamBus::new(4);
        let mut rx = bus.take_receiver().expect("receiver");
        bus.emit(
            StreamEvent::new(
                StreamEventType::ToolCall,
                "react_code",
                "env OPENAI_API_KEY=sk-123 set",
            )
            .with_metadata("api_key", "sk-123")
            .with_metadata("args", json!({"password": "hunter2", "path": "a.go"})),
        );
        let event = rx.recv().await.expect("event");
        assert_eq!(event.metadata["api_key"], "***REDACTED***");
        assert_eq!(event.metadata["args"]["password"], "***REDACTED***");
        assert_eq!(event.metadata["args"]["path"], "a.go");
        assert!(!event.content.contains("sk-123"));
    }

    #[tokio::test]
    async fn observers_receive_copies() {
        let bus = StreamBus::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_observer(Arc::new(move |event: &StreamEvent| {
            let _ = tx.send(event.kind);
        }));
        bus.emit_simple(StreamEventType::NodeStart, "doc", "start");
        assert_eq!(rx.recv().await, Some(StreamEventType::NodeStart));
    }

    #[tokio::test]
    async fn node_hooks_describe_model_calls() {
        let bus = StreamBus::new(4);
        let mut rx = bus.take_receiver().expect("receiver");
        let hooks = NodeHooks::new(bus, "doc");
        hooks.model_start("gpt-test", 3);
        hooks.model_end("gpt-test", TokenUsage::new(100, 20), Duration::from_millis(42));

        let start = rx.recv().await.expect("start");
        assert_eq!(start.kind, StreamEventType::NodeStart);
        assert_eq!(start.content, "Calling gpt-test with 3 messages");
        let end = rx.recv().await.expect("end");
        assert_eq!(
            end.content,
            "gpt-test responded in 42 ms (120 tokens: 100 in, 20 out)"
        );
    }
}
