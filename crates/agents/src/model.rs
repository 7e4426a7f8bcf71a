//! The opaque chat-model contract agents are written against, plus offline implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// The backing model cannot accept bound tool schemas.
    #[error("model does not support tool binding: {0}")]
    ToolBindingUnsupported(String),

    #[error("model request failed: {0}")]
    Request(String),

    #[error("model call cancelled")]
    Cancelled,
}

pub type ChunkReceiver = mpsc::Receiver<Result<String, ModelError>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: ChatRequest) -> Result<ChatResponse, ModelError>;

    /// Streams content chunks. The default delivers the whole response as one chunk.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkReceiver, ModelError> {
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(response.content)).await;
        Ok(rx)
    }
}

pub type SharedModel = Arc<dyn ChatModel>;

/// Replays canned responses in order, then repeats the fallback (if any).
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Result<ChatResponse, ModelError>>>,
    fallback: Option<ChatResponse>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn then(self, response: ChatResponse) -> Self {
        self.push(Ok(response));
        self
    }

    #[must_use]
    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.then(ChatResponse::text(content))
    }

    #[must_use]
    pub fn then_error(self, error: ModelError) -> Self {
        self.push(Err(error));
        self
    }

    /// Response returned once the script is exhausted.
    #[must_use]
    pub fn repeating(mut self, response: ChatResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    fn push(&self, item: Result<ChatResponse, ModelError>) {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push_back(item);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ChatRequest> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        match self.calls.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn shared(self) -> SharedModel {
        Arc::new(self)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.script.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        match next {
            Some(item) => item,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::Request("script exhausted".to_string())),
        }
    }
}

/// Stand-in used when no model is configured; every call fails with `Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct UnavailableModel;

#[async_trait]
impl ChatModel for UnavailableModel {
    fn model_name(&self) -> &str {
        "unavailable"
    }

    async fn generate(&self, _request: ChatRequest) -> Result<ChatResponse, ModelError> {
        Err(ModelError::Unavailable(
            "no chat model is configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_then_repeats() {
        let model = ScriptedModel::new("test")
            .then_text("first")
            .then_error(ModelError::Request("boom".to_string()))
            .repeating(ChatResponse::text("again"));

        let first = model.generate(ChatRequest::default()).await.expect("first");
        assert_eq!(first.content, "first");
        assert!(model.generate(ChatRequest::default()).await.is_err());
        for _ in 0..3 {
            let next = model.generate(ChatRequest::default()).await.expect("repeat");
            assert_eq!(next.content, "again");
        }
        assert_eq!(model.call_count(), 5);
    }

    #[tokio::test]
    async fn exhausted_script_without_fallback_errors() {
        let model = ScriptedModel::new("test");
        let err = model
            .generate(ChatRequest::default())
            .await
            .expect_err("exhausted");
        assert!(matches!(err, ModelError::Request(_)));
    }

    #[tokio::test]
    async fn default_stream_yields_single_chunk() {
        let model = ScriptedModel::new("test").then_text("hello");
        let mut rx = model.stream(ChatRequest::default()).await.expect("stream");
        assert_eq!(rx.recv().await, Some(Ok("hello".to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
