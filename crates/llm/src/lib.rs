//! LLM client contract — the orchestrator's one out-of-scope collaborator,
//! typed the way the teacher types its own chat API surface
//! (`ChatMessage`/`ChatRole`/`ToolCall`/`ChatResponse`), but behind a trait
//! instead of a concrete `Ollama`/`OpenRouter` router: this crate sits below
//! `agentworld-agent` in the workspace and knows nothing about `Agent` or
//! `AgentMessage`, so callers adapt their own message type into
//! [`ChatMessage`] at the boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message handed to [`LlmClient::generate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

/// A tool call requested by the model. `arguments` is already normalized to
/// a parsed `serde_json::Value` — the raw-string form some providers return
/// only exists transiently during sanitation upstream, in `agentworld-agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_tool_call_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A tool definition advertised to the model so it can emit native tool
/// calls, mirroring the OpenAI-compatible `tools` array the teacher already
/// builds by hand in `messages_to_ollama`/`messages_to_openai`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments object.
    pub parameters: serde_json::Value,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// Result of a [`LlmClient::generate`] call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: vec![], finish_reason: FinishReason::Stop }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { content: String::new(), tool_calls, finish_reason: FinishReason::ToolCalls }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation canceled")]
    Canceled,
    #[error("provider error: {0}")]
    Provider(String),
}

/// Cooperative cancellation token threaded through `generate`. Cloning
/// shares the same underlying flag; any clone can observe a cancellation
/// raised through another. The orchestrator's `ProcessingHandle` wraps one
/// of these rather than inventing a second cancellation type.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    canceled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

/// A sink for streamed text chunks, delivered before the final
/// [`LlmResponse`] is returned. Mirrors the teacher's
/// `chat_stream_with_fallback(..., tx: mpsc::Sender<String>)` shape.
pub type StreamSink = mpsc::Sender<String>;

#[derive(Default)]
pub struct GenerateOpts {
    pub tools: Vec<ToolSpec>,
    pub stream: Option<StreamSink>,
}

impl GenerateOpts {
    pub fn with_tools(tools: Vec<ToolSpec>) -> Self {
        Self { tools, stream: None }
    }
}

/// The orchestrator's one external collaborator. Implementors own whatever
/// provider plumbing they like; this crate only fixes the contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `agent_name` identifies which agent is generating, for logging only
    /// — no provider-specific routing decision is made on it here.
    async fn generate(
        &self,
        agent_name: &str,
        messages: &[ChatMessage],
        opts: GenerateOpts,
        cancel: CancelSignal,
    ) -> Result<LlmResponse, LlmError>;
}

/// A scriptable fake [`LlmClient`] for orchestrator tests: responses are
/// consumed in order, one per `generate` call. Grounded on the teacher's
/// pattern of shipping a concrete implementation for every trait
/// (`OllamaClient`/`OpenRouterClient`) — here the "provider" is a fixed
/// script instead of a network call.
pub struct ScriptedLlmClient {
    responses: Mutex<std::collections::VecDeque<LlmResponse>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(
        &self,
        _agent_name: &str,
        _messages: &[ChatMessage],
        opts: GenerateOpts,
        cancel: CancelSignal,
    ) -> Result<LlmResponse, LlmError> {
        if cancel.is_canceled() {
            return Err(LlmError::Canceled);
        }
        let mut queue = self.responses.lock().await;
        let response = queue
            .pop_front()
            .ok_or_else(|| LlmError::Provider("scripted responses exhausted".to_string()))?;
        if let Some(sink) = opts.stream {
            if !response.content.is_empty() {
                let _ = sink.send(response.content.clone()).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_client_returns_responses_in_order() {
        let client = ScriptedLlmClient::new(vec![
            LlmResponse::text("first"),
            LlmResponse::text("second"),
        ]);
        let cancel = CancelSignal::new();

        let first = client
            .generate("agent-a", &[], GenerateOpts::default(), cancel.clone())
            .await
            .unwrap();
        assert_eq!(first.content, "first");

        let second = client
            .generate("agent-a", &[], GenerateOpts::default(), cancel)
            .await
            .unwrap();
        assert_eq!(second.content, "second");
    }

    #[tokio::test]
    async fn scripted_client_errors_when_exhausted() {
        let client = ScriptedLlmClient::new(vec![]);
        let err = client
            .generate("agent-a", &[], GenerateOpts::default(), CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider(_)));
    }

    #[tokio::test]
    async fn canceled_signal_short_circuits_generate() {
        let client = ScriptedLlmClient::new(vec![LlmResponse::text("never seen")]);
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = client
            .generate("agent-a", &[], GenerateOpts::default(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Canceled));
    }

    #[tokio::test]
    async fn generate_streams_content_before_returning() {
        let client = ScriptedLlmClient::new(vec![LlmResponse::text("hi there")]);
        let (tx, mut rx) = mpsc::channel(4);
        let opts = GenerateOpts { tools: vec![], stream: Some(tx) };
        let response = client
            .generate("agent-a", &[], opts, CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(response.content, "hi there");
        assert_eq!(rx.recv().await, Some("hi there".to_string()));
    }

    #[test]
    fn tool_call_function_arguments_default_to_null() {
        let tc: ToolCall = serde_json::from_str(
            r#"{"function":{"name":"shell_cmd"}}"#,
        )
        .unwrap();
        assert_eq!(tc.function.arguments, serde_json::Value::Null);
        assert_eq!(tc.r#type, "function");
    }
}
