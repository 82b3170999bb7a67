//! The append-only record schema written to `Agent.memory` and round-tripped
//! through [`crate::Storage`]. Mirrors the teacher's `schema.rs` owning its
//! own `MemoryEntry` — the type that defines the shape of a record belongs
//! next to the code that appends and loads it, not next to the orchestrator
//! that merely holds a `Vec` of them.

use std::collections::HashMap;

use agentworld_llm::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one outstanding tool call attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallStatusEntry {
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// A single append-only row in an agent's memory, discriminated by `role`.
///
/// `chat_id` partitions memory: `prepare_messages` excludes rows whose
/// `chat_id` does not match the chat currently being processed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum AgentMessage {
    User {
        content: String,
        sender: String,
        chat_id: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<String>,
        created_at: DateTime<Utc>,
        agent_id: String,
    },
    Assistant {
        content: String,
        sender: String,
        chat_id: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<String>,
        created_at: DateTime<Utc>,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        tool_call_status: HashMap<String, ToolCallStatusEntry>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        sender: String,
        chat_id: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<String>,
        created_at: DateTime<Utc>,
        agent_id: String,
    },
    /// Ignored by LLM-context preparation beyond `agent.systemPrompt` — kept
    /// for persistence/audit, e.g. world-tag or guardrail notices.
    System {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
        message_id: String,
        created_at: DateTime<Utc>,
        agent_id: String,
    },
}

impl AgentMessage {
    pub fn content(&self) -> &str {
        match self {
            AgentMessage::User { content, .. }
            | AgentMessage::Assistant { content, .. }
            | AgentMessage::Tool { content, .. }
            | AgentMessage::System { content, .. } => content,
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            AgentMessage::User { chat_id, .. }
            | AgentMessage::Assistant { chat_id, .. }
            | AgentMessage::Tool { chat_id, .. } => Some(chat_id),
            AgentMessage::System { chat_id, .. } => chat_id.as_deref(),
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            AgentMessage::User { agent_id, .. }
            | AgentMessage::Assistant { agent_id, .. }
            | AgentMessage::Tool { agent_id, .. }
            | AgentMessage::System { agent_id, .. } => agent_id,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            AgentMessage::User { sender, .. }
            | AgentMessage::Assistant { sender, .. }
            | AgentMessage::Tool { sender, .. } => Some(sender),
            AgentMessage::System { .. } => None,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            AgentMessage::User { message_id, .. }
            | AgentMessage::Assistant { message_id, .. }
            | AgentMessage::Tool { message_id, .. }
            | AgentMessage::System { message_id, .. } => message_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            AgentMessage::User { created_at, .. }
            | AgentMessage::Assistant { created_at, .. }
            | AgentMessage::Tool { created_at, .. }
            | AgentMessage::System { created_at, .. } => *created_at,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, AgentMessage::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, AgentMessage::Assistant { .. })
    }
}
