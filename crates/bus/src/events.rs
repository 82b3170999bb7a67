//! Event payload shapes — one struct per channel, per spec.md §3 "Event".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type WorldId = String;
pub type ChatId = String;
pub type AgentId = String;
pub type MessageId = String;

/// `message` channel payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub content: String,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_status: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SseEventType {
    Start,
    Chunk,
    End,
    Error,
}

/// `sse` channel payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SSEEvent {
    pub agent_name: String,
    #[serde(rename = "type")]
    pub kind: SseEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolEventType {
    ToolStart,
    ToolResult,
    ToolError,
    ToolProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolExecutionInfo {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size: Option<usize>,
}

/// `tool` channel payload (emitted on the `world` topic, per spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub agent_name: String,
    #[serde(rename = "type")]
    pub kind: ToolEventType,
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub tool_execution: ToolExecutionInfo,
}

/// `system` channel payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    /// Optional structured event sub-type, e.g. `"hitl-option-request"` or
    /// `"chat-title-updated"` (spec.md §6 HITL protocol, §4.5 auto-title).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudEntityType {
    Agent,
    Chat,
    World,
}

/// `crud` channel payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrudEvent {
    pub operation: CrudOperation,
    pub entity_type: CrudEntityType,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_data: Option<Value>,
    pub chat_id: ChatId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    ResponseStart,
    ResponseEnd,
    Idle,
}

/// `activity` channel payload (emitted on the `world` topic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub pending_operations: i64,
    pub source: String,
    #[serde(default)]
    pub active_sources: Vec<String>,
    pub activity_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The channel an [`Event`] was emitted on. `Tool` and `Activity` both ride
/// the `world` topic per spec.md §3, but keep distinct payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Message,
    Sse,
    World,
    System,
    Crud,
}

pub const ALL_CHANNELS: [Channel; 5] = [
    Channel::Message,
    Channel::Sse,
    Channel::World,
    Channel::System,
    Channel::Crud,
];

/// The dynamic, per-channel payload. Modeled as a tagged sum type per
/// DESIGN NOTES §9 ("Dynamic tool-call shapes → tagged variant").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "lowercase")]
pub enum Event {
    Message(MessageEvent),
    Sse(SSEEvent),
    Tool(ToolEvent),
    System(SystemEvent),
    Crud(CrudEvent),
    Activity(ActivityEvent),
}

impl Event {
    pub fn channel(&self) -> Channel {
        match self {
            Event::Message(_) => Channel::Message,
            Event::Sse(_) => Channel::Sse,
            Event::Tool(_) | Event::Activity(_) => Channel::World,
            Event::System(_) => Channel::System,
            Event::Crud(_) => Channel::Crud,
        }
    }

    /// `sse:chunk` and `tool-progress` are transient per spec.md §4.2/§6 and
    /// are skipped by the persistence subscriber.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Event::Sse(SSEEvent {
                kind: SseEventType::Chunk,
                ..
            }) | Event::Tool(ToolEvent {
                kind: ToolEventType::ToolProgress,
                ..
            })
        )
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Event::Message(e) => e.chat_id.as_deref(),
            Event::Sse(e) => e.chat_id.as_deref(),
            Event::Tool(e) => e.chat_id.as_deref(),
            Event::System(e) => e.chat_id.as_deref(),
            Event::Crud(e) => Some(e.chat_id.as_str()),
            Event::Activity(_) => None,
        }
    }
}
