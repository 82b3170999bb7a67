//! Per-agent memory append rules. These are pure mutators over an agent's
//! own `Vec<AgentMessage>` — persisting the updated agent and logging
//! failures is the caller's job (`agentworld-agent`, which owns the `Agent`
//! struct and holds the `Storage` handle), matching the teacher's habit of
//! leaving `MemoryManager` mutation discipline to caller convention rather
//! than enforcing it through the type system.

use chrono::Utc;
use serde_json::Value;

use crate::schema::AgentMessage;

/// The inbound event `save_incoming_message` reacts to. `content` may be a
/// JSON-encoded tool-result envelope (`{"tool_call_id": ..., "content":
/// ...}`); see [`parse_enhanced_payload`].
pub struct IncomingEvent {
    pub sender: String,
    pub content: String,
    pub chat_id: Option<String>,
    pub message_id: String,
    pub reply_to_message_id: Option<String>,
}

enum EnhancedPayload {
    PlainText(String),
    ToolResult { tool_call_id: String, content: String },
}

/// Decodes an embedded tool-result envelope out of raw event content, if
/// present. A plain-text event is passed through unchanged.
fn parse_enhanced_payload(raw: &str) -> EnhancedPayload {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(tool_call_id)) = obj.get("tool_call_id") {
            let content = match obj.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return EnhancedPayload::ToolResult { tool_call_id: tool_call_id.clone(), content };
        }
    }
    EnhancedPayload::PlainText(raw.to_string())
}

/// `saveIncomingMessage(world, agent, event)`. Returns `None` when the event
/// is the agent's own echo (`event.sender == agent.id`) — nothing is
/// appended and the caller must not persist.
pub fn save_incoming_message(
    memory: &mut Vec<AgentMessage>,
    agent_id: &str,
    world_current_chat_id: Option<&str>,
    event: &IncomingEvent,
) -> Option<AgentMessage> {
    if event.sender == agent_id {
        return None;
    }

    let chat_id = event
        .chat_id
        .clone()
        .or_else(|| world_current_chat_id.map(String::from))
        .unwrap_or_default();
    let created_at = Utc::now();

    let record = match parse_enhanced_payload(&event.content) {
        EnhancedPayload::ToolResult { tool_call_id, content } => AgentMessage::Tool {
            content,
            tool_call_id,
            sender: event.sender.clone(),
            chat_id,
            message_id: event.message_id.clone(),
            reply_to_message_id: event.reply_to_message_id.clone(),
            created_at,
            agent_id: agent_id.to_string(),
        },
        EnhancedPayload::PlainText(content) => AgentMessage::User {
            content,
            sender: event.sender.clone(),
            chat_id,
            message_id: event.message_id.clone(),
            reply_to_message_id: event.reply_to_message_id.clone(),
            created_at,
            agent_id: agent_id.to_string(),
        },
    };

    memory.push(record.clone());
    Some(record)
}

/// `saveAssistant(world, agent, content, messageId, chatId, replyTo)`.
#[allow(clippy::too_many_arguments)]
pub fn save_assistant(
    memory: &mut Vec<AgentMessage>,
    agent_id: &str,
    content: String,
    message_id: String,
    chat_id: String,
    reply_to: Option<String>,
    tool_calls: Vec<agentworld_llm::ToolCall>,
) -> AgentMessage {
    let record = AgentMessage::Assistant {
        content,
        sender: agent_id.to_string(),
        chat_id,
        message_id,
        reply_to_message_id: reply_to,
        created_at: Utc::now(),
        agent_id: agent_id.to_string(),
        tool_calls,
        tool_call_status: Default::default(),
    };
    memory.push(record.clone());
    record
}

/// `saveTool(world, agent, content, toolCallId, chatId, replyTo)`.
pub fn save_tool(
    memory: &mut Vec<AgentMessage>,
    agent_id: &str,
    content: String,
    tool_call_id: String,
    chat_id: String,
    reply_to: Option<String>,
) -> AgentMessage {
    let record = AgentMessage::Tool {
        content,
        tool_call_id,
        sender: agent_id.to_string(),
        chat_id,
        message_id: uuid::Uuid::new_v4().to_string(),
        reply_to_message_id: reply_to,
        created_at: Utc::now(),
        agent_id: agent_id.to_string(),
    };
    memory.push(record.clone());
    record
}

/// `resetLLMCallCountIfNeeded(world, agent, event)`. Returns `true` when the
/// counter was reset (the caller should then persist the agent).
pub fn reset_llm_call_count_if_needed(sender: &str, llm_call_count: &mut u32) -> bool {
    if (sender == "human" || sender == "world") && *llm_call_count > 0 {
        *llm_call_count = 0;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sender: &str, content: &str) -> IncomingEvent {
        IncomingEvent {
            sender: sender.to_string(),
            content: content.to_string(),
            chat_id: Some("chat-1".to_string()),
            message_id: "msg-1".to_string(),
            reply_to_message_id: None,
        }
    }

    #[test]
    fn save_incoming_message_skips_self_sender() {
        let mut memory = Vec::new();
        let result = save_incoming_message(&mut memory, "agent-a", None, &event("agent-a", "hi"));
        assert!(result.is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn save_incoming_message_falls_back_to_world_current_chat_id() {
        let mut memory = Vec::new();
        let mut ev = event("human", "hello");
        ev.chat_id = None;
        let saved = save_incoming_message(&mut memory, "agent-a", Some("fallback-chat"), &ev).unwrap();
        assert_eq!(saved.chat_id(), Some("fallback-chat"));
    }

    #[test]
    fn save_incoming_message_decodes_tool_result_envelope() {
        let mut memory = Vec::new();
        let ev = event("agent-b", r#"{"tool_call_id":"tc-1","content":"42"}"#);
        let saved = save_incoming_message(&mut memory, "agent-a", None, &ev).unwrap();
        match saved {
            AgentMessage::Tool { tool_call_id, content, .. } => {
                assert_eq!(tool_call_id, "tc-1");
                assert_eq!(content, "42");
            }
            other => panic!("expected Tool, got {other:?}"),
        }
    }

    #[test]
    fn save_incoming_message_treats_plain_json_without_tool_call_id_as_text() {
        let mut memory = Vec::new();
        let ev = event("human", r#"{"foo":"bar"}"#);
        let saved = save_incoming_message(&mut memory, "agent-a", None, &ev).unwrap();
        assert!(saved.is_user());
        assert_eq!(saved.content(), r#"{"foo":"bar"}"#);
    }

    #[test]
    fn save_assistant_and_save_tool_append_in_order() {
        let mut memory = Vec::new();
        save_assistant(&mut memory, "agent-a", "thinking".into(), "m1".into(), "c1".into(), None, vec![]);
        save_tool(&mut memory, "agent-a", "result".into(), "tc-1".into(), "c1".into(), Some("m1".into()));
        assert_eq!(memory.len(), 2);
        assert!(memory[0].is_assistant());
        assert!(matches!(memory[1], AgentMessage::Tool { .. }));
    }

    #[test]
    fn reset_llm_call_count_if_needed_resets_on_human_sender() {
        let mut count = 3;
        assert!(reset_llm_call_count_if_needed("human", &mut count));
        assert_eq!(count, 0);
    }

    #[test]
    fn reset_llm_call_count_if_needed_resets_on_world_sender() {
        let mut count = 1;
        assert!(reset_llm_call_count_if_needed("world", &mut count));
        assert_eq!(count, 0);
    }

    #[test]
    fn reset_llm_call_count_if_needed_leaves_agent_sender_untouched() {
        let mut count = 2;
        assert!(!reset_llm_call_count_if_needed("agent-b", &mut count));
        assert_eq!(count, 2);
    }

    #[test]
    fn reset_llm_call_count_if_needed_noop_when_already_zero() {
        let mut count = 0;
        assert!(!reset_llm_call_count_if_needed("human", &mut count));
        assert_eq!(count, 0);
    }
}
