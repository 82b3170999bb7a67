//! Message publishing API (spec.md §6 "Message publishing API").
//!
//! Thin wrappers over `World::bus.emit`, grounded on the teacher's habit of
//! giving every externally-facing bus write its own named function
//! (`runtime/events.rs`'s per-event-kind emit helpers) rather than letting
//! callers build `Event` variants by hand.

use agentworld_agent::World;
use agentworld_bus::{ChatId, Event, MessageEvent, MessageId, SSEEvent, ToolEvent};
use chrono::Utc;
use serde_json::{json, Value};

fn resolve_role(sender: &str, is_tool_result: bool) -> &'static str {
    if is_tool_result {
        "tool"
    } else if sender.eq_ignore_ascii_case("human") || sender.to_lowercase().starts_with("user") {
        "user"
    } else {
        "assistant"
    }
}

/// `true` when `content` is the enhanced tool-result envelope
/// (`{"tool_call_id": ..., ...}`) rather than plain conversational text —
/// the same shape `agentworld_memory::append`'s incoming-message parser
/// recognizes.
fn is_tool_result_envelope(content: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(content),
        Ok(Value::Object(obj)) if matches!(obj.get("tool_call_id"), Some(Value::String(_)))
    )
}

/// `publishMessage(world, content, sender, chatId?, replyToMessageId?)`.
/// `target_agent_id`, when given, models "routing detects a targetAgentId"
/// (spec.md §6): it prepends `@targetAgentId, ` unless the content already
/// opens with a mention or is a tool-result envelope.
pub fn publish_message(
    world: &World,
    content: &str,
    sender: &str,
    chat_id: Option<ChatId>,
    reply_to_message_id: Option<MessageId>,
    target_agent_id: Option<&str>,
) -> MessageEvent {
    publish_message_with_id(
        world,
        content,
        sender,
        uuid::Uuid::new_v4().to_string(),
        chat_id,
        reply_to_message_id,
        target_agent_id,
    )
}

/// `publishMessageWithId(...)` — the pre-generated `messageId` is used by
/// streaming to correlate SSE chunks to the final persisted message.
#[allow(clippy::too_many_arguments)]
pub fn publish_message_with_id(
    world: &World,
    content: &str,
    sender: &str,
    message_id: MessageId,
    chat_id: Option<ChatId>,
    reply_to_message_id: Option<MessageId>,
    target_agent_id: Option<&str>,
) -> MessageEvent {
    let is_tool_result = is_tool_result_envelope(content);
    let routed_content = match target_agent_id {
        Some(target) if !is_tool_result && !agentworld_mention::has_any_mention_at_beginning(content) => {
            format!("@{target}, {content}")
        }
        _ => content.to_string(),
    };
    let role = resolve_role(sender, is_tool_result);

    let event = MessageEvent {
        content: routed_content,
        sender: sender.to_string(),
        role: Some(role.to_string()),
        tool_calls: vec![],
        tool_call_id: None,
        tool_call_status: None,
        timestamp: Utc::now(),
        message_id,
        chat_id,
        reply_to_message_id,
    };
    world.bus.emit(Event::Message(event.clone()));
    event
}

/// The decision payload `publishToolResult` wraps into the enhanced
/// tool-result envelope (spec.md §6).
pub struct ToolResultDecision {
    pub tool_call_id: String,
    pub decision: String,
    pub scope: Option<String>,
    pub tool_name: String,
    pub tool_args: Value,
    pub working_directory: Option<String>,
}

/// `publishToolResult(world, agentId, {tool_call_id, decision, scope,
/// toolName, toolArgs, workingDirectory})`: constructs and publishes the
/// enhanced envelope the tool handler (spec.md §4.5 item 2) reacts to.
/// `sender` identifies who resolved the HITL request (e.g. `"human"`, or a
/// timeout-default source) — the spec names the envelope shape but not the
/// publishing identity, so it is an explicit parameter here.
pub fn publish_tool_result(
    world: &World,
    sender: &str,
    agent_id: &str,
    decision: ToolResultDecision,
) -> MessageEvent {
    let inner = json!({
        "decision": decision.decision,
        "scope": decision.scope,
        "toolName": decision.tool_name,
        "toolArgs": decision.tool_args,
        "workingDirectory": decision.working_directory,
    });
    let envelope = json!({
        "__type": "tool_result",
        "tool_call_id": decision.tool_call_id,
        "agentId": agent_id,
        "content": inner.to_string(),
    });
    publish_message_with_id(world, &envelope.to_string(), sender, uuid::Uuid::new_v4().to_string(), None, None, None)
}

/// `publishSSE(world, partial)`.
pub fn publish_sse(world: &World, event: SSEEvent) {
    world.bus.emit(Event::Sse(event));
}

/// `publishToolEvent(world, partial)`.
pub fn publish_tool_event(world: &World, event: ToolEvent) {
    world.bus.emit(Event::Tool(event));
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentworld_bus::Channel;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    #[tokio::test]
    async fn publish_message_assigns_user_role_for_human_sender() {
        let world = World::new("w1", "World One");
        let event = publish_message(&world, "hi", "human", None, None, None);
        assert_eq!(event.role.as_deref(), Some("user"));
        assert_eq!(event.content, "hi");
    }

    #[tokio::test]
    async fn publish_message_assigns_assistant_role_for_agent_sender() {
        let world = World::new("w1", "World One");
        let event = publish_message(&world, "hi", "a1", None, None, None);
        assert_eq!(event.role.as_deref(), Some("assistant"));
    }

    #[tokio::test]
    async fn publish_message_prepends_target_mention_when_routed() {
        let world = World::new("w1", "World One");
        let event = publish_message(&world, "do X", "human", None, None, Some("a1"));
        assert_eq!(event.content, "@a1, do X");
    }

    #[tokio::test]
    async fn publish_message_skips_mention_prepend_when_already_mentioned() {
        let world = World::new("w1", "World One");
        let event = publish_message(&world, "@a2 do X", "human", None, None, Some("a1"));
        assert_eq!(event.content, "@a2 do X");
    }

    #[tokio::test]
    async fn publish_tool_result_wraps_enhanced_envelope_with_tool_role() {
        let world = World::new("w1", "World One");
        let seen: Arc<TokioMutex<Vec<MessageEvent>>> = Default::default();
        let seen_clone = Arc::clone(&seen);
        let _sub = world.bus.on(Channel::Message, move |event: Event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                if let Event::Message(m) = event {
                    seen.lock().await.push(m);
                }
                Ok(())
            }
        });

        let decision = ToolResultDecision {
            tool_call_id: "c1".to_string(),
            decision: "approve".to_string(),
            scope: None,
            tool_name: "shell_cmd".to_string(),
            tool_args: json!({"command": "echo"}),
            working_directory: None,
        };
        let event = publish_tool_result(&world, "human", "a1", decision);
        assert_eq!(event.role.as_deref(), Some("tool"));
        assert!(event.content.contains("\"tool_call_id\":\"c1\""));
    }
}
