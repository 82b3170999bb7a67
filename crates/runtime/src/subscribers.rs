//! The two per-agent bus subscriptions (spec.md §4.5 "Subscribers (C5)").
//!
//! Grounded on the teacher's `runtime/src/runtime/mod.rs` daemon-wiring
//! style (one function per subscription, explicit `Unsubscribe` handles
//! returned to the caller) adapted from a single-bot daemon loop to a
//! per-agent binding over [`agentworld_agent::World`]'s bus.

use std::collections::HashSet;
use std::sync::Arc;

use agentworld_agent::{persist_agent, process_agent_message, resume_after_tool_result, should_respond, Eligibility, Runtime, World};
use agentworld_bus::{Channel, Event, MessageEvent, Unsubscribe};
use agentworld_memory::{reset_llm_call_count_if_needed, save_incoming_message, save_tool, AgentMessage, IncomingEvent};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

/// Both subscriptions for one agent. Dropping (or canceling) either member
/// stops that half of the binding independently; the bus itself keeps
/// running regardless (matches `Bus::on`'s own contract).
pub struct AgentBinding {
    pub message: Unsubscribe,
    pub tool: Unsubscribe,
}

/// Attaches the message handler and the tool handler for `agent_id` to
/// `world`'s bus (spec.md §4.5: "a dedicated tool handler exists in
/// addition to the general message handler, both attached per agent").
pub fn bind_agent(world: Arc<World>, rt: Arc<Runtime>, agent_id: impl Into<String>) -> AgentBinding {
    let agent_id = agent_id.into();
    let pending_approvals = Arc::new(TokioMutex::new(HashSet::new()));
    AgentBinding {
        message: bind_message_handler(Arc::clone(&world), Arc::clone(&rt), agent_id.clone(), pending_approvals),
        tool: bind_tool_handler(world, rt, agent_id),
    }
}

fn bind_message_handler(
    world: Arc<World>,
    rt: Arc<Runtime>,
    agent_id: String,
    pending_approvals: Arc<TokioMutex<HashSet<String>>>,
) -> Unsubscribe {
    world.clone().bus.on(Channel::Message, move |event: Event| {
        let world = Arc::clone(&world);
        let rt = Arc::clone(&rt);
        let agent_id = agent_id.clone();
        let pending_approvals = Arc::clone(&pending_approvals);
        async move {
            if let Event::Message(msg) = event {
                handle_message_event(&world, &rt, &agent_id, &pending_approvals, msg).await;
            }
            Ok(())
        }
    })
}

/// On `message`: record assistant-tool-call announcements (deduplicated by
/// `messageId`, for HITL/observability surfaces outside this core's scope),
/// skip `tool`-role messages (delegated to the tool handler), skip
/// self-messages, `resetLLMCallCount`, `shouldRespond`, and on eligibility
/// call `saveIncomingMessage` + `processAgentMessage`.
async fn handle_message_event(
    world: &World,
    rt: &Runtime,
    agent_id: &str,
    pending_approvals: &TokioMutex<HashSet<String>>,
    event: MessageEvent,
) {
    if event.role.as_deref() == Some("tool") {
        return;
    }

    if !event.tool_calls.is_empty() {
        let mut seen = pending_approvals.lock().await;
        seen.insert(event.message_id.clone());
    }

    if event.sender == agent_id {
        return;
    }

    let Some(agent_arc) = world.agent_handle(agent_id).await else {
        return;
    };

    let reset = {
        let mut agent = agent_arc.lock().await;
        reset_llm_call_count_if_needed(&event.sender, &mut agent.llm_call_count)
    };
    if reset {
        persist_agent(rt, &world.id, &agent_arc).await;
    }

    let (turn_limit, llm_call_count) = {
        let agent = agent_arc.lock().await;
        (world.turn_limit, agent.llm_call_count)
    };

    match should_respond(agent_id, turn_limit, llm_call_count, &event.sender, &event.content) {
        Eligibility::Skip => {}
        Eligibility::TurnLimitReached => {
            agentworld_agent::publish_turn_limit_message(world, agent_id, turn_limit, event.chat_id.as_deref()).await;
        }
        Eligibility::Respond => {
            let current_chat_id = world.current_chat().await;
            let incoming = IncomingEvent {
                sender: event.sender.clone(),
                content: event.content.clone(),
                chat_id: event.chat_id.clone(),
                message_id: event.message_id.clone(),
                reply_to_message_id: event.reply_to_message_id.clone(),
            };
            let saved = {
                let mut agent = agent_arc.lock().await;
                save_incoming_message(&mut agent.memory, agent_id, current_chat_id.as_deref(), &incoming)
            };
            if saved.is_some() {
                persist_agent(rt, &world.id, &agent_arc).await;
                process_agent_message(world, agent_arc, rt, event).await;
            }
        }
    }
}

fn bind_tool_handler(world: Arc<World>, rt: Arc<Runtime>, agent_id: String) -> Unsubscribe {
    world.clone().bus.on(Channel::Message, move |event: Event| {
        let world = Arc::clone(&world);
        let rt = Arc::clone(&rt);
        let agent_id = agent_id.clone();
        async move {
            if let Event::Message(msg) = event {
                handle_tool_result_event(&world, &rt, &agent_id, msg).await;
            }
            Ok(())
        }
    })
}

struct ToolResultEnvelope {
    tool_call_id: String,
    decision: String,
    tool_name: String,
    tool_args: Value,
}

/// Unwraps the `{"tool_call_id", "content": "{…decision JSON…}"}` envelope
/// `publishToolResult` builds (spec.md §6). `None` for anything that isn't
/// the enhanced shape — a plain conversational message, most of the time.
fn parse_tool_result_envelope(content: &str) -> Option<ToolResultEnvelope> {
    let Value::Object(outer) = serde_json::from_str::<Value>(content).ok()? else {
        return None;
    };
    let tool_call_id = match outer.get("tool_call_id") {
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };
    let inner_raw = match outer.get("content") {
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };
    let Value::Object(inner) = serde_json::from_str::<Value>(&inner_raw).ok()? else {
        return None;
    };
    let decision = match inner.get("decision") {
        Some(Value::String(s)) => s.clone(),
        _ => "reject".to_string(),
    };
    let tool_name = match inner.get("toolName") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let tool_args = inner.get("toolArgs").cloned().unwrap_or(Value::Null);
    Some(ToolResultEnvelope { tool_call_id, decision, tool_name, tool_args })
}

/// On `message` events whose parsed role is `tool` (spec.md §4.5 item 2).
async fn handle_tool_result_event(world: &World, rt: &Runtime, agent_id: &str, event: MessageEvent) {
    if event.role.as_deref() != Some("tool") {
        return;
    }
    let Some(envelope) = parse_tool_result_envelope(&event.content) else {
        return;
    };
    let Some(agent_arc) = world.agent_handle(agent_id).await else {
        return;
    };

    let known = {
        let agent = agent_arc.lock().await;
        agent.memory.iter().any(|row| {
            matches!(row, AgentMessage::Assistant { tool_calls, .. } if tool_calls.iter().any(|c| c.id == envelope.tool_call_id))
        })
    };
    if !known {
        warn!(agent_id, tool_call_id = %envelope.tool_call_id, "tool handler: rejecting unknown tool_call_id");
        return;
    }

    let chat_id = event.chat_id.clone().unwrap_or_else(|| "default".to_string());

    let content = if envelope.decision == "approve" && envelope.tool_name == "shell_cmd" {
        match world.tools.get(&envelope.tool_name) {
            Some(tool) => {
                let output = tool.run(envelope.tool_args.clone()).await;
                if output.success {
                    output.content
                } else {
                    format!("Error executing tool: {}", output.content)
                }
            }
            None => format!("Error executing tool: Tool not found: {}", envelope.tool_name),
        }
    } else if envelope.decision == "approve" {
        format!("Tool call approved but {} is not an executable built-in tool", envelope.tool_name)
    } else {
        format!("Tool call rejected (decision: {})", envelope.decision)
    };

    {
        let mut agent = agent_arc.lock().await;
        for row in agent.memory.iter_mut() {
            if let AgentMessage::Assistant { tool_call_status, .. } = row {
                if let Some(entry) = tool_call_status.get_mut(&envelope.tool_call_id) {
                    entry.complete = true;
                    entry.result = Some(Value::String(content.clone()));
                }
            }
        }
        save_tool(&mut agent.memory, agent_id, content, envelope.tool_call_id.clone(), chat_id.clone(), Some(event.message_id.clone()));
    }
    persist_agent(rt, &world.id, &agent_arc).await;

    resume_after_tool_result(world, agent_arc, rt, &chat_id, &event.sender).await;
}

/// World activity listener (spec.md §4.5 "World activity listener"): on
/// `world` events of kind `idle` with `pendingOperations == 0`, generates a
/// chat title for the current chat if it still has its default name, and
/// emits `chat-title-updated`. Runs at most once per `Idle` event by
/// construction — there is exactly one delivery per transition to `end_activity`'s
/// "reaches zero" branch.
pub fn bind_world_activity_listener(world: Arc<World>, rt: Arc<Runtime>) -> Unsubscribe {
    world.clone().bus.on(Channel::World, move |event: Event| {
        let world = Arc::clone(&world);
        let rt = Arc::clone(&rt);
        async move {
            if let Event::Activity(activity) = event {
                if activity.kind == agentworld_bus::ActivityType::Idle && activity.pending_operations == 0 {
                    maybe_generate_chat_title(&world, &rt).await;
                }
            }
            Ok(())
        }
    })
}

async fn maybe_generate_chat_title(world: &World, rt: &Runtime) {
    let Some(chat_id) = world.current_chat().await else {
        return;
    };
    let is_new_chat = {
        let chats = world.chats.read().await;
        chats.get(&chat_id).map(|c| c.name == "New Chat").unwrap_or(false)
    };
    if !is_new_chat {
        return;
    }

    let title = agentworld_prompt::generate_chat_title(
        rt.storage.as_ref(),
        rt.llm.as_ref(),
        &world.id,
        &chat_id,
        None,
        agentworld_llm::CancelSignal::new(),
    )
    .await;
    if title.is_empty() {
        return;
    }

    {
        let mut chats = world.chats.write().await;
        if let Some(chat) = chats.get_mut(&chat_id) {
            chat.name = title.clone();
            chat.updated_at = chrono::Utc::now();
        }
    }
    if let Err(err) = rt.storage.update_chat_data(&world.id, &chat_id, serde_json::json!({"name": title})).await {
        warn!(%err, "world activity listener: failed to persist updated chat title");
    }

    world.bus.emit(Event::System(agentworld_bus::SystemEvent {
        content: "chat-title-updated".to_string(),
        timestamp: chrono::Utc::now(),
        message_id: uuid::Uuid::new_v4().to_string(),
        chat_id: Some(chat_id),
        event_type: Some("chat-title-updated".to_string()),
        extra: None,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentworld_agent::Agent;
    use agentworld_llm::{LlmResponse, ScriptedLlmClient, ToolCall, ToolCallFunction};
    use agentworld_memory::InMemoryStorage;
    use agentworld_tools::{Tool, ToolOutput, ToolSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec { name: "shell_cmd".to_string(), description: "echo".to_string(), parameters: json!({}) }
        }
        async fn run(&self, args: Value) -> ToolOutput {
            ToolOutput::ok(args.to_string())
        }
    }

    fn rt(llm: ScriptedLlmClient) -> Runtime {
        Runtime::new(Arc::new(InMemoryStorage::new()), Arc::new(llm))
    }

    fn base_event(sender: &str, content: &str) -> MessageEvent {
        MessageEvent {
            content: content.to_string(),
            sender: sender.to_string(),
            role: None,
            tool_calls: vec![],
            tool_call_id: None,
            tool_call_status: None,
            timestamp: chrono::Utc::now(),
            message_id: uuid::Uuid::new_v4().to_string(),
            chat_id: Some("c1".to_string()),
            reply_to_message_id: None,
        }
    }

    #[tokio::test]
    async fn human_broadcast_drives_agent_through_full_pipeline() {
        let world = World::new("w1", "World One");
        world.add_agent(Agent::new("a1", "Alpha", "assistant", "openai", "gpt")).await;
        let world = Arc::new(world);
        let runtime = Arc::new(rt(ScriptedLlmClient::new(vec![LlmResponse::text("hi there")])));
        let _binding = bind_agent(Arc::clone(&world), Arc::clone(&runtime), "a1");

        world.bus.emit(Event::Message(base_event("human", "hello everyone")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agent_arc = world.agent_handle("a1").await.unwrap();
        let agent = agent_arc.lock().await;
        assert!(agent.memory.iter().any(|m| m.is_assistant() && m.content() == "hi there"));
    }

    #[tokio::test]
    async fn self_sent_message_is_ignored() {
        let world = World::new("w1", "World One");
        world.add_agent(Agent::new("a1", "Alpha", "assistant", "openai", "gpt")).await;
        let world = Arc::new(world);
        let runtime = Arc::new(rt(ScriptedLlmClient::new(vec![])));
        let _binding = bind_agent(Arc::clone(&world), Arc::clone(&runtime), "a1");

        world.bus.emit(Event::Message(base_event("a1", "echo of my own message")));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let agent_arc = world.agent_handle("a1").await.unwrap();
        assert!(agent_arc.lock().await.memory.is_empty());
    }

    #[tokio::test]
    async fn tool_handler_executes_approved_shell_cmd_and_resumes() {
        let mut world = World::new("w1", "World One");
        world.tools.register(Box::new(EchoTool));
        let mut agent = Agent::new("a1", "Alpha", "assistant", "openai", "gpt");
        agent.memory.push(agentworld_memory::AgentMessage::Assistant {
            content: String::new(),
            sender: "a1".to_string(),
            chat_id: "c1".to_string(),
            message_id: "m1".to_string(),
            reply_to_message_id: None,
            created_at: chrono::Utc::now(),
            agent_id: "a1".to_string(),
            tool_calls: vec![ToolCall {
                id: "tc-1".to_string(),
                r#type: "function".to_string(),
                function: ToolCallFunction { name: "shell_cmd".to_string(), arguments: json!({"command": "echo"}) },
            }],
            tool_call_status: Default::default(),
        });
        world.add_agent(agent).await;
        let world = Arc::new(world);
        let runtime = Arc::new(rt(ScriptedLlmClient::new(vec![LlmResponse::text("done")])));
        let _binding = bind_agent(Arc::clone(&world), Arc::clone(&runtime), "a1");

        let envelope = json!({
            "__type": "tool_result",
            "tool_call_id": "tc-1",
            "agentId": "a1",
            "content": json!({"decision": "approve", "toolName": "shell_cmd", "toolArgs": {"command": "echo"}}).to_string(),
        });
        let mut event = base_event("human", &envelope.to_string());
        event.role = Some("tool".to_string());
        world.bus.emit(Event::Message(event));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agent_arc = world.agent_handle("a1").await.unwrap();
        let agent = agent_arc.lock().await;
        assert!(matches!(agent.memory[1], agentworld_memory::AgentMessage::Tool { .. }));
        assert!(agent.memory.iter().any(|m| m.is_assistant() && m.content() == "done"));
    }

    #[tokio::test]
    async fn idle_with_new_chat_triggers_title_generation() {
        let world = World::new("w1", "World One");
        world.chats.write().await.insert("c1".to_string(), agentworld_agent::ChatMeta::new_chat("c1"));
        *world.current_chat_id.write().await = Some("c1".to_string());
        let world = Arc::new(world);

        let storage = InMemoryStorage::new();
        storage
            .append_memory_row(
                "w1",
                agentworld_memory::AgentMessage::User {
                    content: "Let's talk about quarterly planning".to_string(),
                    sender: "human".to_string(),
                    chat_id: "c1".to_string(),
                    message_id: "m0".to_string(),
                    reply_to_message_id: None,
                    created_at: chrono::Utc::now(),
                    agent_id: "a1".to_string(),
                },
            )
            .await
            .unwrap();
        let runtime = Arc::new(Runtime::new(Arc::new(storage), Arc::new(ScriptedLlmClient::new(vec![LlmResponse::text("Quarterly Planning")]))));
        let _listener = bind_world_activity_listener(Arc::clone(&world), Arc::clone(&runtime));

        world.begin_activity("human").await;
        world.end_activity("human").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let chats = world.chats.read().await;
        assert_eq!(chats.get("c1").unwrap().name, "Quarterly Planning");
    }

    #[tokio::test]
    async fn idle_leaves_already_named_chat_untouched() {
        let world = World::new("w1", "World One");
        let mut chat = agentworld_agent::ChatMeta::new_chat("c1");
        chat.name = "Renamed Already".to_string();
        world.chats.write().await.insert("c1".to_string(), chat);
        *world.current_chat_id.write().await = Some("c1".to_string());
        let world = Arc::new(world);
        let runtime = Arc::new(rt(ScriptedLlmClient::new(vec![LlmResponse::text("Should Not Be Used")])));
        let _listener = bind_world_activity_listener(Arc::clone(&world), Arc::clone(&runtime));

        world.begin_activity("human").await;
        world.end_activity("human").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let chats = world.chats.read().await;
        assert_eq!(chats.get("c1").unwrap().name, "Renamed Already");
    }
}
