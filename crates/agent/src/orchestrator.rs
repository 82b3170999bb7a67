//! C4 Orchestrator — the heart of the system (spec.md §4.4).
//!
//! Grounded on the teacher's `runtime/src/tool_loop.rs` (tool-call round
//! loop, `MAX_TOOL_ROUNDS` guard, event emission bracketing `execute`),
//! generalized from a fixed 5-round loop into the spec's hop/turn/retry
//! guardrail state machine, and `runtime/src/runtime/chat.rs` for the
//! instrumented async-fn call style. Per Design Notes §9 ("Self-recursion
//! via dynamic imports → trampoline"), [`continue_llm_after_tool_execution`]
//! is a `loop` over `(response, hopCount, retries)`, not a recursive call.

use std::collections::HashMap;
use std::sync::Arc;

use agentworld_bus::{ChatId, Event, MessageEvent, SystemEvent, ToolEvent, ToolEventType, ToolExecutionInfo};
use agentworld_llm::{ChatMessage, GenerateOpts, LlmError, LlmResponse, ToolCall, ToolCallFunction, ToolSpec as LlmToolSpec};
use agentworld_memory::{AgentMessage, ToolCallStatusEntry};
use agentworld_mention::{
    add_auto_mention, extract_mentions, paragraph_begin_mentions, remove_self_mentions, should_auto_mention,
};
use agentworld_tools::{Tool as _, ToolSpec};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::model::{Agent, ProcessingHandle, Runtime, World};
use crate::sanitize::sanitize_tool_arguments;

const MAX_HOPS: u32 = 50;
const MAX_EMPTY_TEXT_RETRIES: u32 = 2;
const MAX_EMPTY_TOOL_CALL_RETRIES: u32 = 2;
const TOOL_RESULT_PREVIEW_LIMIT: usize = 4000;

/// Result of [`should_respond`] (spec.md §4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Respond,
    Skip,
    TurnLimitReached,
}

/// `shouldRespond(world, agent, event)`. Pure: takes the handful of fields
/// it actually needs rather than `&Agent`/`&World` so it stays trivially
/// unit-testable (spec.md §8 boundary examples).
pub fn should_respond(agent_id: &str, turn_limit: u32, llm_call_count: u32, event_sender: &str, event_content: &str) -> Eligibility {
    if event_sender == agent_id {
        return Eligibility::Skip;
    }
    if event_content.contains("Turn limit reached") {
        return Eligibility::Skip;
    }
    if llm_call_count >= turn_limit {
        return Eligibility::TurnLimitReached;
    }
    if event_sender == "system" {
        return Eligibility::Skip;
    }
    if event_sender == "world" {
        return Eligibility::Respond;
    }

    let any_mentions = extract_mentions(event_content);
    let leading_mentions = paragraph_begin_mentions(event_content);
    let is_human = event_sender.eq_ignore_ascii_case("human");

    if is_human {
        if leading_mentions.is_empty() && !any_mentions.is_empty() {
            return Eligibility::Skip;
        }
        if leading_mentions.is_empty() && any_mentions.is_empty() {
            return Eligibility::Respond;
        }
        return mention_match(&leading_mentions, agent_id);
    }

    mention_match(&leading_mentions, agent_id)
}

fn mention_match(leading_mentions: &[String], agent_id: &str) -> Eligibility {
    if leading_mentions.iter().any(|m| m.eq_ignore_ascii_case(agent_id)) {
        Eligibility::Respond
    } else {
        Eligibility::Skip
    }
}

/// `"@human Turn limit reached (N LLM calls). Please take control of the
/// conversation."`, published from `agent.id`, only when a chat context
/// exists (spec.md §4.4.1 step 3).
pub async fn publish_turn_limit_message(world: &World, agent_id: &str, turn_limit: u32, chat_id: Option<&str>) {
    let Some(chat_id) = chat_id else { return };
    let content = format!("@human Turn limit reached ({turn_limit} LLM calls). Please take control of the conversation.");
    world.bus.emit(Event::Message(MessageEvent {
        content,
        sender: agent_id.to_string(),
        role: Some("assistant".to_string()),
        tool_calls: vec![],
        tool_call_id: None,
        tool_call_status: None,
        timestamp: Utc::now(),
        message_id: uuid::Uuid::new_v4().to_string(),
        chat_id: Some(chat_id.to_string()),
        reply_to_message_id: None,
    }));
}

/// Snapshots and saves an agent. `pub` so the C5 subscribers (which mutate
/// `agent.memory` directly for externally-approved tool results, spec.md
/// §4.5 item 2) persist through the same path the orchestrator itself uses,
/// rather than duplicating the JSON shape.
pub async fn persist_agent(rt: &Runtime, world_id: &str, agent_arc: &Arc<Mutex<Agent>>) {
    let snapshot = {
        let agent = agent_arc.lock().await;
        agent_to_json(&agent)
    };
    if let Err(err) = rt.storage.save_agent(world_id, &snapshot.0, snapshot.1).await {
        warn!(%err, "process_agent_message: failed to persist agent");
    }
}

fn agent_to_json(agent: &Agent) -> (String, Value) {
    let status = match agent.status {
        crate::model::AgentStatus::Active => "active",
        crate::model::AgentStatus::Inactive => "inactive",
    };
    (
        agent.id.clone(),
        serde_json::json!({
            "id": agent.id,
            "name": agent.name,
            "type": agent.agent_type,
            "provider": agent.provider,
            "model": agent.model,
            "systemPrompt": agent.system_prompt,
            "temperature": agent.temperature,
            "maxTokens": agent.max_tokens,
            "status": status,
            "autoReply": agent.auto_reply,
            "llmCallCount": agent.llm_call_count,
            "lastLLMCall": agent.last_llm_call,
            "createdAt": agent.created_at,
            "lastActive": agent.last_active,
            "memory": agent.memory,
        }),
    )
}

fn to_llm_tool_spec(spec: ToolSpec) -> LlmToolSpec {
    LlmToolSpec { name: spec.name, description: spec.description, parameters: spec.parameters }
}

#[derive(Default)]
struct LoopState {
    hop_count: u32,
    empty_text_retries: u32,
    empty_tool_call_retries: u32,
    transient_guardrail_error: Option<String>,
}

/// `processAgentMessage(world, agent, event)` — the main message-processing
/// entry point (spec.md §4.4.3).
pub async fn process_agent_message(world: &World, agent_arc: Arc<Mutex<Agent>>, rt: &Runtime, event: MessageEvent) {
    let agent_id = { agent_arc.lock().await.id.clone() };
    let chat_id = resolve_chat_id(event.chat_id.clone(), world).await;

    world.begin_activity(&agent_id).await;
    let handle = world.begin_processing(&chat_id, &agent_id).await;

    if handle.is_stopped() {
        handle.complete();
        world.end_activity(&agent_id).await;
        return;
    }

    let (system_prompt, memory_snapshot) = {
        let agent = agent_arc.lock().await;
        (agent.system_prompt.clone(), agent.memory.clone())
    };
    let messages = agentworld_prompt::prepare_messages(system_prompt.as_deref(), &memory_snapshot, &chat_id);

    {
        let mut agent = agent_arc.lock().await;
        agent.llm_call_count += 1;
        agent.last_llm_call = Some(Utc::now());
        agent.last_active = Utc::now();
    }
    persist_agent(rt, &world.id, &agent_arc).await;

    let tools: Vec<LlmToolSpec> = world.tools.list_specs().into_iter().map(to_llm_tool_spec).collect();
    let response = rt.llm.generate(&agent_id, &messages, GenerateOpts::with_tools(tools), handle.signal()).await;

    match response {
        Ok(response) => {
            let mut state = LoopState::default();
            dispatch_response(world, &agent_arc, rt, &chat_id, &event.sender, &event, response, &handle, &mut state).await;
        }
        Err(LlmError::Canceled) => {}
        Err(LlmError::Provider(message)) => emit_system_error(world, &chat_id, &message),
    }

    handle.complete();
    world.end_activity(&agent_id).await;
}

/// Entry point for the C5 tool handler (spec.md §4.5 item 2): after it has
/// written the externally-approved tool's result as a `tool` memory row
/// itself, this resumes the same continuation loop `process_agent_message`
/// falls into after running a tool internally — there is exactly one
/// continuation function, `continue_llm_after_tool_execution`, reached from
/// both entry points.
pub async fn resume_after_tool_result(
    world: &World,
    agent_arc: Arc<Mutex<Agent>>,
    rt: &Runtime,
    chat_id: &str,
    trigger_sender: &str,
) {
    let agent_id = { agent_arc.lock().await.id.clone() };
    world.begin_activity(&agent_id).await;
    let handle = world.begin_processing(chat_id, &agent_id).await;

    if !handle.is_stopped() {
        let mut state = LoopState::default();
        continue_llm_after_tool_execution(world, &agent_arc, rt, chat_id, trigger_sender, &handle, &mut state).await;
    }

    handle.complete();
    world.end_activity(&agent_id).await;
}

/// Resolves an event's `chat_id`, falling back to `world.current_chat_id`
/// and finally to a fixed default when neither is set.
async fn resolve_chat_id(event_chat_id: Option<ChatId>, world: &World) -> ChatId {
    match event_chat_id {
        Some(id) => id,
        None => world.current_chat().await.unwrap_or_else(|| "default".to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_response(
    world: &World,
    agent_arc: &Arc<Mutex<Agent>>,
    rt: &Runtime,
    chat_id: &str,
    trigger_sender: &str,
    event: &MessageEvent,
    response: LlmResponse,
    handle: &ProcessingHandle,
    state: &mut LoopState,
) {
    if response.tool_calls.is_empty() {
        if response.content.trim().is_empty() {
            warn!("process_agent_message: empty text response, no further action");
            return;
        }
        handle_text_response(world, agent_arc, rt, chat_id, trigger_sender, &response.content, Some(event.message_id.clone())).await;
        return;
    }

    match select_valid_call(&response.tool_calls) {
        Some(call) => {
            let outcome = run_tool_call(world, agent_arc, rt, chat_id, Some(event.message_id.clone()), call, handle).await;
            if matches!(outcome, ToolOutcome::Continue) {
                state.hop_count += 1;
                continue_llm_after_tool_execution(world, agent_arc, rt, chat_id, trigger_sender, handle, state).await;
            }
        }
        None => {
            if state.empty_tool_call_retries >= MAX_EMPTY_TOOL_CALL_RETRIES {
                emit_system_warning(world, chat_id, "Agent repeatedly returned invalid tool calls; stopping.");
                return;
            }
            state.empty_tool_call_retries += 1;
            write_malformed_tool_record(world, agent_arc, rt, chat_id, Some(event.message_id.clone()), None).await;
            continue_llm_after_tool_execution(world, agent_arc, rt, chat_id, trigger_sender, handle, state).await;
        }
    }
}

/// First tool call with a non-empty name (the "single-call rule" — spec.md
/// §4.4.3 step 1-2, Design Notes "single-tool-per-hop policy"). Logs a
/// warning if the model returned more than one.
fn select_valid_call(calls: &[ToolCall]) -> Option<ToolCall> {
    if calls.len() > 1 {
        warn!(count = calls.len(), "LLM returned multiple tool calls; only the first is executed");
    }
    calls.iter().find(|c| !c.function.name.is_empty()).cloned()
}

enum ToolOutcome {
    Continue,
    Stopped,
}

#[allow(clippy::too_many_arguments)]
async fn run_tool_call(
    world: &World,
    agent_arc: &Arc<Mutex<Agent>>,
    rt: &Runtime,
    chat_id: &str,
    reply_to: Option<String>,
    call: ToolCall,
    handle: &ProcessingHandle,
) -> ToolOutcome {
    let agent_id = agent_arc.lock().await.id.clone();
    let message_id = uuid::Uuid::new_v4().to_string();

    {
        let mut agent = agent_arc.lock().await;
        let mut status = HashMap::new();
        status.insert(call.id.clone(), ToolCallStatusEntry { complete: false, result: None });
        agent.memory.push(AgentMessage::Assistant {
            content: String::new(),
            sender: agent_id.clone(),
            chat_id: chat_id.to_string(),
            message_id: message_id.clone(),
            reply_to_message_id: reply_to.clone(),
            created_at: Utc::now(),
            agent_id: agent_id.clone(),
            tool_calls: vec![call.clone()],
            tool_call_status: status,
        });
    }
    persist_agent(rt, &world.id, agent_arc).await;

    world.bus.emit(Event::Message(MessageEvent {
        content: String::new(),
        sender: agent_id.clone(),
        role: Some("assistant".to_string()),
        tool_calls: vec![serde_json::to_value(&call).unwrap_or(Value::Null)],
        tool_call_id: None,
        tool_call_status: None,
        timestamp: Utc::now(),
        message_id: message_id.clone(),
        chat_id: Some(chat_id.to_string()),
        reply_to_message_id: reply_to.clone(),
    }));

    let Some(tool) = world.tools.get(&call.function.name) else {
        let content = format!("Error executing tool: Tool not found: {}", call.function.name);
        emit_tool_event(world, &agent_id, &message_id, chat_id, &call, None, ToolEventType::ToolError, None, Some(content.clone()));
        finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &call.id, &message_id, content).await;
        return ToolOutcome::Continue;
    };

    let args = match sanitize_tool_arguments_value(&call.function.arguments) {
        Some(v) => v,
        None => {
            let content = format!("Error executing tool: malformed arguments for {}", call.function.name);
            emit_tool_event(world, &agent_id, &message_id, chat_id, &call, None, ToolEventType::ToolError, None, Some(content.clone()));
            finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &call.id, &message_id, content).await;
            return ToolOutcome::Continue;
        }
    };

    emit_tool_event(world, &agent_id, &message_id, chat_id, &call, Some(args.clone()), ToolEventType::ToolStart, None, None);

    if handle.is_stopped() {
        let content = "canceled by user".to_string();
        emit_tool_event(world, &agent_id, &message_id, chat_id, &call, Some(args), ToolEventType::ToolError, None, Some(content.clone()));
        finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &call.id, &message_id, content).await;
        return ToolOutcome::Stopped;
    }

    let output = tool.run(args.clone()).await;

    if handle.is_stopped() {
        let content = "canceled by user".to_string();
        emit_tool_event(world, &agent_id, &message_id, chat_id, &call, Some(args), ToolEventType::ToolError, None, Some(content.clone()));
        finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &call.id, &message_id, content).await;
        return ToolOutcome::Stopped;
    }

    let preview = truncate_preview(&output.content, TOOL_RESULT_PREVIEW_LIMIT);
    let kind = if output.success { ToolEventType::ToolResult } else { ToolEventType::ToolError };
    let error = if output.success { None } else { Some(output.content.clone()) };
    emit_tool_event(world, &agent_id, &message_id, chat_id, &call, Some(args), kind, Some(Value::String(preview)), error);

    let content = if output.success { output.content } else { format!("Error executing tool: {}", output.content) };
    finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &call.id, &message_id, content).await;
    ToolOutcome::Continue
}

fn truncate_preview(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        content.to_string()
    } else {
        content.chars().take(limit).collect()
    }
}

fn sanitize_tool_arguments_value(arguments: &Value) -> Option<Value> {
    match arguments {
        Value::String(s) => sanitize_tool_arguments(s),
        Value::Object(_) => Some(arguments.clone()),
        Value::Null => Some(Value::Object(Default::default())),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_tool_event(
    world: &World,
    agent_id: &str,
    message_id: &str,
    chat_id: &str,
    call: &ToolCall,
    input: Option<Value>,
    kind: ToolEventType,
    result: Option<Value>,
    error: Option<String>,
) {
    world.bus.emit(Event::Tool(ToolEvent {
        agent_name: agent_id.to_string(),
        kind,
        message_id: message_id.to_string(),
        chat_id: Some(chat_id.to_string()),
        tool_execution: ToolExecutionInfo {
            tool_name: call.function.name.clone(),
            tool_call_id: call.id.clone(),
            input,
            result_size: result.as_ref().map(|r| r.to_string().len()),
            result,
            error,
        },
    }));
}

/// Marks `tool_call_id`'s status complete on the matching assistant record,
/// then appends the `tool` memory record referencing it by id (spec.md §3
/// invariant 1 and invariant 3).
async fn finish_tool_call(
    world: &World,
    agent_arc: &Arc<Mutex<Agent>>,
    rt: &Runtime,
    chat_id: &str,
    agent_id: &str,
    tool_call_id: &str,
    assistant_message_id: &str,
    content: String,
) {
    {
        let mut agent = agent_arc.lock().await;
        for row in agent.memory.iter_mut() {
            if let AgentMessage::Assistant { message_id, tool_call_status, .. } = row {
                if message_id == assistant_message_id {
                    if let Some(entry) = tool_call_status.get_mut(tool_call_id) {
                        entry.complete = true;
                        entry.result = Some(Value::String(content.clone()));
                    }
                }
            }
        }
        agentworld_memory::save_tool(
            &mut agent.memory,
            agent_id,
            content,
            tool_call_id.to_string(),
            chat_id.to_string(),
            Some(assistant_message_id.to_string()),
        );
    }
    persist_agent(rt, &world.id, agent_arc).await;
}

/// `/^calling\s+tool\s*:\s*(\w+)\s*(\{[\s\S]*\})?$/i` — spec.md §4.4.4
/// "plain-text tool-intent fallback".
static TOOL_INTENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^calling\s+tool\s*:\s*(\w+)\s*(\{[\s\S]*\})?$").unwrap());

fn parse_tool_intent_fallback(text: &str) -> Option<ToolCall> {
    let caps = TOOL_INTENT_RE.captures(text.trim())?;
    let name = caps.get(1)?.as_str().to_string();
    let arguments = match caps.get(2) {
        Some(m) => sanitize_tool_arguments(m.as_str()).unwrap_or(Value::Object(Default::default())),
        None => Value::Object(Default::default()),
    };
    Some(ToolCall { id: uuid::Uuid::new_v4().to_string(), r#type: "function".to_string(), function: ToolCallFunction { name, arguments } })
}

/// `continueLLMAfterToolExecution` (spec.md §4.4.4). A `loop`, not a
/// recursive call, per Design Notes' trampoline guidance.
async fn continue_llm_after_tool_execution(world: &World, agent_arc: &Arc<Mutex<Agent>>, rt: &Runtime, chat_id: &str, trigger_sender: &str, handle: &ProcessingHandle, state: &mut LoopState) {
    loop {
        if handle.is_stopped() {
            return;
        }

        if state.hop_count > MAX_HOPS {
            let message = format!("System error: tool continuation exceeded {MAX_HOPS} hops, resetting");
            emit_system_error(world, chat_id, &message);
            state.transient_guardrail_error = Some(message);
            state.hop_count = 0;
        }

        let (system_prompt, memory_snapshot, agent_id) = {
            let agent = agent_arc.lock().await;
            (agent.system_prompt.clone(), agent.memory.clone(), agent.id.clone())
        };
        let mut messages = agentworld_prompt::prepare_messages(system_prompt.as_deref(), &memory_snapshot, chat_id);
        if let Some(err) = state.transient_guardrail_error.take() {
            messages.push(ChatMessage::user(err));
        }

        {
            let mut agent = agent_arc.lock().await;
            agent.llm_call_count += 1;
            agent.last_llm_call = Some(Utc::now());
        }
        persist_agent(rt, &world.id, agent_arc).await;

        let tools: Vec<LlmToolSpec> = world.tools.list_specs().into_iter().map(to_llm_tool_spec).collect();
        let response = rt.llm.generate(&agent_id, &messages, GenerateOpts::with_tools(tools), handle.signal()).await;

        let mut response = match response {
            Ok(response) => response,
            Err(LlmError::Canceled) => return,
            Err(LlmError::Provider(message)) => {
                emit_system_error(world, chat_id, &message);
                return;
            }
        };

        if response.tool_calls.is_empty() {
            if let Some(call) = parse_tool_intent_fallback(&response.content) {
                response.tool_calls = vec![call];
            }
        }

        if !response.tool_calls.is_empty() {
            match select_valid_call(&response.tool_calls) {
                Some(call) => {
                    state.empty_tool_call_retries = 0;
                    let outcome = run_tool_call(world, agent_arc, rt, chat_id, None, call, handle).await;
                    match outcome {
                        ToolOutcome::Continue => {
                            state.hop_count += 1;
                            continue;
                        }
                        ToolOutcome::Stopped => return,
                    }
                }
                None => {
                    if state.empty_tool_call_retries >= MAX_EMPTY_TOOL_CALL_RETRIES {
                        emit_system_warning(world, chat_id, "Agent repeatedly returned invalid tool calls; stopping.");
                        return;
                    }
                    state.empty_tool_call_retries += 1;
                    write_malformed_tool_record(world, agent_arc, rt, chat_id, None, None).await;
                    continue;
                }
            }
        } else if response.content.trim().is_empty() {
            if state.empty_text_retries >= MAX_EMPTY_TEXT_RETRIES {
                emit_system_warning(world, chat_id, "Agent repeatedly returned empty responses; stopping.");
                return;
            }
            state.empty_text_retries += 1;
            continue;
        } else {
            handle_text_response(world, agent_arc, rt, chat_id, trigger_sender, &response.content, None).await;
            return;
        }
    }
}

/// `handleTextResponse` (spec.md §4.4.5). `reply_to` is `event.messageId`
/// from the triggering event on the initial dispatch path, `None` from a
/// tool-continuation path (there is no single triggering event to cite).
/// `trigger_sender` is the sender of the event that started this pipeline —
/// threaded through from `process_agent_message` rather than re-derived, so
/// `should_auto_mention`'s human/self exemptions see the real sender even
/// several tool hops later.
#[allow(clippy::too_many_arguments)]
async fn handle_text_response(world: &World, agent_arc: &Arc<Mutex<Agent>>, rt: &Runtime, chat_id: &str, trigger_sender: &str, text: &str, reply_to: Option<String>) {
    let (agent_id, auto_reply) = {
        let agent = agent_arc.lock().await;
        (agent.id.clone(), agent.auto_reply)
    };
    let sanitized = remove_self_mentions(text, &agent_id);
    let final_text = if auto_reply && should_auto_mention(&sanitized, trigger_sender, &agent_id) {
        add_auto_mention(&sanitized, trigger_sender)
    } else {
        sanitized
    };

    let message_id = uuid::Uuid::new_v4().to_string();
    {
        let mut agent = agent_arc.lock().await;
        agentworld_memory::save_assistant(&mut agent.memory, &agent_id, final_text.clone(), message_id.clone(), chat_id.to_string(), reply_to.clone(), vec![]);
        agent.last_active = Utc::now();
    }
    persist_agent(rt, &world.id, agent_arc).await;

    world.bus.emit(Event::Message(MessageEvent {
        content: final_text,
        sender: agent_id,
        role: Some("assistant".to_string()),
        tool_calls: vec![],
        tool_call_id: None,
        tool_call_status: None,
        timestamp: Utc::now(),
        message_id,
        chat_id: Some(chat_id.to_string()),
        reply_to_message_id: reply_to,
    }));
}

/// `malformed-tool recovery` (spec.md §4.4.6): a synthetic assistant
/// tool-call (name `__invalid_tool_call__`, or the model's bad name if one
/// was present) followed by a matching `tool` error, preserving the
/// invariant that every persisted `tool_call` has a matching `tool` message
/// even when the model misbehaves.
async fn write_malformed_tool_record(world: &World, agent_arc: &Arc<Mutex<Agent>>, rt: &Runtime, chat_id: &str, reply_to: Option<String>, bad_name: Option<&str>) {
    let agent_id = agent_arc.lock().await.id.clone();
    let tool_call_id = format!("invalid-{}", uuid::Uuid::new_v4());
    let message_id = uuid::Uuid::new_v4().to_string();
    let name = bad_name.filter(|n| !n.is_empty()).unwrap_or("__invalid_tool_call__").to_string();
    let synthetic_call = ToolCall { id: tool_call_id.clone(), r#type: "function".to_string(), function: ToolCallFunction { name: name.clone(), arguments: Value::Null } };

    {
        let mut agent = agent_arc.lock().await;
        let mut status = HashMap::new();
        status.insert(tool_call_id.clone(), ToolCallStatusEntry { complete: false, result: None });
        agent.memory.push(AgentMessage::Assistant {
            content: String::new(),
            sender: agent_id.clone(),
            chat_id: chat_id.to_string(),
            message_id: message_id.clone(),
            reply_to_message_id: reply_to,
            created_at: Utc::now(),
            agent_id: agent_id.clone(),
            tool_calls: vec![synthetic_call],
            tool_call_status: status,
        });
    }

    let content = "Error executing tool: invalid tool call (missing or unknown tool name)".to_string();
    world.bus.emit(Event::Tool(ToolEvent {
        agent_name: agent_id.clone(),
        kind: ToolEventType::ToolError,
        message_id: message_id.clone(),
        chat_id: Some(chat_id.to_string()),
        tool_execution: ToolExecutionInfo { tool_name: name, tool_call_id: tool_call_id.clone(), input: None, result: None, error: Some(content.clone()), result_size: None },
    }));
    finish_tool_call(world, agent_arc, rt, chat_id, &agent_id, &tool_call_id, &message_id, content).await;
}

fn emit_system_error(world: &World, chat_id: &str, message: &str) {
    world.bus.emit(Event::System(SystemEvent {
        content: format!("[Error] {message}"),
        timestamp: Utc::now(),
        message_id: uuid::Uuid::new_v4().to_string(),
        chat_id: Some(chat_id.to_string()),
        event_type: None,
        extra: None,
    }));
}

fn emit_system_warning(world: &World, chat_id: &str, message: &str) {
    world.bus.emit(Event::System(SystemEvent {
        content: message.to_string(),
        timestamp: Utc::now(),
        message_id: uuid::Uuid::new_v4().to_string(),
        chat_id: Some(chat_id.to_string()),
        event_type: Some("warning".to_string()),
        extra: None,
    }));
}
