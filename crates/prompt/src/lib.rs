//! LLM context preparation (spec.md §4.4.2) and chat title generation
//! (spec.md §4.3 "Chat title generation").
//!
//! Grounded on the teacher's `runtime/src/prompt_builder.rs` (centralized
//! prompt-assembly module, `truncate_for_prompt` helper) and
//! `runtime/src/runtime/chat.rs` (context-block assembly call site), adapted
//! from the teacher's single-agent companion prompt to the spec's much
//! narrower `system + chat-filtered memory` contract — there is no
//! relational/belief/identity block here, since SPEC_FULL.md's orchestrator
//! has no counterpart to the teacher's companion-memory features.

use agentworld_llm::{CancelSignal, ChatMessage, ChatRole, GenerateOpts, LlmClient, LlmError};
use agentworld_memory::{AgentMessage, Storage};
use tracing::{debug, warn};

/// `prepareMessages(world, agent, chatId)`: `[system(agent.systemPrompt),
/// …memoryRowsWhere(chatId)]`. Memory from other chats is excluded; `system`
/// rows are skipped entirely (spec.md §3 Agent.memory: "ignored by
/// LLM-context preparation beyond `agent.systemPrompt`").
pub fn prepare_messages(system_prompt: Option<&str>, memory: &[AgentMessage], chat_id: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(prompt) = system_prompt {
        messages.push(ChatMessage::system(prompt));
    }
    for row in memory {
        if row.chat_id() != Some(chat_id) {
            continue;
        }
        match row {
            AgentMessage::User { content, .. } => messages.push(ChatMessage::user(content.clone())),
            AgentMessage::Assistant { content, tool_calls, .. } => {
                if tool_calls.is_empty() {
                    messages.push(ChatMessage::assistant(content.clone()));
                } else {
                    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
                }
            }
            AgentMessage::Tool { content, tool_call_id, .. } => {
                messages.push(ChatMessage::tool_result(tool_call_id.clone(), content.clone()))
            }
            AgentMessage::System { .. } => {}
        }
    }
    messages
}

const TITLE_INSTRUCTION: &str =
    "You turn conversations into concise titles (3-6 words). Respond with the title only.";
const TITLE_TOKEN_BUDGET: usize = 20;
const MAX_TURN_CLIP: usize = 240;
const MAX_TURNS: usize = 24;
const MAX_TITLE_LEN: usize = 100;

const LOW_QUALITY_TITLES: &[&str] = &[
    "chat",
    "new chat",
    "conversation",
    "untitled",
    "title",
    "assistant chat",
    "user chat",
    "chat title",
];

/// Step 2: keep only user/assistant rows, dedupe consecutive-identical
/// content, clip each to `MAX_TURN_CLIP` chars, cap to the last `MAX_TURNS`.
fn build_prompt_window(memory: &[AgentMessage], seed_content: Option<&str>) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = Vec::new();
    for row in memory {
        match row {
            AgentMessage::User { content, .. } => turns.push(ChatMessage::user(clip(content))),
            AgentMessage::Assistant { content, .. } if !content.is_empty() => {
                turns.push(ChatMessage::assistant(clip(content)))
            }
            _ => {}
        }
    }
    if let Some(seed) = seed_content {
        turns.push(ChatMessage::user(clip(seed)));
    }

    turns.dedup_by(|a, b| a.content == b.content && a.role == b.role);

    let start = turns.len().saturating_sub(MAX_TURNS);
    turns.split_off(start)
}

fn clip(content: &str) -> String {
    if content.chars().count() <= MAX_TURN_CLIP {
        content.to_string()
    } else {
        content.chars().take(MAX_TURN_CLIP).collect()
    }
}

/// Step 4: strip leading `#`, list markers, `title:` prefix, outer quotes;
/// collapse whitespace; trim trailing punctuation.
fn sanitize_title(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in ["# ", "- ", "* ", "1. "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
        }
    }
    let lower = s.to_lowercase();
    if let Some(idx) = lower.find("title:") {
        if idx == 0 {
            s = s[6..].trim();
        }
    }
    let s = s.trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim();
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| ".,;:!?".contains(c))
        .to_string()
}

/// Step 5: empty, too-short, or a known generic placeholder.
fn is_low_quality(title: &str) -> bool {
    let trimmed = title.trim();
    if trimmed.chars().count() < 3 {
        return true;
    }
    LOW_QUALITY_TITLES.contains(&trimmed.to_lowercase().as_str())
}

/// Step 6: cap to `MAX_TITLE_LEN` chars with an ellipsis.
fn cap_length(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LEN {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(MAX_TITLE_LEN.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}

/// First non-low-quality user message in `memory`, clipped and capped —
/// the fallback title when the LLM's output is itself low-quality.
fn fallback_title(memory: &[AgentMessage], seed_content: Option<&str>) -> String {
    let candidates = memory.iter().filter_map(|row| match row {
        AgentMessage::User { content, .. } => Some(content.as_str()),
        _ => None,
    });
    for candidate in candidates.chain(seed_content) {
        let sanitized = sanitize_title(candidate);
        if !is_low_quality(&sanitized) {
            return cap_length(&sanitized);
        }
    }
    "Chat Session".to_string()
}

/// `generateChatTitle(world, seedContent?, chatId)` (spec.md §4.3).
///
/// Returns the empty string when the LLM call was canceled (spec.md: "the
/// caller treats as 'no change'") — never a `Result` error, since a failed
/// title generation is not a user-visible failure per §7.
pub async fn generate_chat_title(
    storage: &dyn Storage,
    llm: &dyn LlmClient,
    world_id: &str,
    chat_id: &str,
    seed_content: Option<&str>,
    cancel: CancelSignal,
) -> String {
    let memory = match storage.get_memory(world_id, chat_id).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(%err, "generate_chat_title: failed to load memory, skipping");
            return String::new();
        }
    };

    let window = build_prompt_window(&memory, seed_content);
    if window.is_empty() {
        return fallback_title(&memory, seed_content);
    }

    let mut messages = vec![ChatMessage::system(TITLE_INSTRUCTION)];
    messages.extend(window);

    let opts = GenerateOpts { tools: vec![], stream: None };
    debug!(chat_id, tokens = TITLE_TOKEN_BUDGET, "generate_chat_title: calling LLM");
    let response = match llm.generate("title-generator", &messages, opts, cancel.clone()).await {
        Ok(response) => response,
        Err(LlmError::Canceled) => return String::new(),
        Err(err) => {
            warn!(%err, "generate_chat_title: LLM call failed, falling back");
            return fallback_title(&memory, seed_content);
        }
    };
    if cancel.is_canceled() {
        return String::new();
    }

    let sanitized = sanitize_title(&response.content);
    if is_low_quality(&sanitized) {
        return fallback_title(&memory, seed_content);
    }
    cap_length(&sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentworld_llm::{LlmResponse, ScriptedLlmClient};
    use agentworld_memory::InMemoryStorage;
    use chrono::Utc;

    fn user_row(content: &str, chat_id: &str) -> AgentMessage {
        AgentMessage::User {
            content: content.to_string(),
            sender: "human".to_string(),
            chat_id: chat_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            reply_to_message_id: None,
            created_at: Utc::now(),
            agent_id: "a1".to_string(),
        }
    }

    fn assistant_row(content: &str, chat_id: &str) -> AgentMessage {
        AgentMessage::Assistant {
            content: content.to_string(),
            sender: "a1".to_string(),
            chat_id: chat_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            reply_to_message_id: None,
            created_at: Utc::now(),
            agent_id: "a1".to_string(),
            tool_calls: vec![],
            tool_call_status: Default::default(),
        }
    }

    #[test]
    fn prepare_messages_filters_by_chat_id_and_includes_system_prompt() {
        let memory = vec![user_row("hi", "c1"), user_row("other chat", "c2")];
        let messages = prepare_messages(Some("be helpful"), &memory, "c1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].content.as_deref(), Some("hi"));
    }

    #[test]
    fn prepare_messages_preserves_tool_call_id_on_tool_rows() {
        let memory = vec![AgentMessage::Tool {
            content: "42".to_string(),
            tool_call_id: "tc-1".to_string(),
            sender: "a1".to_string(),
            chat_id: "c1".to_string(),
            message_id: "m1".to_string(),
            reply_to_message_id: None,
            created_at: Utc::now(),
            agent_id: "a1".to_string(),
        }];
        let messages = prepare_messages(None, &memory, "c1");
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("tc-1"));
    }

    #[test]
    fn sanitize_title_strips_markers_and_quotes() {
        assert_eq!(sanitize_title("# \"Quantum Tunneling Basics\".\n"), "Quantum Tunneling Basics");
        assert_eq!(sanitize_title("Title: Weekend Plans"), "Weekend Plans");
    }

    #[test]
    fn is_low_quality_rejects_generic_titles() {
        assert!(is_low_quality("chat"));
        assert!(is_low_quality("New Chat"));
        assert!(is_low_quality("hi"));
        assert!(!is_low_quality("Quantum Tunneling Basics"));
    }

    #[test]
    fn cap_length_adds_ellipsis_past_100_chars() {
        let long = "x".repeat(150);
        let capped = cap_length(&long);
        assert_eq!(capped.chars().count(), MAX_TITLE_LEN);
        assert!(capped.ends_with('…'));
    }

    #[tokio::test]
    async fn generate_chat_title_sanitizes_llm_output() {
        let storage = InMemoryStorage::new();
        storage
            .append_memory_row("w1", user_row("Explain quantum tunneling in 3 lines", "c1"))
            .await
            .unwrap();
        storage.append_memory_row("w1", assistant_row("Particles can cross barriers...", "c1")).await.unwrap();

        let llm = ScriptedLlmClient::new(vec![LlmResponse::text("# \"Quantum Tunneling Explained\"")]);
        let title = generate_chat_title(&storage, &llm, "w1", "c1", None, CancelSignal::new()).await;
        assert_eq!(title, "Quantum Tunneling Explained");
    }

    #[tokio::test]
    async fn generate_chat_title_falls_back_when_llm_output_is_low_quality() {
        let storage = InMemoryStorage::new();
        storage.append_memory_row("w1", user_row("Tell me about rust ownership", "c1")).await.unwrap();

        let llm = ScriptedLlmClient::new(vec![LlmResponse::text("chat")]);
        let title = generate_chat_title(&storage, &llm, "w1", "c1", None, CancelSignal::new()).await;
        assert_eq!(title, "Tell me about rust ownership");
    }

    #[tokio::test]
    async fn generate_chat_title_returns_empty_on_cancellation() {
        let storage = InMemoryStorage::new();
        storage.append_memory_row("w1", user_row("hello there", "c1")).await.unwrap();

        let llm = ScriptedLlmClient::new(vec![LlmResponse::text("never reached")]);
        let cancel = CancelSignal::new();
        cancel.cancel();
        let title = generate_chat_title(&storage, &llm, "w1", "c1", None, cancel).await;
        assert_eq!(title, "");
    }

    #[tokio::test]
    async fn generate_chat_title_with_no_memory_uses_seed_content() {
        let storage = InMemoryStorage::new();
        let llm = ScriptedLlmClient::new(vec![LlmResponse::text("Weekend Trip Planning")]);
        let title =
            generate_chat_title(&storage, &llm, "w1", "c1", Some("Let's plan a weekend trip"), CancelSignal::new())
                .await;
        assert_eq!(title, "Weekend Trip Planning");
    }
}
