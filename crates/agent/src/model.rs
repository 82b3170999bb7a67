//! Core data model: `World`, `Agent`, `ChatMeta`, the explicit `Runtime`
//! context struct, and the cancellation/activity machinery the orchestrator
//! is built on (spec.md §3 "Data Model", Design Notes §9).
//!
//! Per Design Notes "Shared world references in memory → ownership split":
//! a `World` owns its agents and its event emitter, with interior mutability
//! confined to those two places. Per "Global singletons → Runtime context
//! struct": storage and the LLM client are bundled into [`Runtime`] and
//! threaded through explicitly rather than reached for as statics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use agentworld_bus::{ActivityEvent, ActivityType, Bus, Event};
use agentworld_llm::{CancelSignal, LlmClient};
use agentworld_memory::{AgentMessage, Storage};
use agentworld_tools::ToolRegistry;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Bundles the core's two out-of-spec external collaborators so orchestrator
/// entry points take an explicit `&Runtime` instead of reaching for module
/// statics (Design Notes §9).
pub struct Runtime {
    pub storage: Arc<dyn Storage>,
    pub llm: Arc<dyn LlmClient>,
}

impl Runtime {
    pub fn new(storage: Arc<dyn Storage>, llm: Arc<dyn LlmClient>) -> Self {
        Self { storage, llm }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// A stateful conversational participant (spec.md §3 "Agent"). `memory` is
/// append-only except for archival/clear, partitioned by `chat_id`.
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub status: AgentStatus,
    pub auto_reply: bool,
    pub llm_call_count: u32,
    pub last_llm_call: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub memory: Vec<AgentMessage>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            agent_type: agent_type.into(),
            provider: provider.into(),
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            status: AgentStatus::Active,
            auto_reply: true,
            llm_call_count: 0,
            last_llm_call: None,
            created_at: now,
            last_active: now,
            memory: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

const REUSABLE_WINDOW_MINUTES: i64 = 5;

/// A named subsession of a world (spec.md §3 "ChatMeta").
#[derive(Debug, Clone)]
pub struct ChatMeta {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
}

impl ChatMeta {
    pub fn new_chat(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self { id: id.into(), name: "New Chat".to_string(), description: None, created_at: now, updated_at: now, message_count: 0 }
    }

    /// A chat is reusable iff it still has its default name, has never
    /// received a message, and was created within the last five minutes
    /// (spec.md §3 "ChatMeta").
    pub fn is_reusable_at(&self, now: DateTime<Utc>) -> bool {
        self.name == "New Chat" && self.message_count == 0 && (now - self.created_at) <= Duration::minutes(REUSABLE_WINDOW_MINUTES)
    }
}

/// A cancel scope tied to `(world, chat)` plus the permit that enforces "at
/// most one orchestrator pipeline in flight" per `(world, chat, agent)`
/// (spec.md §5 "Ordering guarantees", "Cancellation").
pub struct ProcessingHandle {
    signal: CancelSignal,
    _permit: OwnedMutexGuard<()>,
}

impl ProcessingHandle {
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_canceled()
    }

    /// No-op terminator matching the pseudocode's `processingHandle.complete()`
    /// — the permit is released when the handle (and thus the guard) drops.
    pub fn complete(self) {}
}

/// An isolated event-routing domain owning its agents, chats, variables, and
/// event emitter (spec.md §3 "World").
pub struct World {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub turn_limit: u32,
    pub main_agent: Option<String>,
    pub chat_provider: Option<String>,
    pub chat_model: Option<String>,
    pub current_chat_id: RwLock<Option<String>>,
    pub variables: HashMap<String, String>,
    pub agents: RwLock<HashMap<String, Arc<Mutex<Agent>>>>,
    pub chats: RwLock<HashMap<String, ChatMeta>>,
    pub bus: Bus,
    pub tools: ToolRegistry,

    chat_cancel: RwLock<HashMap<String, CancelSignal>>,
    chat_agent_locks: RwLock<HashMap<(String, String), Arc<Mutex<()>>>>,
    pending_operations: AtomicI64,
    active_sources: RwLock<HashSet<String>>,
}

impl World {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            turn_limit: agentworld_config::DEFAULT_TURN_LIMIT,
            main_agent: None,
            chat_provider: None,
            chat_model: None,
            current_chat_id: RwLock::new(None),
            variables: HashMap::new(),
            agents: RwLock::new(HashMap::new()),
            chats: RwLock::new(HashMap::new()),
            bus: Bus::new(),
            tools: ToolRegistry::default(),
            chat_cancel: RwLock::new(HashMap::new()),
            chat_agent_locks: RwLock::new(HashMap::new()),
            pending_operations: AtomicI64::new(0),
            active_sources: RwLock::new(HashSet::new()),
        }
    }

    pub async fn add_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), Arc::new(Mutex::new(agent)));
    }

    pub async fn agent_handle(&self, agent_id: &str) -> Option<Arc<Mutex<Agent>>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    pub async fn current_chat(&self) -> Option<String> {
        self.current_chat_id.read().await.clone()
    }

    /// External stop request for `(world, chat)` (spec.md §5 "Cancellation").
    /// Idempotent: canceling an already-canceled or unknown chat is a no-op.
    pub async fn stop_chat(&self, chat_id: &str) {
        if let Some(signal) = self.chat_cancel.read().await.get(chat_id) {
            signal.cancel();
        }
    }

    async fn cancel_signal_for(&self, chat_id: &str) -> CancelSignal {
        if let Some(signal) = self.chat_cancel.read().await.get(chat_id) {
            return signal.clone();
        }
        let mut signals = self.chat_cancel.write().await;
        signals.entry(chat_id.to_string()).or_insert_with(CancelSignal::new).clone()
    }

    async fn lock_for(&self, chat_id: &str, agent_id: &str) -> Arc<Mutex<()>> {
        let key = (chat_id.to_string(), agent_id.to_string());
        if let Some(lock) = self.chat_agent_locks.read().await.get(&key) {
            return Arc::clone(lock);
        }
        let mut locks = self.chat_agent_locks.write().await;
        Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// `begin(world, chatId)`: acquires the cancel signal for `(world,
    /// chat)` and the serialization permit for `(chat, agent)` — a second
    /// concurrent call for the same target blocks here until the first
    /// completes (spec.md §5 "at most one orchestrator pipeline in flight").
    pub async fn begin_processing(&self, chat_id: &str, agent_id: &str) -> ProcessingHandle {
        let signal = self.cancel_signal_for(chat_id).await;
        let lock = self.lock_for(chat_id, agent_id).await;
        let permit = lock.lock_owned().await;
        ProcessingHandle { signal, _permit: permit }
    }

    /// `beginActivity(world, agent.id, chatId)` (spec.md §4.4.3).
    pub async fn begin_activity(&self, source: &str) {
        self.pending_operations.fetch_add(1, Ordering::SeqCst);
        self.active_sources.write().await.insert(source.to_string());
        self.emit_activity(ActivityType::ResponseStart, source).await;
    }

    /// `endActivity()`. Emits `activity:idle` with `pendingOperations == 0`
    /// once the last in-flight operation completes (spec.md §4.5 "World
    /// activity listener" relies on this to trigger auto-title).
    pub async fn end_activity(&self, source: &str) {
        let remaining = (self.pending_operations.fetch_sub(1, Ordering::SeqCst) - 1).max(0);
        self.emit_activity(ActivityType::ResponseEnd, source).await;
        if remaining == 0 {
            self.active_sources.write().await.clear();
            self.emit_activity(ActivityType::Idle, source).await;
        }
    }

    async fn emit_activity(&self, kind: ActivityType, source: &str) {
        let pending = self.pending_operations.load(Ordering::SeqCst).max(0);
        let active_sources: Vec<String> = self.active_sources.read().await.iter().cloned().collect();
        self.bus.emit(Event::Activity(ActivityEvent {
            kind,
            pending_operations: pending,
            source: source.to_string(),
            active_sources,
            activity_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }));
    }
}
