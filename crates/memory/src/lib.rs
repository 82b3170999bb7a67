//! C3 Memory & Persistence: the append-only `AgentMessage` schema, the
//! per-agent append rules that mutate it, and the `Storage` contract that
//! backs it. Chat title generation lives in `agentworld-prompt`, which
//! depends on this crate for the schema and on `agentworld-llm` for the
//! model call.

pub mod append;
pub mod error;
pub mod schema;
pub mod storage;

pub use append::{
    IncomingEvent, reset_llm_call_count_if_needed, save_assistant, save_incoming_message, save_tool,
};
pub use error::MemoryError;
pub use schema::{AgentMessage, ToolCallStatusEntry};
pub use storage::{FileStorage, InMemoryStorage, SqliteStorage, Storage};
