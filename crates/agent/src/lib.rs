//! C4 Orchestrator: the stateful `Agent`/`World` data model plus the
//! message-processing pipeline built on top of it (spec.md §4.4).

pub mod model;
pub mod orchestrator;
pub mod sanitize;

pub use model::{Agent, AgentStatus, ChatMeta, ProcessingHandle, Runtime, World};
pub use orchestrator::{
    persist_agent, process_agent_message, publish_turn_limit_message, resume_after_tool_result,
    should_respond, Eligibility,
};
pub use sanitize::sanitize_tool_arguments;
