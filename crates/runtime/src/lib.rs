//! C5 Subscribers and external surface (spec.md §4.5, §6): binds agents to
//! a world's bus, the HITL gateway, the message publishing API, the world
//! activity listener (auto chat-title-on-idle), and the persistence
//! subscriber.
//!
//! Grounded on the teacher's `runtime/src/runtime/mod.rs`/`server.rs` split
//! between "wire the daemon's subscriptions" and "expose a request/response
//! surface to an external client" — generalized here from one bot's single
//! event loop to per-agent, per-world bindings over `agentworld-agent`'s
//! `World`/`Runtime`.

pub mod hitl;
pub mod persistence;
pub mod publish;
pub mod subscribers;

pub use hitl::{HitlGateway, HitlOption, OptionRequest, OptionResponse, ResponseSource};
pub use persistence::bind_persistence_subscriber;
pub use publish::{
    publish_message, publish_message_with_id, publish_sse, publish_tool_event, publish_tool_result,
    ToolResultDecision,
};
pub use subscribers::{bind_agent, bind_world_activity_listener, AgentBinding};
