//! Persistence subscriber (spec.md §6 "Environment variables" —
//! `DISABLE_EVENT_PERSISTENCE`; §4.2 notes every channel is mirrored to
//! storage by default).
//!
//! Grounded on the teacher's `runtime/server/connection.rs` habit of
//! keeping one subscriber per concern rather than folding persistence into
//! the orchestrator itself.

use std::sync::Arc;

use agentworld_agent::{Runtime, World};
use agentworld_bus::{events::ALL_CHANNELS, BusError, Event, Unsubscribe};
use agentworld_config::AppConfig;
use tracing::warn;

/// Subscribes to every channel and mirrors each non-transient event to
/// [`agentworld_memory::Storage::save_event`]. Re-reads
/// [`AppConfig::event_persistence_enabled`] on every event rather than once
/// at bind time, so flipping `DISABLE_EVENT_PERSISTENCE` at runtime takes
/// effect immediately.
pub fn bind_persistence_subscriber(world: Arc<World>, rt: Arc<Runtime>, config: Arc<AppConfig>) -> Vec<Unsubscribe> {
    ALL_CHANNELS
        .iter()
        .map(|&channel| {
            let rt = Arc::clone(&rt);
            let config = Arc::clone(&config);
            let world_id = world.id.clone();
            world.bus.on(channel, move |event: Event| {
                let rt = Arc::clone(&rt);
                let config = Arc::clone(&config);
                let world_id = world_id.clone();
                async move {
                    if !config.event_persistence_enabled() || event.is_transient() {
                        return Ok(());
                    }
                    let payload = serde_json::to_value(&event).map_err(|err| BusError::Handler(err.to_string()))?;
                    if let Err(err) = rt.storage.save_event(&world_id, payload).await {
                        warn!(%err, "persistence subscriber: failed to save event");
                    }
                    Ok(())
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentworld_llm::ScriptedLlmClient;
    use agentworld_memory::{AgentMessage, MemoryError};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    /// Records every `save_event` call; every other method is an honest stub
    /// since the persistence subscriber never exercises them.
    #[derive(Default)]
    struct RecordingStorage {
        events: AsyncMutex<Vec<JsonValue>>,
    }

    #[async_trait]
    impl agentworld_memory::Storage for RecordingStorage {
        async fn save_agent(&self, _world_id: &str, _agent_id: &str, _data: JsonValue) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn load_agent(&self, _world_id: &str, _agent_id: &str) -> Result<Option<JsonValue>, MemoryError> {
            Ok(None)
        }
        async fn save_world(&self, _world_id: &str, _data: JsonValue) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn load_world(&self, _world_id: &str) -> Result<Option<JsonValue>, MemoryError> {
            Ok(None)
        }
        async fn save_chat_data(&self, _world_id: &str, _chat_id: &str, _data: JsonValue) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn update_chat_data(&self, _world_id: &str, _chat_id: &str, _patch: JsonValue) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn list_chats(&self, _world_id: &str) -> Result<Vec<JsonValue>, MemoryError> {
            Ok(vec![])
        }
        async fn delete_chat(&self, _world_id: &str, _chat_id: &str) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn get_memory(&self, _world_id: &str, _chat_id: &str) -> Result<Vec<AgentMessage>, MemoryError> {
            Ok(vec![])
        }
        async fn append_memory_row(&self, _world_id: &str, _row: AgentMessage) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn save_event(&self, _world_id: &str, event: JsonValue) -> Result<(), MemoryError> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    fn message_event() -> agentworld_bus::MessageEvent {
        agentworld_bus::MessageEvent {
            content: "hi".to_string(),
            sender: "human".to_string(),
            role: Some("user".to_string()),
            tool_calls: vec![],
            tool_call_id: None,
            tool_call_status: None,
            timestamp: Utc::now(),
            message_id: "m1".to_string(),
            chat_id: Some("c1".to_string()),
            reply_to_message_id: None,
        }
    }

    #[tokio::test]
    async fn persists_non_transient_events_when_enabled() {
        std::env::remove_var("DISABLE_EVENT_PERSISTENCE");
        let world = Arc::new(World::new("w1", "World One"));
        let storage = Arc::new(RecordingStorage::default());
        let runtime = Arc::new(Runtime::new(storage.clone(), Arc::new(ScriptedLlmClient::new(vec![]))));
        let _subs = bind_persistence_subscriber(Arc::clone(&world), runtime, Arc::new(AppConfig::default()));

        world.bus.emit(Event::Message(message_event()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(storage.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn skips_persistence_when_disabled_via_env() {
        std::env::set_var("DISABLE_EVENT_PERSISTENCE", "true");
        let world = Arc::new(World::new("w1", "World One"));
        let storage = Arc::new(RecordingStorage::default());
        let runtime = Arc::new(Runtime::new(storage.clone(), Arc::new(ScriptedLlmClient::new(vec![]))));
        let _subs = bind_persistence_subscriber(Arc::clone(&world), runtime, Arc::new(AppConfig::default()));

        world.bus.emit(Event::Message(message_event()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(storage.events.lock().await.is_empty());
        std::env::remove_var("DISABLE_EVENT_PERSISTENCE");
    }

    #[tokio::test]
    async fn skips_transient_sse_chunk_events() {
        std::env::remove_var("DISABLE_EVENT_PERSISTENCE");
        let world = Arc::new(World::new("w1", "World One"));
        let storage = Arc::new(RecordingStorage::default());
        let runtime = Arc::new(Runtime::new(storage.clone(), Arc::new(ScriptedLlmClient::new(vec![]))));
        let _subs = bind_persistence_subscriber(Arc::clone(&world), runtime, Arc::new(AppConfig::default()));

        world.bus.emit(Event::Sse(agentworld_bus::SSEEvent {
            agent_name: "a1".to_string(),
            kind: agentworld_bus::SseEventType::Chunk,
            content: Some("partial".to_string()),
            error: None,
            message_id: "m2".to_string(),
            usage: None,
            chat_id: None,
        }));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(storage.events.lock().await.is_empty());
    }
}
