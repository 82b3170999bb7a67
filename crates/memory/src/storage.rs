//! The `Storage` contract — "KV-style CRUD over worlds/agents/chats/
//! messages/events" per the system's PURPOSE & SCOPE. Out of spec scope as
//! a concrete backend; this crate fixes the trait and ships one honest
//! implementation ([`InMemoryStorage`]) plus unimplemented-but-real seams
//! for `sqlite`/`file` so `AGENT_WORLD_STORAGE_TYPE` always resolves to a
//! real trait object.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::MemoryError;
use crate::schema::AgentMessage;

/// KV-style CRUD over worlds/agents/chats/messages/events. Agent and world
/// payloads are opaque JSON blobs from this crate's point of view — the
/// concrete shape is `agentworld-agent`'s, not this crate's, concern.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_agent(&self, world_id: &str, agent_id: &str, data: Value) -> Result<(), MemoryError>;
    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Option<Value>, MemoryError>;
    async fn save_world(&self, world_id: &str, data: Value) -> Result<(), MemoryError>;
    async fn load_world(&self, world_id: &str) -> Result<Option<Value>, MemoryError>;
    async fn save_chat_data(&self, world_id: &str, chat_id: &str, data: Value) -> Result<(), MemoryError>;
    async fn update_chat_data(&self, world_id: &str, chat_id: &str, patch: Value) -> Result<(), MemoryError>;
    async fn list_chats(&self, world_id: &str) -> Result<Vec<Value>, MemoryError>;
    async fn delete_chat(&self, world_id: &str, chat_id: &str) -> Result<(), MemoryError>;
    /// Returns every memory row recorded for `chat_id` across all agents in
    /// `world_id`, in append order. Rows reach storage via
    /// [`Storage::append_memory_row`], called alongside `save_agent` by the
    /// append-rule functions in this crate.
    async fn get_memory(&self, world_id: &str, chat_id: &str) -> Result<Vec<AgentMessage>, MemoryError>;
    async fn append_memory_row(&self, world_id: &str, row: AgentMessage) -> Result<(), MemoryError>;
    async fn save_event(&self, world_id: &str, event: Value) -> Result<(), MemoryError>;
}

#[derive(Default)]
struct WorldRecord {
    world: Option<Value>,
    agents: HashMap<String, Value>,
    chats: HashMap<String, Value>,
    memory: HashMap<String, Vec<AgentMessage>>,
    events: Vec<Value>,
}

/// Default/test backend: everything lives in a `RwLock`-guarded map, scoped
/// by `world_id`. Matches the teacher's habit of shipping a working
/// in-process implementation alongside every external-collaborator trait.
#[derive(Default)]
pub struct InMemoryStorage {
    worlds: RwLock<HashMap<String, WorldRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_agent(&self, world_id: &str, agent_id: &str, data: Value) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        let record = worlds.entry(world_id.to_string()).or_default();
        record.agents.insert(agent_id.to_string(), data);
        Ok(())
    }

    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Option<Value>, MemoryError> {
        let worlds = self.worlds.read().await;
        Ok(worlds.get(world_id).and_then(|w| w.agents.get(agent_id).cloned()))
    }

    async fn save_world(&self, world_id: &str, data: Value) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        worlds.entry(world_id.to_string()).or_default().world = Some(data);
        Ok(())
    }

    async fn load_world(&self, world_id: &str) -> Result<Option<Value>, MemoryError> {
        let worlds = self.worlds.read().await;
        Ok(worlds.get(world_id).and_then(|w| w.world.clone()))
    }

    async fn save_chat_data(&self, world_id: &str, chat_id: &str, data: Value) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        worlds.entry(world_id.to_string()).or_default().chats.insert(chat_id.to_string(), data);
        Ok(())
    }

    async fn update_chat_data(&self, world_id: &str, chat_id: &str, patch: Value) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        let record = worlds.entry(world_id.to_string()).or_default();
        match record.chats.get_mut(chat_id) {
            Some(Value::Object(existing)) => {
                if let Value::Object(patch) = patch {
                    existing.extend(patch);
                }
                Ok(())
            }
            Some(_) | None => {
                record.chats.insert(chat_id.to_string(), patch);
                Ok(())
            }
        }
    }

    async fn list_chats(&self, world_id: &str) -> Result<Vec<Value>, MemoryError> {
        let worlds = self.worlds.read().await;
        Ok(worlds.get(world_id).map(|w| w.chats.values().cloned().collect()).unwrap_or_default())
    }

    async fn delete_chat(&self, world_id: &str, chat_id: &str) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        if let Some(record) = worlds.get_mut(world_id) {
            record.chats.remove(chat_id);
            record.memory.remove(chat_id);
        }
        Ok(())
    }

    async fn get_memory(&self, world_id: &str, chat_id: &str) -> Result<Vec<AgentMessage>, MemoryError> {
        let worlds = self.worlds.read().await;
        Ok(worlds
            .get(world_id)
            .and_then(|w| w.memory.get(chat_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn append_memory_row(&self, world_id: &str, row: AgentMessage) -> Result<(), MemoryError> {
        let Some(chat_id) = row.chat_id().map(str::to_string) else {
            return Ok(());
        };
        let mut worlds = self.worlds.write().await;
        worlds.entry(world_id.to_string()).or_default().memory.entry(chat_id).or_default().push(row);
        Ok(())
    }

    async fn save_event(&self, world_id: &str, event: Value) -> Result<(), MemoryError> {
        let mut worlds = self.worlds.write().await;
        worlds.entry(world_id.to_string()).or_default().events.push(event);
        Ok(())
    }
}

/// Honest stand-in for `AGENT_WORLD_STORAGE_TYPE=sqlite`: every method
/// fails with [`MemoryError::StorageFailure`] rather than faking a schema
/// that was never implemented. See DESIGN.md's Open Question decision.
#[derive(Default)]
pub struct SqliteStorage;

impl SqliteStorage {
    pub fn new() -> Self {
        Self
    }

    fn unsupported<T>() -> Result<T, MemoryError> {
        Err(MemoryError::StorageFailure("sqlite backend is not implemented".to_string()))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_agent(&self, _world_id: &str, _agent_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn load_agent(&self, _world_id: &str, _agent_id: &str) -> Result<Option<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn save_world(&self, _world_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn load_world(&self, _world_id: &str) -> Result<Option<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn save_chat_data(&self, _world_id: &str, _chat_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn update_chat_data(&self, _world_id: &str, _chat_id: &str, _patch: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn list_chats(&self, _world_id: &str) -> Result<Vec<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn delete_chat(&self, _world_id: &str, _chat_id: &str) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn get_memory(&self, _world_id: &str, _chat_id: &str) -> Result<Vec<AgentMessage>, MemoryError> {
        Self::unsupported()
    }
    async fn append_memory_row(&self, _world_id: &str, _row: AgentMessage) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn save_event(&self, _world_id: &str, _event: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
}

/// Honest stand-in for `AGENT_WORLD_STORAGE_TYPE=file`, same rationale as
/// [`SqliteStorage`].
#[derive(Default)]
pub struct FileStorage;

impl FileStorage {
    pub fn new() -> Self {
        Self
    }

    fn unsupported<T>() -> Result<T, MemoryError> {
        Err(MemoryError::StorageFailure("file backend is not implemented".to_string()))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save_agent(&self, _world_id: &str, _agent_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn load_agent(&self, _world_id: &str, _agent_id: &str) -> Result<Option<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn save_world(&self, _world_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn load_world(&self, _world_id: &str) -> Result<Option<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn save_chat_data(&self, _world_id: &str, _chat_id: &str, _data: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn update_chat_data(&self, _world_id: &str, _chat_id: &str, _patch: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn list_chats(&self, _world_id: &str) -> Result<Vec<Value>, MemoryError> {
        Self::unsupported()
    }
    async fn delete_chat(&self, _world_id: &str, _chat_id: &str) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn get_memory(&self, _world_id: &str, _chat_id: &str) -> Result<Vec<AgentMessage>, MemoryError> {
        Self::unsupported()
    }
    async fn append_memory_row(&self, _world_id: &str, _row: AgentMessage) -> Result<(), MemoryError> {
        Self::unsupported()
    }
    async fn save_event(&self, _world_id: &str, _event: Value) -> Result<(), MemoryError> {
        Self::unsupported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_and_load_agent_round_trips() {
        let storage = InMemoryStorage::new();
        storage.save_agent("w1", "a1", json!({"name": "Scout"})).await.unwrap();
        let loaded = storage.load_agent("w1", "a1").await.unwrap();
        assert_eq!(loaded, Some(json!({"name": "Scout"})));
    }

    #[tokio::test]
    async fn load_agent_missing_returns_none() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.load_agent("w1", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_chat_data_merges_into_existing_object() {
        let storage = InMemoryStorage::new();
        storage.save_chat_data("w1", "c1", json!({"title": "Untitled", "pinned": false})).await.unwrap();
        storage.update_chat_data("w1", "c1", json!({"title": "Ship it"})).await.unwrap();
        let chats = storage.list_chats("w1").await.unwrap();
        assert_eq!(chats, vec![json!({"title": "Ship it", "pinned": false})]);
    }

    #[tokio::test]
    async fn delete_chat_removes_chat_and_its_memory() {
        let storage = InMemoryStorage::new();
        storage.save_chat_data("w1", "c1", json!({})).await.unwrap();
        storage
            .append_memory_row(
                "w1",
                AgentMessage::System {
                    content: "hi".into(),
                    chat_id: Some("c1".into()),
                    message_id: "m1".into(),
                    created_at: chrono::Utc::now(),
                    agent_id: "a1".into(),
                },
            )
            .await
            .unwrap();
        storage.delete_chat("w1", "c1").await.unwrap();
        assert!(storage.list_chats("w1").await.unwrap().is_empty());
        assert!(storage.get_memory("w1", "c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_memory_row_is_scoped_per_chat() {
        let storage = InMemoryStorage::new();
        let row = |chat_id: &str| AgentMessage::User {
            content: "hi".into(),
            sender: "human".into(),
            chat_id: chat_id.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            reply_to_message_id: None,
            created_at: chrono::Utc::now(),
            agent_id: "a1".into(),
        };
        storage.append_memory_row("w1", row("c1")).await.unwrap();
        storage.append_memory_row("w1", row("c2")).await.unwrap();
        assert_eq!(storage.get_memory("w1", "c1").await.unwrap().len(), 1);
        assert_eq!(storage.get_memory("w1", "c2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sqlite_storage_reports_unsupported_rather_than_faking_success() {
        let storage = SqliteStorage::new();
        let err = storage.save_agent("w1", "a1", json!({})).await.unwrap_err();
        assert!(matches!(err, MemoryError::StorageFailure(_)));
    }
}
