//! HITL gateway protocol (spec.md §6 "HITL gateway protocol").
//!
//! Grounded on the teacher's `server/connection.rs` request/response
//! correlation pattern (a pending-map keyed by an id the client echoes
//! back), adapted from one connection's lifetime to `worldId::requestId`
//! scope. Process-local only — no cross-instance durability is implied by
//! the spec's five-step description.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentworld_agent::World;
use agentworld_bus::{Event, SystemEvent};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex as TokioMutex};

/// One option a `requestWorldOption` call offers the user.
#[derive(Debug, Clone)]
pub struct HitlOption {
    pub id: String,
    pub label: String,
}

/// `requestWorldOption`'s input (spec.md §6 item 1).
pub struct OptionRequest {
    pub request_id: Option<String>,
    pub title: String,
    pub message: String,
    pub options: Vec<HitlOption>,
    pub default_option_id: Option<String>,
    pub timeout_ms: u64,
    pub chat_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    User,
    Timeout,
}

/// `requestWorldOption`'s resolved value: `{optionId, source}`.
#[derive(Debug, Clone)]
pub struct OptionResponse {
    pub option_id: Option<String>,
    pub source: ResponseSource,
}

struct PendingRequest {
    default_option_id: Option<String>,
    valid_option_ids: Vec<String>,
    responder: oneshot::Sender<OptionResponse>,
}

/// Holds every in-flight `requestWorldOption` call, keyed `worldId::requestId`
/// (spec.md §6 item 5). One gateway is shared across all worlds a process
/// hosts — the key already scopes by world.
#[derive(Default, Clone)]
pub struct HitlGateway {
    pending: Arc<TokioMutex<HashMap<String, PendingRequest>>>,
}

impl HitlGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits the `hitl-option-request` system event, then waits for
    /// `submit_response` or `request.timeout_ms`, whichever comes first. On
    /// timeout resolves with `{optionId: defaultOptionId, source: "timeout"}`
    /// (spec.md §6 item 4).
    pub async fn request_option(&self, world: &World, request: OptionRequest) -> OptionResponse {
        let request_id = request.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = format!("{}::{}", world.id, request_id);
        let (tx, rx) = oneshot::channel();
        let valid_option_ids: Vec<String> = request.options.iter().map(|o| o.id.clone()).collect();

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                key.clone(),
                PendingRequest { default_option_id: request.default_option_id.clone(), valid_option_ids, responder: tx },
            );
        }

        let options_json: Vec<Value> = request.options.iter().map(|o| json!({"id": o.id, "label": o.label})).collect();
        world.bus.emit(Event::System(SystemEvent {
            content: request.message.clone(),
            timestamp: Utc::now(),
            message_id: uuid::Uuid::new_v4().to_string(),
            chat_id: request.chat_id.clone(),
            event_type: Some("hitl-option-request".to_string()),
            extra: Some(json!({
                "requestId": request_id,
                "title": request.title,
                "options": options_json,
                "defaultOptionId": request.default_option_id,
                "timeoutMs": request.timeout_ms,
                "metadata": request.metadata,
            })),
        }));

        tokio::select! {
            response = rx => response.unwrap_or(OptionResponse { option_id: None, source: ResponseSource::Timeout }),
            _ = tokio::time::sleep(Duration::from_millis(request.timeout_ms)) => {
                let default_option_id = {
                    let mut pending = self.pending.lock().await;
                    pending.remove(&key).and_then(|p| p.default_option_id)
                };
                OptionResponse { option_id: default_option_id, source: ResponseSource::Timeout }
            }
        }
    }

    /// `submitWorldOptionResponse({worldId, requestId, optionId})` (spec.md
    /// §6 item 3). Returns `false` if the request is unknown (already
    /// resolved, timed out, or never existed) or `option_id` isn't one of
    /// the options the request offered.
    pub async fn submit_response(&self, world_id: &str, request_id: &str, option_id: &str) -> bool {
        let key = format!("{world_id}::{request_id}");
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get(&key) else {
            return false;
        };
        if !entry.valid_option_ids.iter().any(|id| id == option_id) {
            return false;
        }
        let entry = pending.remove(&key).expect("checked above");
        entry.responder.send(OptionResponse { option_id: Some(option_id.to_string()), source: ResponseSource::User }).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentworld_bus::Channel;
    use std::sync::Arc as StdArc;
    use tokio::sync::Mutex as AsyncMutex;

    fn sample_request(timeout_ms: u64) -> OptionRequest {
        OptionRequest {
            request_id: Some("req-1".to_string()),
            title: "Approve shell command?".to_string(),
            message: "rm -rf /tmp/scratch".to_string(),
            options: vec![
                HitlOption { id: "approve".to_string(), label: "Approve".to_string() },
                HitlOption { id: "reject".to_string(), label: "Reject".to_string() },
            ],
            default_option_id: Some("reject".to_string()),
            timeout_ms,
            chat_id: Some("c1".to_string()),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn user_response_resolves_before_timeout() {
        let world = World::new("w1", "World One");
        let gateway = HitlGateway::new();
        let gateway_clone = gateway.clone();

        let responder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gateway_clone.submit_response("w1", "req-1", "approve").await
        });

        let response = gateway.request_option(&world, sample_request(5_000)).await;
        assert!(responder.await.unwrap());
        assert_eq!(response.option_id.as_deref(), Some("approve"));
        assert_eq!(response.source, ResponseSource::User);
    }

    #[tokio::test]
    async fn unanswered_request_resolves_to_default_on_timeout() {
        let world = World::new("w1", "World One");
        let gateway = HitlGateway::new();
        let response = gateway.request_option(&world, sample_request(20)).await;
        assert_eq!(response.option_id.as_deref(), Some("reject"));
        assert_eq!(response.source, ResponseSource::Timeout);
    }

    #[tokio::test]
    async fn invalid_option_id_is_rejected() {
        let world = World::new("w1", "World One");
        let gateway = HitlGateway::new();
        let gateway_clone = gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(!gateway_clone.submit_response("w1", "req-1", "not-an-option").await);
        });
        let response = gateway.request_option(&world, sample_request(50)).await;
        assert_eq!(response.source, ResponseSource::Timeout);
    }

    #[tokio::test]
    async fn emits_hitl_option_request_system_event() {
        let world = World::new("w1", "World One");
        let seen: StdArc<AsyncMutex<Vec<SystemEvent>>> = Default::default();
        let seen_clone = StdArc::clone(&seen);
        let _sub = world.bus.on(Channel::System, move |event: Event| {
            let seen = StdArc::clone(&seen_clone);
            async move {
                if let Event::System(s) = event {
                    seen.lock().await.push(s);
                }
                Ok(())
            }
        });

        let gateway = HitlGateway::new();
        let _ = gateway.request_option(&world, sample_request(10)).await;

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type.as_deref(), Some("hitl-option-request"));
    }
}
