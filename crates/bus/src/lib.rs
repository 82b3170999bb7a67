pub mod bus;
pub mod events;

pub use bus::{Bus, BusError, Handler, Unsubscribe};
pub use events::{
    ActivityEvent, ActivityType, Channel, CrudEntityType, CrudEvent, CrudOperation, Event,
    MessageEvent, SSEEvent, SseEventType, SystemEvent, ToolEvent, ToolEventType,
    ToolExecutionInfo, AgentId, ChatId, MessageId, WorldId,
};
