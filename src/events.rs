use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::mpd::types::Status;

/// Session-level signals broadcast to whoever cares: UI layers, state
/// stores, logging. Decoupled from individual command results.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    Connecting { host: String, port: u16 },
    Connected { host: String, port: u16 },
    /// Connection re-established by the supervisor rather than a caller.
    Reconnected { host: String, port: u16 },
    Disconnected { host: String, port: u16 },
    /// Periodic parsed player status from the poll loop.
    Status(Status),
    /// Relayed for discovery collaborators; the session core never
    /// produces these itself.
    Discovered {
        name: String,
        host: String,
        port: u16,
        gone: bool,
    },
}

/// Fan-out for [`SessionEvent`]s over a broadcast channel. Publishing never
/// blocks and never fails; a subscriber that lags simply misses events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> EventBus {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new(64)
    }
}
