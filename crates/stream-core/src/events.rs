//! Client events for presentation layers
//!
//! The session publishes every externally visible change on a broadcast
//! channel so a UI (or the CLI) can react without polling the snapshot.
//!
//! ```rust
//! # use talkstream_core::events::{EventBus, ClientEvent};
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit(ClientEvent::ReadinessChanged { ready: true });
//! assert!(matches!(rx.recv().await, Ok(ClientEvent::ReadinessChanged { ready: true })));
//! # }
//! ```

use tokio::sync::broadcast;
use tracing::trace;

use crate::config::ServiceVariant;
use crate::monitor::VideoState;
use crate::status::{StatusCategory, StatusEntry};
use crate::transport::IceConnectionState;

/// Why a session was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop()`/`teardown()` was called
    Requested,
    /// A new `connect()` replaced the previous session
    Replaced,
    /// The ICE connection reached a terminal state
    TransportFailed(IceConnectionState),
    /// Negotiation failed after the session was created
    NegotiationFailed,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A session was created and the answer delivered
    SessionStarted {
        stream_id: String,
        service: ServiceVariant,
    },
    StatusChanged {
        category: StatusCategory,
        entry: StatusEntry,
    },
    ReadinessChanged {
        ready: bool,
    },
    VideoStateChanged {
        state: VideoState,
        opacity: f32,
    },
    SessionClosed {
        reason: CloseReason,
    },
}

/// Broadcast fan-out of [`ClientEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish, ignoring the absence of subscribers
    pub fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for client event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
