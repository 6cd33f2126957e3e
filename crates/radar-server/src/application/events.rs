//! Event notifier: in-process fan-out of protocol events to observers.
//!
//! Handlers publish [`ServerEvent`]s; any number of subscribers receive them
//! through a `tokio::sync::broadcast` channel.  Publishing never waits on a
//! subscriber.  A subscriber that falls more than the channel capacity behind
//! loses the oldest events and is told how many were skipped.
//!
//! Nothing here is persisted or retried.  Observers that need thread affinity
//! (a UI, a log shipper) do their own marshalling on the receiving side.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Device id used for events the server raises about itself.
pub const SYSTEM_SOURCE: &str = "System";

/// Discriminant of a [`ServerEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    DeviceConnected,
    DeviceDisconnected,
    MessageReceived,
    MessageSent,
    Heartbeat,
}

impl EventKind {
    fn bit(self) -> u8 {
        match self {
            EventKind::DeviceConnected => 1 << 0,
            EventKind::DeviceDisconnected => 1 << 1,
            EventKind::MessageReceived => 1 << 2,
            EventKind::MessageSent => 1 << 3,
            EventKind::Heartbeat => 1 << 4,
        }
    }
}

/// Typed notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    DeviceConnected {
        device_id: String,
        ip_address: String,
    },
    DeviceDisconnected {
        device_id: String,
    },
    /// `kind` is the message-type name; `text` a one-line summary.
    MessageReceived {
        device_id: String,
        kind: String,
        text: String,
    },
    MessageSent {
        device_id: String,
        kind: String,
        text: String,
    },
    Heartbeat {
        device_id: String,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::DeviceConnected { .. } => EventKind::DeviceConnected,
            ServerEvent::DeviceDisconnected { .. } => EventKind::DeviceDisconnected,
            ServerEvent::MessageReceived { .. } => EventKind::MessageReceived,
            ServerEvent::MessageSent { .. } => EventKind::MessageSent,
            ServerEvent::Heartbeat { .. } => EventKind::Heartbeat,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            ServerEvent::DeviceConnected { device_id, .. }
            | ServerEvent::DeviceDisconnected { device_id }
            | ServerEvent::MessageReceived { device_id, .. }
            | ServerEvent::MessageSent { device_id, .. }
            | ServerEvent::Heartbeat { device_id } => device_id,
        }
    }

    /// Informational message attributed to the server itself.
    pub fn system(text: impl Into<String>) -> Self {
        ServerEvent::MessageReceived {
            device_id: SYSTEM_SOURCE.to_string(),
            kind: "INFO".to_string(),
            text: text.into(),
        }
    }
}

/// Set of event kinds a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter(u8);

impl EventFilter {
    pub const ALL: EventFilter = EventFilter(0b1_1111);

    /// Accepts only the listed kinds.
    pub fn only(kinds: &[EventKind]) -> Self {
        Self(kinds.iter().fold(0, |bits, kind| bits | kind.bit()))
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// Observer callback run on a dedicated task, off the protocol path.
#[cfg_attr(test, mockall::automock)]
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ServerEvent);
}

/// Publishing side of the event channel.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventNotifier {
    /// `capacity` is how many events a slow subscriber may lag behind.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Delivers `event` to every current subscriber.  Never blocks.
    pub fn publish(&self, event: ServerEvent) {
        trace!(kind = ?event.kind(), device_id = %event.device_id(), "publishing event");
        // An error only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Runs `listener` for every matching event on its own task.
    ///
    /// The task ends when every [`EventNotifier`] clone has been dropped.
    pub fn spawn_listener(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> JoinHandle<()> {
        let mut subscription = self.subscribe(filter);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                listener.on_event(&event);
            }
        })
    }
}

/// Receiving side of a filtered subscription.
pub struct EventSubscription {
    rx: broadcast::Receiver<ServerEvent>,
    filter: EventFilter,
}

impl EventSubscription {
    /// Next matching event, or `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.accepts(event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.accepts(event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind; events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
