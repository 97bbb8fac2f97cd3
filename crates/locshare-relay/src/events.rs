//! Event bus: fan out relay events to every connected client except the sender

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::protocol::{RelayEvent, SessionId};

/// An event on the bus, tagged with the session that caused it
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: SessionId,
    pub event: RelayEvent,
}

/// Broadcast event bus shared by all connections
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Envelope>>,
}

impl EventBus {
    /// Create a new event bus. Each receiver buffers at most `capacity` events
    /// before it starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe on behalf of session `id`. Events originating from `id` are skipped.
    pub fn subscribe(&self, id: impl Into<SessionId>) -> Subscription {
        Subscription {
            id: id.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Broadcast an event caused by `origin` to every other subscriber
    pub fn broadcast_from(&self, origin: &str, event: RelayEvent) {
        let receivers = self.sender.receiver_count();
        if receivers > 0 {
            debug!(
                "Broadcasting '{}' from {} to {} receivers",
                event.name(),
                origin,
                receivers
            );
            // No receivers left between the count and the send is fine
            let _ = self.sender.send(Envelope {
                origin: origin.to_string(),
                event,
            });
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One session's view of the bus
pub struct Subscription {
    id: SessionId,
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    /// Wait for the next event not caused by this session.
    ///
    /// Returns `None` once the bus is gone. Events lost to lag are dropped.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session {} lagged, dropped {} events", self.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<RelayEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Session {} lagged, dropped {} events", self.id, n);
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&self, envelope: Envelope) -> Option<RelayEvent> {
        if envelope.origin == self.id {
            None
        } else {
            Some(envelope.event)
        }
    }
}
