//! Relay dispatcher: connection lifecycle and location fan-out

use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::events::{EventBus, Subscription};
use crate::protocol::{ClientRequest, Position, RelayEvent, SessionId};
use crate::registry::SessionRegistry;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no position reported yet
    Connected,
    /// At least one position reported
    Active,
    /// Disconnected, removed from the registry
    Terminated,
}

/// Handle for one client connection, owned by its connection task
#[derive(Debug)]
pub struct Connection {
    id: SessionId,
    state: SessionState,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

/// Handles connect, location-update, and disconnect for every client
#[derive(Clone)]
pub struct RelayDispatcher {
    registry: SessionRegistry,
    events: EventBus,
    validate_coordinates: bool,
}

impl RelayDispatcher {
    pub fn new(registry: SessionRegistry, events: EventBus) -> Self {
        Self {
            registry,
            events,
            validate_coordinates: true,
        }
    }

    /// Toggle the latitude/longitude range check. Non-finite values are always rejected.
    pub fn with_coordinate_validation(mut self, enabled: bool) -> Self {
        self.validate_coordinates = enabled;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Allocate an identifier for a new client and subscribe it to the bus.
    ///
    /// Identifiers are random v4 UUIDs and are never handed out twice.
    pub fn connect(&self) -> (Connection, Subscription) {
        let id = uuid::Uuid::new_v4().to_string();
        let subscription = self.events.subscribe(id.clone());
        info!("Client connected: {}", id);
        (
            Connection {
                id,
                state: SessionState::Connected,
            },
            subscription,
        )
    }

    /// Apply a decoded client request
    pub async fn handle(
        &self,
        conn: &mut Connection,
        request: ClientRequest,
    ) -> Result<(), RelayError> {
        match request {
            ClientRequest::SendLocation(position) => self.update_location(conn, position).await,
        }
    }

    /// Record a new position and send it to every other client
    pub async fn update_location(
        &self,
        conn: &mut Connection,
        position: Position,
    ) -> Result<(), RelayError> {
        if conn.state == SessionState::Terminated {
            return Err(RelayError::SessionTerminated(conn.id.clone()));
        }
        if let Err(e) = position.validate(self.validate_coordinates) {
            warn!("Rejected location from {}: {}", conn.id, e);
            return Err(e);
        }

        self.registry.upsert(&conn.id, position).await;
        if conn.state == SessionState::Connected {
            debug!("Session {} is now active", conn.id);
            conn.state = SessionState::Active;
        }

        self.events
            .broadcast_from(&conn.id, RelayEvent::location(conn.id.clone(), position));
        Ok(())
    }

    /// Tear down a connection and tell everyone else. Repeated calls are no-ops.
    pub async fn disconnect(&self, conn: &mut Connection) {
        if conn.state == SessionState::Terminated {
            return;
        }
        conn.state = SessionState::Terminated;
        self.registry.remove(&conn.id).await;
        self.events
            .broadcast_from(&conn.id, RelayEvent::UserDisconnected(conn.id.clone()));
        info!("Client disconnected: {}", conn.id);
    }
}
