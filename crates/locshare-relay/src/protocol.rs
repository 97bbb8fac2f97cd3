//! Relay WebSocket protocol: JSON frames between clients and the relay
//!
//! Every frame on the wire is `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Opaque per-connection identifier, allocated by the relay on upgrade
pub type SessionId = String;

/// Client → relay frame, before the payload is interpreted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A last-known position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Interpreted client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    SendLocation(Position),
}

/// Payload of a `receive-location` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub id: SessionId,
    pub latitude: f64,
    pub longitude: f64,
}

/// Payload of an `error` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

/// Relay → client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// Sent once to a freshly upgraded client, carrying its own identifier
    Connected { id: SessionId },
    ReceiveLocation(LocationUpdate),
    UserDisconnected(SessionId),
    Error(ErrorPayload),
}

// ── Well-known event names ──

/// Events the client can send
pub mod inbound {
    pub const SEND_LOCATION: &str = "send-location";
}

/// Events the relay emits
pub mod outbound {
    pub const CONNECTED: &str = "connected";
    pub const RECEIVE_LOCATION: &str = "receive-location";
    pub const USER_DISCONNECTED: &str = "user-disconnected";
    pub const ERROR: &str = "error";
}

// ── Error codes ──

pub const ERR_INVALID_EVENT: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_TERMINATED: i32 = -32000;

/// Longest event name echoed back in an `error` frame
const MAX_ECHOED_EVENT_CHARS: usize = 64;

const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject non-finite coordinates, and out-of-range ones when `check_ranges` is set.
    pub fn validate(&self, check_ranges: bool) -> Result<(), RelayError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(RelayError::InvalidPayload(
                "coordinates must be finite numbers".to_string(),
            ));
        }
        if check_ranges {
            if !LATITUDE_RANGE.contains(&self.latitude) {
                return Err(RelayError::InvalidPayload(format!(
                    "latitude {} outside [-90, 90]",
                    self.latitude
                )));
            }
            if !LONGITUDE_RANGE.contains(&self.longitude) {
                return Err(RelayError::InvalidPayload(format!(
                    "longitude {} outside [-180, 180]",
                    self.longitude
                )));
            }
        }
        Ok(())
    }
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw)
            .map_err(|e| RelayError::InvalidPayload(format!("invalid JSON: {}", e)))
    }

    /// Interpret the frame. Extra fields in `data` are dropped.
    pub fn into_request(self) -> Result<ClientRequest, RelayError> {
        match self.event.as_str() {
            inbound::SEND_LOCATION => {
                let position: Position = serde_json::from_value(self.data)
                    .map_err(|e| RelayError::InvalidPayload(e.to_string()))?;
                Ok(ClientRequest::SendLocation(position))
            }
            _ => Err(RelayError::UnknownEvent(truncate_event_name(self.event))),
        }
    }
}

fn truncate_event_name(mut name: String) -> String {
    if let Some((idx, _)) = name.char_indices().nth(MAX_ECHOED_EVENT_CHARS) {
        name.truncate(idx);
        name.push_str("...");
    }
    name
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => outbound::CONNECTED,
            Self::ReceiveLocation(_) => outbound::RECEIVE_LOCATION,
            Self::UserDisconnected(_) => outbound::USER_DISCONNECTED,
            Self::Error(_) => outbound::ERROR,
        }
    }

    pub fn location(id: impl Into<SessionId>, position: Position) -> Self {
        Self::ReceiveLocation(LocationUpdate {
            id: id.into(),
            latitude: position.latitude,
            longitude: position.longitude,
        })
    }
}

impl From<&RelayError> for RelayEvent {
    fn from(err: &RelayError) -> Self {
        Self::Error(ErrorPayload {
            code: err.code(),
            message: err.to_string(),
        })
    }
}
