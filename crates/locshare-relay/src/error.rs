//! Relay errors: everything a single client can get wrong

use thiserror::Error;

use crate::protocol::{ERR_INVALID_EVENT, ERR_INVALID_PARAMS, ERR_TERMINATED, SessionId};

#[derive(Debug, Error, PartialEq)]
pub enum RelayError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Library-API guard for callers that keep a `Connection` after
    /// `disconnect`. The WebSocket handler only disconnects once its reader
    /// loop has ended, so this never reaches the wire.
    #[error("session {0} is terminated")]
    SessionTerminated(SessionId),
}

impl RelayError {
    /// Numeric code sent back to the client in an `error` frame
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidPayload(_) => ERR_INVALID_PARAMS,
            Self::UnknownEvent(_) => ERR_INVALID_EVENT,
            Self::SessionTerminated(_) => ERR_TERMINATED,
        }
    }
}
