//! locshare-relay: realtime location fan-out over WebSocket
//!
//! Clients connect to `/ws`, stream their position with `send-location`, and
//! receive every other client's updates plus a notice when someone leaves.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod server;

pub use dispatcher::RelayDispatcher;
pub use error::RelayError;
pub use registry::SessionRegistry;
pub use server::{RelayServer, RelaySettings};
