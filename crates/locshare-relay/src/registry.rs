//! Session registry: last-known position per connected client

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::protocol::{Position, SessionId};

/// Maps connection identifiers to their last reported position.
///
/// A client only appears here once it has sent a position, and disappears
/// when it disconnects. Cloning shares the same underlying map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    positions: Arc<RwLock<HashMap<SessionId, Position>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the position for `id`
    pub async fn upsert(&self, id: &str, position: Position) {
        let mut positions = self.positions.write().await;
        positions.insert(id.to_string(), position);
        debug!(
            "Session '{}' at ({}, {})",
            id, position.latitude, position.longitude
        );
    }

    /// Remove the entry for `id`. Returns the last position, if any.
    pub async fn remove(&self, id: &str) -> Option<Position> {
        self.positions.write().await.remove(id)
    }

    /// Copy of the current mapping. No ordering guarantee.
    pub async fn all(&self) -> HashMap<SessionId, Position> {
        self.positions.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Position> {
        self.positions.read().await.get(id).copied()
    }

    pub async fn count(&self) -> usize {
        self.positions.read().await.len()
    }
}
