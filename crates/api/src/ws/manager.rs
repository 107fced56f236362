//! Bookkeeping for live progress relays.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio_util::sync::CancellationToken;

/// Tracks open relay connections and closes them all on shutdown.
pub struct RelayManager {
    connections: Mutex<HashSet<uuid::Uuid>>,
    shutdown: CancellationToken,
}

impl RelayManager {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a relay. Returns its connection id.
    pub fn add(&self) -> uuid::Uuid {
        let conn_id = uuid::Uuid::new_v4();
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn_id);
        conn_id
    }

    pub fn remove(&self, conn_id: &uuid::Uuid) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conn_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fires when [`shutdown_all`](Self::shutdown_all) is called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask every relay to send a close frame and stop.
    pub fn shutdown_all(&self) {
        self.shutdown.cancel();
    }
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new()
    }
}
