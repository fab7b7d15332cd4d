use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::scans::dto::ServerMessage;

/// Live WebSocket connections and the outbound queue of each.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<Uuid, mpsc::Sender<ServerMessage>>>,
}

/// Removes its connection from the registry when dropped.
pub struct ConnectionGuard {
    id: Uuid,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, outbound: mpsc::Sender<ServerMessage>) -> ConnectionGuard {
        let id = Uuid::new_v4();
        self.conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, outbound);
        debug!(conn_id = %id, "connection registered");
        ConnectionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    fn remove(&self, id: Uuid) {
        self.conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        debug!(conn_id = %id, "connection deregistered");
    }

    pub fn len(&self) -> usize {
        self.conns.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `msg` on every live connection without waiting. Returns how
    /// many connections accepted it; full or closed queues are skipped.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        let conns = self.conns.read().unwrap_or_else(|e| e.into_inner());
        conns
            .iter()
            .filter(|(id, tx)| match tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(conn_id = %id, error = %e, "broadcast skipped connection");
                    false
                }
            })
            .count()
    }
}
