use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub Uuid);

/// A live transport to one client.
pub trait ClientConnection: Send + Sync {
    fn id(&self) -> Uuid;

    /// Queues `payload` for the client without waiting on the network.
    fn deliver(&self, payload: &str) -> Result<(), ConnectionClosed>;
}

/// Sending half of a socket's outbox. The socket task drains the other half;
/// once it is gone, delivery fails.
pub struct SocketHandle {
    id: Uuid,
    outbox: mpsc::UnboundedSender<String>,
}

impl SocketHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            SocketHandle {
                id: Uuid::new_v4(),
                outbox,
            },
            inbox,
        )
    }
}

impl ClientConnection for SocketHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn deliver(&self, payload: &str) -> Result<(), ConnectionClosed> {
        self.outbox
            .send(payload.to_string())
            .map_err(|_| ConnectionClosed(self.id))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Live connections per client id. An id is present only while it has at
/// least one connection.
#[derive(Default)]
pub struct NotificationRegistry {
    clients: Mutex<HashMap<String, Vec<Arc<dyn ClientConnection>>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<dyn ClientConnection>>>> {
        // Every mutation leaves the map consistent, so a poisoned lock is still usable.
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect(&self, client_id: &str, connection: Arc<dyn ClientConnection>) {
        let mut clients = self.clients();
        let connections = clients.entry(client_id.to_string()).or_default();
        connections.push(connection);
        debug!(client_id, connections = connections.len(), "Connection registered");
    }

    /// Removes one connection. Unknown ids and connections are ignored; a
    /// failed broadcast may already have pruned them.
    pub fn disconnect(&self, client_id: &str, connection_id: Uuid) -> bool {
        let mut clients = self.clients();
        let Some(connections) = clients.get_mut(client_id) else {
            return false;
        };

        let before = connections.len();
        connections.retain(|c| c.id() != connection_id);
        let removed = connections.len() != before;

        if connections.is_empty() {
            clients.remove(client_id);
            debug!(client_id, "Last connection gone, client removed");
        }
        removed
    }

    /// Sends `payload` to every connection of `client_id`, dropping the ones
    /// that fail.
    pub fn broadcast(&self, client_id: &str, payload: &str) -> BroadcastReport {
        let mut clients = self.clients();
        let Some(connections) = clients.get_mut(client_id) else {
            debug!(client_id, "No live connections, nothing to broadcast");
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport::default();
        connections.retain(|connection| match connection.deliver(payload) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                debug!(client_id, "Pruning dead connection: {}", e);
                report.pruned += 1;
                false
            }
        });

        if connections.is_empty() {
            clients.remove(client_id);
        }

        info!(
            client_id,
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast complete"
        );
        report
    }

    pub fn connection_count(&self, client_id: &str) -> usize {
        self.clients().get(client_id).map_or(0, Vec::len)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients().contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }
}
