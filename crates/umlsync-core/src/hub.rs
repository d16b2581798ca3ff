//! Outbound delivery to connections.
//!
//! Each connection owns one unbounded queue; its socket writer drains it.
//! Sending never blocks and never waits for the client.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use umlsync_protocol::ServerEvent;

/// An event queued for one connection. Shared between recipients.
pub type Outbound = Arc<ServerEvent>;

/// Registry of outbound queues, one per live connection.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    senders: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its queue.
    ///
    /// Registering an ID twice replaces the previous queue.
    pub fn register(&self, connection_id: &ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.senders.insert(connection_id.clone(), tx).is_some() {
            debug!(connection = %connection_id, "Replaced outbound queue");
        }
        rx
    }

    /// Remove a connection's queue.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.senders.contains_key(connection_id)
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Queue an event for one connection.
    ///
    /// Returns `false` if the connection is unknown or its writer is gone.
    pub fn send(&self, target: &ConnectionId, event: Outbound) -> bool {
        match self.senders.get(target) {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                trace!(connection = %target, "Dropped event for unknown connection");
                false
            }
        }
    }

    /// Queue the same event for every target.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a ConnectionId>,
        event: &Outbound,
    ) -> usize {
        targets
            .into_iter()
            .filter(|target| self.send(target, Arc::clone(event)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_send_unregister() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::new("a");

        let mut rx = hub.register(&a);
        assert!(hub.is_registered(&a));
        assert_eq!(hub.len(), 1);

        assert!(hub.send(&a, Arc::new(ServerEvent::connected("a"))));
        assert_eq!(*rx.try_recv().unwrap(), ServerEvent::connected("a"));

        assert!(hub.unregister(&a));
        assert!(!hub.send(&a, Arc::new(ServerEvent::connected("a"))));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_broadcast_counts_live_targets() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let ghost = ConnectionId::new("ghost");

        let mut rx_a = hub.register(&a);
        let rx_b = hub.register(&b);
        drop(rx_b);

        let event = Arc::new(ServerEvent::user_joined("c", 3));
        let delivered = hub.broadcast([&a, &b, &ghost], &event);

        assert_eq!(delivered, 1);
        assert_eq!(*rx_a.try_recv().unwrap(), ServerEvent::user_joined("c", 3));
    }
}
