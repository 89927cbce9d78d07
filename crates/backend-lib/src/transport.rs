// ============================
// presence-backend-lib/src/transport.rs
// ============================
//! Outbound delivery capabilities and the in-process hub implementing them.
use crate::metrics::HUB_DELIVERY_DROPPED;
use dashmap::DashMap;
use metrics::counter;
use presence_common::{ConnectionId, ServerToClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// What the protocol handler needs from the network layer.
///
/// Delivery is fire-and-forget: implementations must not block and report
/// nothing back to the caller.
pub trait Transport {
    /// Deliver to exactly one connection
    fn send_to(&mut self, connection_id: &ConnectionId, message: ServerToClient);

    /// Deliver to every subscriber of a session group
    fn send_to_room(&mut self, session_id: &str, message: ServerToClient);

    /// Deliver to every subscriber of a session group except `except`
    fn send_to_room_except(
        &mut self,
        session_id: &str,
        except: &ConnectionId,
        message: ServerToClient,
    );

    /// Add a connection to a session group
    fn subscribe(&mut self, connection_id: &ConnectionId, session_id: &str);

    /// Drop a connection from a session group
    fn unsubscribe(&mut self, connection_id: &ConnectionId, session_id: &str);
}

/// Outbound queues of all live connections.
///
/// Cloning is cheap; every WebSocket task holds a copy to attach and detach
/// its own queue.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    outbound: Arc<DashMap<ConnectionId, mpsc::Sender<ServerToClient>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound queue of a freshly connected client
    pub fn attach(&self, connection_id: ConnectionId, tx: mpsc::Sender<ServerToClient>) {
        self.outbound.insert(connection_id, tx);
    }

    /// Forget a connection's outbound queue
    pub fn detach(&self, connection_id: &ConnectionId) {
        self.outbound.remove(connection_id);
    }

    /// Number of attached connections
    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Queue a message for one connection without waiting
    pub fn deliver(&self, connection_id: &ConnectionId, message: ServerToClient) {
        let Some(tx) = self.outbound.get(connection_id).map(|entry| entry.value().clone()) else {
            tracing::debug!(%connection_id, "dropping message for detached connection");
            return;
        };

        match tx.try_send(message) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                counter!(HUB_DELIVERY_DROPPED).increment(1);
                tracing::warn!(%connection_id, "outbound queue full, message dropped");
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(%connection_id, "outbound queue closed");
            },
        }
    }
}

/// [`Transport`] backed by a [`ConnectionHub`] plus session groups.
///
/// Owned by the presence actor, so the group table needs no locking.
pub struct HubTransport {
    hub: ConnectionHub,
    // session id -> subscribers in subscription order
    groups: HashMap<String, Vec<ConnectionId>>,
}

impl HubTransport {
    pub fn new(hub: ConnectionHub) -> Self {
        Self {
            hub,
            groups: HashMap::new(),
        }
    }

    /// Current subscribers of a session group
    pub fn subscribers(&self, session_id: &str) -> &[ConnectionId] {
        self.groups.get(session_id).map_or(&[], Vec::as_slice)
    }
}

impl Transport for HubTransport {
    fn send_to(&mut self, connection_id: &ConnectionId, message: ServerToClient) {
        self.hub.deliver(connection_id, message);
    }

    fn send_to_room(&mut self, session_id: &str, message: ServerToClient) {
        for connection_id in self.subscribers(session_id) {
            self.hub.deliver(connection_id, message.clone());
        }
    }

    fn send_to_room_except(
        &mut self,
        session_id: &str,
        except: &ConnectionId,
        message: ServerToClient,
    ) {
        for connection_id in self.subscribers(session_id) {
            if connection_id != except {
                self.hub.deliver(connection_id, message.clone());
            }
        }
    }

    fn subscribe(&mut self, connection_id: &ConnectionId, session_id: &str) {
        let group = self.groups.entry(session_id.to_string()).or_default();
        if !group.contains(connection_id) {
            group.push(connection_id.clone());
        }
    }

    fn unsubscribe(&mut self, connection_id: &ConnectionId, session_id: &str) {
        if let Some(group) = self.groups.get_mut(session_id) {
            group.retain(|id| id != connection_id);
            if group.is_empty() {
                self.groups.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(hub: &ConnectionHub, id: &str) -> mpsc::Receiver<ServerToClient> {
        let (tx, rx) = mpsc::channel(8);
        hub.attach(id.into(), tx);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<ServerToClient>) -> Vec<ServerToClient> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_room_delivery_respects_groups() {
        let hub = ConnectionHub::new();
        let mut rx1 = attach(&hub, "c1");
        let mut rx2 = attach(&hub, "c2");
        let mut rx3 = attach(&hub, "c3");

        let mut transport = HubTransport::new(hub);
        transport.subscribe(&"c1".into(), "r1");
        transport.subscribe(&"c2".into(), "r1");
        transport.subscribe(&"c3".into(), "r2");

        transport.send_to_room("r1", ServerToClient::admin("all"));
        transport.send_to_room_except("r1", &"c1".into(), ServerToClient::admin("others"));
        transport.send_to(&"c3".into(), ServerToClient::admin("direct"));

        assert_eq!(drain(&mut rx1), vec![ServerToClient::admin("all")]);
        assert_eq!(
            drain(&mut rx2),
            vec![ServerToClient::admin("all"), ServerToClient::admin("others")]
        );
        assert_eq!(drain(&mut rx3), vec![ServerToClient::admin("direct")]);
    }

    #[test]
    fn test_unsubscribe_removes_empty_group() {
        let mut transport = HubTransport::new(ConnectionHub::new());
        transport.subscribe(&"c1".into(), "r1");
        transport.subscribe(&"c1".into(), "r1");
        assert_eq!(transport.subscribers("r1").len(), 1);

        transport.unsubscribe(&"c1".into(), "r1");
        assert!(transport.subscribers("r1").is_empty());
        assert!(transport.groups.is_empty());
    }

    #[test]
    fn test_deliver_to_detached_or_full_queue_is_silent() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.attach("c1".into(), tx);

        hub.deliver(&"c1".into(), ServerToClient::admin("one"));
        hub.deliver(&"c1".into(), ServerToClient::admin("two"));
        hub.deliver(&"ghost".into(), ServerToClient::admin("lost"));

        assert_eq!(drain(&mut rx), vec![ServerToClient::admin("one")]);

        hub.detach(&"c1".into());
        assert!(hub.is_empty());
        hub.deliver(&"c1".into(), ServerToClient::admin("after"));
        assert!(rx.try_recv().is_err());
    }
}
