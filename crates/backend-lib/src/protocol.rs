// ============================
// presence-backend-lib/src/protocol.rs
// ============================
//! Join / disconnect protocol.
//!
//! [`SessionProtocolHandler`] turns connection lifecycle events into registry
//! mutations plus the outbound messages every affected client must see:
//! - a private welcome and acknowledgment for the joining connection
//! - join/leave announcements for the other members
//! - a full presence snapshot after every membership change
//!
//! Snapshots are always complete member lists, never deltas, so each client
//! can replace its view wholesale.
use crate::registry::{Connection, PresenceRegistry, RegistryError};
use crate::transport::Transport;
use presence_common::{ConnectionId, ServerToClient, SessionSnapshot};

pub struct SessionProtocolHandler<T: Transport> {
    registry: PresenceRegistry,
    transport: T,
}

impl<T: Transport> SessionProtocolHandler<T> {
    pub fn new(registry: PresenceRegistry, transport: T) -> Self {
        Self { registry, transport }
    }

    /// Handle a join request from `connection_id`.
    ///
    /// A rejected join only answers the requester; nobody else is told.
    pub fn join(
        &mut self,
        connection_id: &ConnectionId,
        display_name: &str,
        session_id: &str,
    ) -> Result<Connection, RegistryError> {
        let connection = match self
            .registry
            .add(connection_id.clone(), display_name, session_id)
        {
            Ok(connection) => connection,
            Err(err) => {
                tracing::debug!(%connection_id, error = %err, "join rejected");
                self.transport.send_to(
                    connection_id,
                    ServerToClient::JoinRejected {
                        error: err.kind().to_string(),
                    },
                );
                return Err(err);
            },
        };

        let session_id = connection.session_id.as_str();
        let name = connection.display_name.as_str();

        self.transport.subscribe(connection_id, session_id);
        self.transport.send_to(
            connection_id,
            ServerToClient::admin(format!("{name}, welcome to session {session_id}.")),
        );
        self.transport.send_to_room_except(
            session_id,
            connection_id,
            ServerToClient::admin(format!("{name} has joined!")),
        );
        let snapshot = self.snapshot(session_id);
        self.transport.send_to_room(session_id, snapshot);
        self.transport.send_to(
            connection_id,
            ServerToClient::JoinAccepted {
                connection_id: connection_id.clone(),
            },
        );

        tracing::info!(%connection_id, session_id, display_name = name, "member joined");
        Ok(connection)
    }

    /// Handle loss of `connection_id`. Unknown ids are ignored.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Option<Connection> {
        let connection = self.registry.remove(connection_id)?;
        let session_id = connection.session_id.as_str();

        self.transport.unsubscribe(connection_id, session_id);
        self.transport.send_to_room(
            session_id,
            ServerToClient::admin(format!("{} has left.", connection.display_name)),
        );
        let snapshot = self.snapshot(session_id);
        self.transport.send_to_room(session_id, snapshot);

        tracing::info!(
            %connection_id,
            session_id,
            display_name = %connection.display_name,
            "member left"
        );
        Some(connection)
    }

    /// Read-only membership query
    pub fn members_of(&self, session_id: &str) -> Vec<Connection> {
        self.registry.members_of(session_id)
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn snapshot(&self, session_id: &str) -> ServerToClient {
        ServerToClient::SessionData(SessionSnapshot {
            session_id: session_id.to_string(),
            members: self
                .registry
                .members_of(session_id)
                .iter()
                .map(Connection::to_member)
                .collect(),
        })
    }
}
