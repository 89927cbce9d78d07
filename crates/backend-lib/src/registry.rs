// ============================
// presence-backend-lib/src/registry.rs
// ============================
//! In-memory presence bookkeeping.
//!
//! The registry owns every live [`Connection`] and answers "who is in this
//! session" queries. It performs no I/O and holds no locks; callers are
//! expected to serialize access (see [`crate::presence_actor`]).
use presence_common::{ConnectionId, Member};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Insertion sequence number, used to keep join order
type Seq = u64;

/// One joined connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub session_id: String,
}

impl Connection {
    /// Wire representation used in presence snapshots
    pub fn to_member(&self) -> Member {
        Member {
            connection_id: self.connection_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Reasons a join can be refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Display name is required")]
    MissingName,

    #[error("Session id is required")]
    MissingSession,

    #[error("Connection {0} has already joined a session")]
    DuplicateConnection(ConnectionId),
}

impl RegistryError {
    /// Error kind as sent to clients in `JoinRejected`
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::MissingName => "MissingName",
            RegistryError::MissingSession => "MissingSession",
            RegistryError::DuplicateConnection(_) => "DuplicateConnection",
        }
    }
}

#[derive(Debug)]
struct Entry {
    seq: Seq,
    connection: Connection,
}

/// Mapping of connection id to connection, indexed by session
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: HashMap<ConnectionId, Entry>,
    // session id -> members keyed by join sequence
    sessions: HashMap<String, BTreeMap<Seq, ConnectionId>>,
    next_seq: Seq,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a session.
    ///
    /// Name and session id are trimmed before they are stored. On error the
    /// registry is left untouched.
    pub fn add(
        &mut self,
        connection_id: ConnectionId,
        display_name: &str,
        session_id: &str,
    ) -> Result<Connection, RegistryError> {
        if self.connections.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(RegistryError::MissingName);
        }

        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(RegistryError::MissingSession);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let connection = Connection {
            connection_id: connection_id.clone(),
            display_name: display_name.to_string(),
            session_id: session_id.to_string(),
        };

        self.sessions
            .entry(connection.session_id.clone())
            .or_default()
            .insert(seq, connection_id.clone());
        self.connections.insert(
            connection_id,
            Entry {
                seq,
                connection: connection.clone(),
            },
        );

        Ok(connection)
    }

    /// Remove a connection, returning it if it was registered.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Connection> {
        let Entry { seq, connection } = self.connections.remove(connection_id)?;

        if let Some(members) = self.sessions.get_mut(&connection.session_id) {
            members.remove(&seq);
            if members.is_empty() {
                self.sessions.remove(&connection.session_id);
            }
        }

        Some(connection)
    }

    /// Live members of a session in join order. Unknown sessions are empty.
    ///
    /// The id is trimmed the same way `add` trims it.
    pub fn members_of(&self, session_id: &str) -> Vec<Connection> {
        self.sessions
            .get(session_id.trim())
            .map(|members| {
                members
                    .values()
                    .filter_map(|id| self.connections.get(id))
                    .map(|entry| entry.connection.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id).map(|entry| &entry.connection)
    }

    /// Number of joined connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of sessions with at least one member
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
