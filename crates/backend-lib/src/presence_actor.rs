// ============================
// presence-backend-lib/src/presence_actor.rs
// ============================
//! Single task that owns the presence registry.
//!
//! Every join, disconnect and query is a message in one inbox, handled to
//! completion before the next one starts. Membership changes of a session
//! are therefore broadcast in exactly the order they were applied.
use crate::error::AppError;
use crate::metrics::{
    PRESENCE_CONNECTIONS, PRESENCE_JOIN, PRESENCE_JOIN_REJECTED, PRESENCE_LEAVE,
    PRESENCE_SESSIONS,
};
use crate::protocol::SessionProtocolHandler;
use crate::registry::{Connection, PresenceRegistry, RegistryError};
use crate::transport::Transport;
use metrics::{counter, gauge};
use presence_common::{ConnectionId, Member};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

/// Message sent *into* the actor
#[derive(Debug)]
pub enum ActorMsg {
    Join {
        connection_id: ConnectionId,
        display_name: String,
        session_id: String,
        resp_tx: oneshot::Sender<Result<Connection, RegistryError>>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Members {
        session_id: String,
        resp_tx: oneshot::Sender<Vec<Member>>,
    },
    Stats {
        resp_tx: oneshot::Sender<PresenceStats>,
    },
}

/// Registry size counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceStats {
    pub connections: usize,
    pub sessions: usize,
}

/// Handle that other components keep
#[derive(Clone)]
pub struct PresenceHandle {
    cmd_tx: mpsc::UnboundedSender<ActorMsg>,
}

impl PresenceHandle {
    /// Run the join protocol for `connection_id`.
    ///
    /// The requester has already been answered through the transport when
    /// this returns; the result is for the caller's own bookkeeping.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        display_name: String,
        session_id: String,
    ) -> Result<Connection, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();

        self.cmd_tx.send(ActorMsg::Join {
            connection_id,
            display_name,
            session_id,
            resp_tx,
        })?;

        Ok(resp_rx.await??)
    }

    /// Queue the disconnect protocol for `connection_id`.
    ///
    /// Does not wait, so it can be called from `Drop`.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.cmd_tx.send(ActorMsg::Disconnect { connection_id })?;
        Ok(())
    }

    /// Current members of a session in join order
    pub async fn members(&self, session_id: String) -> Result<Vec<Member>, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Members { session_id, resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub async fn stats(&self) -> Result<PresenceStats, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Stats { resp_tx })?;
        Ok(resp_rx.await?)
    }
}

pub struct PresenceActor<T: Transport> {
    handler: SessionProtocolHandler<T>,
}

impl<T: Transport> PresenceActor<T> {
    pub fn new(registry: PresenceRegistry, transport: T) -> Self {
        PresenceActor {
            handler: SessionProtocolHandler::new(registry, transport),
        }
    }

    pub fn handle(&mut self, msg: ActorMsg) {
        match msg {
            ActorMsg::Join {
                connection_id,
                display_name,
                session_id,
                resp_tx,
            } => {
                let result = self.handler.join(&connection_id, &display_name, &session_id);
                match &result {
                    Ok(_) => counter!(PRESENCE_JOIN).increment(1),
                    Err(err) => {
                        counter!(PRESENCE_JOIN_REJECTED, "kind" => err.kind()).increment(1)
                    },
                }
                self.record_sizes();
                let _ = resp_tx.send(result);
            },
            ActorMsg::Disconnect { connection_id } => {
                if self.handler.disconnect(&connection_id).is_some() {
                    counter!(PRESENCE_LEAVE).increment(1);
                    self.record_sizes();
                }
            },
            ActorMsg::Members { session_id, resp_tx } => {
                let members = self
                    .handler
                    .members_of(&session_id)
                    .iter()
                    .map(Connection::to_member)
                    .collect();
                let _ = resp_tx.send(members);
            },
            ActorMsg::Stats { resp_tx } => {
                let _ = resp_tx.send(self.stats());
            },
        }
    }

    pub fn stats(&self) -> PresenceStats {
        let registry = self.handler.registry();
        PresenceStats {
            connections: registry.len(),
            sessions: registry.session_count(),
        }
    }

    fn record_sizes(&self) {
        let stats = self.stats();
        gauge!(PRESENCE_CONNECTIONS).set(stats.connections as f64);
        gauge!(PRESENCE_SESSIONS).set(stats.sessions as f64);
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
        tracing::debug!("presence actor stopped");
    }
}

/// Spawn a presence actor over `transport` and return its handle
pub fn spawn_presence_actor<T>(transport: T) -> PresenceHandle
where
    T: Transport + Send + 'static,
{
    let (cmd_tx, rx_cmd) = mpsc::unbounded_channel();
    let actor = PresenceActor::new(PresenceRegistry::new(), transport);

    tokio::spawn(async move {
        actor.run(rx_cmd).await;
    });

    PresenceHandle { cmd_tx }
}
