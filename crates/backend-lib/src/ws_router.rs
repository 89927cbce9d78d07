// ============================
// presence-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use crate::error::AppError;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::presence_actor::{PresenceHandle, PresenceStats};
use crate::transport::ConnectionHub;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use presence_common::{ClientToServer, ConnectionId, ServerToClient, SessionSnapshot};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the router: WebSocket endpoint plus read-only HTTP views
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.allowed_origins);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/sessions/{session_id}", get(session_members))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    #[serde(flatten)]
    stats: PresenceStats,
}

async fn health(State(state): State<AppState>) -> Result<Json<Health>, AppError> {
    let stats = state.presence.stats().await?;
    Ok(Json(Health { status: "ok", stats }))
}

async fn session_members(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session_id = session_id.trim().to_string();
    let members = state.presence.members(session_id.clone()).await?;
    Ok(Json(SessionSnapshot {
        session_id,
        members,
    }))
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);

    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// How long to wait for the client's Close reply and for the writer to flush
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Runs the disconnect protocol when the connection task ends, whichever
/// way it ends.
struct DisconnectGuard {
    connection_id: ConnectionId,
    hub: ConnectionHub,
    presence: PresenceHandle,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.hub.detach(&self.connection_id);
        if let Err(e) = self.presence.disconnect(self.connection_id.clone()) {
            tracing::error!(connection_id = %self.connection_id, error = %e, "disconnect not delivered");
        }
        gauge!(WS_ACTIVE).decrement(1.0);
    }
}

/// Why the read loop stopped
enum Exit {
    /// Client closed, errored or vanished mid-stream
    ClientGone,
    /// Server ends the connection and owes the client a Close frame
    Close(CloseFrame),
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::generate();
    let (tx, mut rx) = socket.split();

    // Outbound queue, fed by the hub and by this task's direct replies
    let (server_tx, server_rx) =
        mpsc::channel::<ServerToClient>(state.settings.outbound_queue_capacity);
    state.hub.attach(connection_id.clone(), server_tx.clone());
    gauge!(WS_ACTIVE).increment(1.0);

    let guard = DisconnectGuard {
        connection_id: connection_id.clone(),
        hub: state.hub.clone(),
        presence: state.presence.clone(),
    };
    tracing::debug!(%connection_id, "websocket connected");

    let (close_tx, close_rx) = oneshot::channel();
    let mut send_task = tokio::spawn(write_loop(
        tx,
        server_rx,
        close_rx,
        state.settings.ping_interval(),
    ));

    let exit = read_loop(&mut rx, &state, &connection_id, &server_tx).await;
    tracing::debug!(%connection_id, "websocket disconnected");

    drop(guard);
    drop(server_tx);

    match exit {
        Exit::ClientGone => drop(close_tx),
        Exit::Close(frame) => {
            let _ = close_tx.send(frame);
            // finish the handshake: wait for the client's Close reply
            let _ = time::timeout(CLOSE_GRACE, async {
                while let Some(Ok(message)) = rx.next().await {
                    if matches!(message, Message::Close(_)) {
                        break;
                    }
                }
            })
            .await;
        },
    }

    if time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
        tracing::debug!(%connection_id, "writer did not finish in time");
        send_task.abort();
    }
}

/// Reads client frames until the connection should end.
///
/// Any inbound frame, including the Pong answering our Ping, counts as
/// activity; `idle_timeout` without one means the client is gone.
async fn read_loop(
    rx: &mut SplitStream<WebSocket>,
    state: &AppState,
    connection_id: &ConnectionId,
    server_tx: &mpsc::Sender<ServerToClient>,
) -> Exit {
    let idle_timeout = state.settings.idle_timeout();
    loop {
        let next = match time::timeout(idle_timeout, rx.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::warn!(%connection_id, "no frame or pong within idle timeout, closing");
                return Exit::Close(CloseFrame {
                    code: close_code::AWAY,
                    reason: "idle timeout".into(),
                });
            },
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(%connection_id, error = %e, "websocket read failed");
                return Exit::ClientGone;
            },
            None => return Exit::ClientGone,
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientToServer>(text.as_str()) {
                Ok(ClientToServer::Join {
                    display_name,
                    session_id,
                }) => {
                    match state
                        .presence
                        .join(connection_id.clone(), display_name, session_id)
                        .await
                    {
                        Ok(_) | Err(AppError::Registry(_)) => {},
                        Err(e) => {
                            tracing::error!(%connection_id, error = %e, "join failed");
                            return Exit::Close(CloseFrame {
                                code: close_code::ERROR,
                                reason: "presence unavailable".into(),
                            });
                        },
                    }
                },
                Err(e) => {
                    let reply = ServerToClient::MalformedMessage {
                        err_msg: e.to_string(),
                    };
                    if server_tx.try_send(reply).is_err() {
                        tracing::warn!(%connection_id, "could not report malformed message");
                    }
                },
            },
            Message::Close(_) => return Exit::ClientGone,
            // pings are answered by axum; binary frames are not part of the protocol
            Message::Pong(_) | Message::Ping(_) | Message::Binary(_) => {},
        }
    }
}

/// Forwards queued messages as JSON text and pings the client every
/// `ping_interval`. Runs until every sender of `server_rx` is gone, then
/// sends the Close frame if `close_rx` delivers one.
async fn write_loop(
    mut tx: SplitSink<WebSocket, Message>,
    mut server_rx: mpsc::Receiver<ServerToClient>,
    close_rx: oneshot::Receiver<CloseFrame>,
    ping_interval: Duration,
) {
    let mut ping = time::interval(ping_interval);
    // the first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            msg = server_rx.recv() => {
                let Some(msg) = msg else { break };
                if !forward(&mut tx, &msg).await {
                    return;
                }
            }
            _ = ping.tick() => {
                if tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }

    if let Ok(frame) = close_rx.await {
        let _ = tx.send(Message::Close(Some(frame))).await;
    }
    let _ = tx.flush().await;
}

/// Returns `false` once the socket can no longer be written to
async fn forward(tx: &mut SplitSink<WebSocket, Message>, message: &ServerToClient) -> bool {
    match send_json(tx, message).await {
        Ok(()) => true,
        Err(AppError::Json(e)) => {
            tracing::error!(error = %e, "failed to serialize server message");
            true
        },
        Err(e) => {
            tracing::debug!(error = %e, "websocket write failed");
            false
        },
    }
}

async fn send_json(
    tx: &mut SplitSink<WebSocket, Message>,
    message: &ServerToClient,
) -> Result<(), AppError> {
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json.into())).await?;
    Ok(())
}
