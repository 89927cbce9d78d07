// =============
// tests/presence_flow.rs
// =============
//! Join/leave flows through the presence actor and the connection hub.
use presence_backend_lib::error::AppError;
use presence_backend_lib::presence_actor::{spawn_presence_actor, PresenceHandle};
use presence_backend_lib::registry::RegistryError;
use presence_backend_lib::transport::{ConnectionHub, HubTransport};
use presence_common::{ConnectionId, ServerToClient};
use tokio::sync::mpsc;

struct Client {
    id: ConnectionId,
    rx: mpsc::Receiver<ServerToClient>,
}

impl Client {
    /// Everything queued for this client so far
    fn drain(&mut self) -> Vec<ServerToClient> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

fn setup() -> (PresenceHandle, ConnectionHub) {
    let hub = ConnectionHub::new();
    let presence = spawn_presence_actor(HubTransport::new(hub.clone()));
    (presence, hub)
}

fn connect(hub: &ConnectionHub, id: &str) -> Client {
    let (tx, rx) = mpsc::channel(64);
    hub.attach(id.into(), tx);
    Client { id: id.into(), rx }
}

async fn join(presence: &PresenceHandle, client: &Client, name: &str, session: &str) {
    presence
        .join(client.id.clone(), name.to_string(), session.to_string())
        .await
        .expect("join should succeed");
}

/// Waits until every message queued before this call has been handled
async fn settle(presence: &PresenceHandle) {
    presence.stats().await.unwrap();
}

fn snapshot_names(messages: &[ServerToClient]) -> Vec<Vec<String>> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            ServerToClient::SessionData(snapshot) => Some(
                snapshot
                    .members
                    .iter()
                    .map(|m| m.display_name.clone())
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_alice_and_bob_scenario() {
    let (presence, hub) = setup();
    let mut alice = connect(&hub, "c1");
    let mut bob = connect(&hub, "c2");

    join(&presence, &alice, "Alice", "r1").await;
    join(&presence, &bob, "Bob", "r1").await;

    let alice_msgs = alice.drain();
    assert_eq!(
        alice_msgs,
        vec![
            ServerToClient::admin("Alice, welcome to session r1."),
            alice_msgs[1].clone(),
            ServerToClient::JoinAccepted {
                connection_id: "c1".into()
            },
            ServerToClient::admin("Bob has joined!"),
            alice_msgs[4].clone(),
        ]
    );
    assert_eq!(
        snapshot_names(&alice_msgs),
        vec![vec!["Alice"], vec!["Alice", "Bob"]]
    );

    let bob_msgs = bob.drain();
    assert_eq!(bob_msgs.len(), 3);
    assert_eq!(bob_msgs[0], ServerToClient::admin("Bob, welcome to session r1."));
    assert_eq!(snapshot_names(&bob_msgs), vec![vec!["Alice", "Bob"]]);
    assert_eq!(
        bob_msgs[2],
        ServerToClient::JoinAccepted {
            connection_id: "c2".into()
        }
    );

    // Alice's socket goes away
    hub.detach(&alice.id);
    presence.disconnect(alice.id.clone()).unwrap();
    settle(&presence).await;

    let bob_msgs = bob.drain();
    assert_eq!(bob_msgs[0], ServerToClient::admin("Alice has left."));
    assert_eq!(snapshot_names(&bob_msgs), vec![vec!["Bob"]]);
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_missing_session_broadcasts_nothing() {
    let (presence, hub) = setup();
    let mut bystander = connect(&hub, "c0");
    join(&presence, &bystander, "Zed", "r1").await;
    bystander.drain();

    let mut alice = connect(&hub, "c1");
    let err = presence
        .join(alice.id.clone(), "Alice".to_string(), String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Registry(RegistryError::MissingSession)));

    assert_eq!(
        alice.drain(),
        vec![ServerToClient::JoinRejected {
            error: "MissingSession".to_string()
        }]
    );
    assert!(presence.members(String::new()).await.unwrap().is_empty());
    assert!(bystander.drain().is_empty());
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (presence, hub) = setup();
    let mut alice = connect(&hub, "c1");
    let mut bob = connect(&hub, "c2");
    let carol = connect(&hub, "c3");

    join(&presence, &alice, "Alice", "r1").await;
    join(&presence, &bob, "Bob", "r2").await;
    join(&presence, &carol, "Carol", "r2").await;
    presence.disconnect(carol.id.clone()).unwrap();
    settle(&presence).await;

    let r1 = presence.members("r1".to_string()).await.unwrap();
    let r2 = presence.members("r2".to_string()).await.unwrap();
    assert_eq!(r1.len(), 1);
    assert_eq!(r1[0].display_name, "Alice");
    assert_eq!(r2.len(), 1);
    assert_eq!(r2[0].display_name, "Bob");

    for msg in alice.drain() {
        if let ServerToClient::SessionData(snapshot) = &msg {
            assert_eq!(snapshot.session_id, "r1");
        }
        assert_ne!(msg, ServerToClient::admin("Carol has joined!"));
        assert_ne!(msg, ServerToClient::admin("Carol has left."));
    }
    let bob_msgs = bob.drain();
    assert!(bob_msgs.contains(&ServerToClient::admin("Carol has joined!")));
    assert!(bob_msgs.contains(&ServerToClient::admin("Carol has left.")));
}

#[tokio::test]
async fn test_rejoin_after_disconnect_needs_new_connection() {
    let (presence, hub) = setup();
    let alice = connect(&hub, "c1");
    join(&presence, &alice, "Alice", "r1").await;

    let err = presence
        .join(alice.id.clone(), "Alice".to_string(), "r1".to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Registry(RegistryError::DuplicateConnection(_))
    ));
    assert_eq!(presence.stats().await.unwrap().connections, 1);

    presence.disconnect(alice.id.clone()).unwrap();
    let again = connect(&hub, "c1-reconnect");
    join(&presence, &again, "Alice", "r1").await;

    let members = presence.members("r1".to_string()).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].connection_id, ConnectionId::from("c1-reconnect"));
}

#[tokio::test]
async fn test_disconnect_of_unknown_connection_is_ignored() {
    let (presence, hub) = setup();
    let mut alice = connect(&hub, "c1");
    join(&presence, &alice, "Alice", "r1").await;
    alice.drain();

    presence.disconnect("never-joined".into()).unwrap();
    settle(&presence).await;

    assert!(alice.drain().is_empty());
    assert_eq!(presence.stats().await.unwrap().connections, 1);
}
