// ============================
// crates/backend-lib/tests/websocket_flow.rs
// ============================
//! End-to-end tests over a real socket.

use std::net::SocketAddr;
use std::time::Duration;

use chatroom_backend::{ws_router::create_router, AppState};
use chatroom_common::{ClientEvent, JoinRoom, Room, SendMessage, ServerEvent, TypingNotice};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port with a single room `lobby`
async fn setup_server() -> (SocketAddr, AppState) {
    let state = AppState::in_memory();
    state
        .store
        .create_room(Room::with_id("lobby", "Lobby"))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect");
    stream
}

async fn send(client: &mut Client, event: ClientEvent) {
    let json = serde_json::to_string(&event).unwrap();
    client.send(Message::text(json)).await.unwrap();
}

async fn next_event(client: &mut Client, context: &str) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {context}"))
            .unwrap_or_else(|| panic!("stream closed waiting for {context}"))
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(waited.is_err(), "unexpected frame: {waited:?}");
}

fn join(username: &str) -> ClientEvent {
    ClientEvent::JoinRoom(JoinRoom {
        room_id: "lobby".to_string(),
        username: username.to_string(),
    })
}

async fn active_users(state: &AppState) -> u64 {
    state.store.find_room("lobby").await.unwrap().active_users
}

#[tokio::test]
async fn test_two_clients_chat() {
    let (addr, state) = setup_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, join("alice")).await;
    match next_event(&mut alice, "alice room-joined").await {
        ServerEvent::RoomJoined(joined) => {
            assert_eq!(joined.room_name, "Lobby");
            assert_eq!(joined.active_users, 1);
        },
        other => panic!("expected room-joined, got {other:?}"),
    }

    send(&mut bob, join("bob")).await;
    assert!(matches!(
        next_event(&mut bob, "bob room-joined").await,
        ServerEvent::RoomJoined(_)
    ));
    match next_event(&mut alice, "bob joined notice").await {
        ServerEvent::UserJoined(change) => {
            assert_eq!(change.username, "bob");
            assert_eq!(change.message, "bob joined the chat");
            assert_eq!(change.active_users, 2);
        },
        other => panic!("expected user-joined, got {other:?}"),
    }

    send(
        &mut bob,
        ClientEvent::Typing(TypingNotice {
            room_id: "lobby".to_string(),
            username: "bob".to_string(),
        }),
    )
    .await;
    match next_event(&mut alice, "typing").await {
        ServerEvent::UserTyping(typist) => assert_eq!(typist.username, "bob"),
        other => panic!("expected user-typing, got {other:?}"),
    }

    send(
        &mut alice,
        ClientEvent::SendMessage(SendMessage {
            room_id: "lobby".to_string(),
            username: "alice".to_string(),
            message: "hi".to_string(),
        }),
    )
    .await;
    for client in [&mut alice, &mut bob] {
        match next_event(client, "receive-message").await {
            ServerEvent::ReceiveMessage(line) => {
                assert_eq!(line.username, "alice");
                assert_eq!(line.message, "hi");
            },
            other => panic!("expected receive-message, got {other:?}"),
        }
    }
    // bob never hears his own typing notice
    assert_silent(&mut bob).await;

    bob.close(None).await.unwrap();
    match next_event(&mut alice, "bob left notice").await {
        ServerEvent::UserLeft(change) => {
            assert_eq!(change.message, "bob left the chat");
            assert_eq!(change.active_users, 1);
        },
        other => panic!("expected user-left, got {other:?}"),
    }
    assert_eq!(active_users(&state).await, 1);

    let history = state.store.list_messages("lobby", 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "hi");
}

#[tokio::test]
async fn test_bad_frames_get_error_events() {
    let (addr, _state) = setup_server().await;
    let mut client = connect(addr).await;

    client.send(Message::text("not json")).await.unwrap();
    match next_event(&mut client, "malformed error").await {
        ServerEvent::Error(reason) => assert!(reason.starts_with("Malformed event")),
        other => panic!("expected error, got {other:?}"),
    }

    send(
        &mut client,
        ClientEvent::JoinRoom(JoinRoom {
            room_id: "missing".to_string(),
            username: "carol".to_string(),
        }),
    )
    .await;
    match next_event(&mut client, "room not found").await {
        ServerEvent::Error(reason) => assert_eq!(reason, "Room not found"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropped_socket_releases_presence() {
    let (addr, state) = setup_server().await;
    let mut client = connect(addr).await;
    send(&mut client, join("dave")).await;
    next_event(&mut client, "room-joined").await;
    assert_eq!(active_users(&state).await, 1);

    drop(client);

    for _ in 0..50 {
        if active_users(&state).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(active_users(&state).await, 0);
    assert!(state.coordinator.members("lobby").await.unwrap().is_empty());
}
