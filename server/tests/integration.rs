//! Integration tests for the blobfield server.
//!
//! These tests start a real server instance and connect via WebSocket
//! to verify end-to-end behavior.

use blobfield_server::accounts::MemoryAccounts;
use blobfield_server::config::ServerConfig;
use blobfield_server::connection::QueueCapacity;
use blobfield_server::hub::Hub;
use blobfield_server::states::Services;
use blobfield_server::world::{Spore, World};
use blobfield_server::ws::{router, AppState};
use blobfield_shared::protocol::{
    GuestLoginRequestMsg, LoginRequestMsg, Msg, Packet, PlayerMsg, RegisterRequestMsg,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start a test server on a random available port and return the WebSocket
/// URL plus the world it serves.
async fn start_test_server() -> (String, Arc<World>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ServerConfig {
        listen_addr: addr.to_string(),
        bcrypt_cost: 4,
        ..Default::default()
    };
    config.spores.pool_size = 0;

    let world = Arc::new(World::new());
    let (hub, hub_handle) = Hub::new(config.clone(), Arc::clone(&world));
    tokio::spawn(hub.run());

    let app = router(AppState {
        hub: hub_handle,
        services: Services {
            world: Arc::clone(&world),
            accounts: Arc::new(MemoryAccounts::new()),
            config: Arc::new(config.clone()),
        },
        capacity: QueueCapacity {
            outbound: config.outbound_capacity,
            inbox: config.inbox_capacity,
        },
    });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), world)
}

/// Connect to the server and return the WebSocket stream plus our id.
async fn connect(url: &str) -> (Ws, u64) {
    let (mut ws, _) = connect_async(url).await.expect("Failed to connect");
    match recv_msg(&mut ws).await.msg {
        Msg::Id(m) => (ws, m.id),
        other => panic!("Expected Id, got {:?}", other),
    }
}

async fn send(ws: &mut Ws, msg: Msg) {
    let json = Packet::new(0, msg).encode().unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Read the next text message and parse it as a packet.
async fn recv_msg(ws: &mut Ws) -> Packet {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for server message");
        match next {
            Some(Ok(Message::Text(text))) => {
                return Packet::decode(&text).expect("Failed to parse server message");
            }
            Some(Ok(_)) => continue, // Skip ping/pong
            Some(Err(e)) => panic!("WebSocket error: {}", e),
            None => panic!("WebSocket closed unexpectedly"),
        }
    }
}

/// Whatever arrives within `timeout`, if anything.
async fn recv_msg_timeout(ws: &mut Ws, timeout: Duration) -> Option<Packet> {
    tokio::time::timeout(timeout, recv_msg(ws)).await.ok()
}

async fn recv_player(ws: &mut Ws) -> PlayerMsg {
    loop {
        if let Msg::Player(p) = recv_msg(ws).await.msg {
            return p;
        }
    }
}

async fn guest_login(ws: &mut Ws, name: &str) -> PlayerMsg {
    send(
        ws,
        Msg::GuestLoginRequest(GuestLoginRequestMsg {
            username: name.to_string(),
        }),
    )
    .await;
    match recv_msg(ws).await.msg {
        Msg::OkResponse => {}
        other => panic!("Expected OkResponse, got {:?}", other),
    }
    recv_player(ws).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connect_and_receive_id() {
    let (url, _) = start_test_server().await;
    let (_ws1, id1) = connect(&url).await;
    let (_ws2, id2) = connect(&url).await;

    assert!(id1 > 0, "id should be positive");
    assert_ne!(id1, id2, "Each client should get a unique ID");
}

#[tokio::test]
async fn test_guest_login_spawns_player() {
    let (url, world) = start_test_server().await;
    let (mut ws, id) = connect(&url).await;

    let player = guest_login(&mut ws, "alice").await;
    assert_eq!(player.id, id);
    assert_eq!(player.name, "alice");
    assert_eq!(player.radius, 20.0);
    assert!(world.players.get(id).is_some());
}

#[tokio::test]
async fn test_spore_claim_grows_player() {
    let (url, world) = start_test_server().await;
    let (mut ws, _) = connect(&url).await;
    let player = guest_login(&mut ws, "alice").await;

    let spore_id = world.spores.add(Spore {
        x: player.x + 5.0,
        y: player.y,
        radius: 10.0,
    });
    send(&mut ws, Msg::spore_consumed(spore_id)).await;

    let grown = recv_player(&mut ws).await;
    assert!(
        (grown.radius - 22.36).abs() < 0.01,
        "radius should grow to ~22.36, got {}",
        grown.radius
    );
    assert!(world.spores.get(spore_id).is_none());
}

#[tokio::test]
async fn test_far_claim_is_ignored_silently() {
    let (url, world) = start_test_server().await;
    let (mut ws1, id1) = connect(&url).await;
    let (mut ws2, _) = connect(&url).await;
    let player = guest_login(&mut ws1, "alice").await;
    guest_login(&mut ws2, "bob").await;
    // Each learns about the other
    recv_player(&mut ws1).await;
    recv_player(&mut ws2).await;

    let spore_id = world.spores.add(Spore {
        x: player.x + 1000.0,
        y: player.y,
        radius: 10.0,
    });
    send(&mut ws1, Msg::spore_consumed(spore_id)).await;

    // No reply, no broadcast, nothing removed
    assert!(recv_msg_timeout(&mut ws1, Duration::from_millis(200)).await.is_none());
    assert!(recv_msg_timeout(&mut ws2, Duration::from_millis(200)).await.is_none());
    assert!(world.spores.get(spore_id).is_some());
    assert_eq!(world.players.get(id1).unwrap().radius(), 20.0);

    // The claimant is still connected and in the world
    send(&mut ws1, Msg::chat("still here")).await;
    let packet = recv_msg(&mut ws2).await;
    assert_eq!(packet.sender_id, id1);
    match packet.msg {
        Msg::Chat(chat) => assert_eq!(chat.msg, "still here"),
        other => panic!("Expected Chat, got {:?}", other),
    }
}

#[tokio::test]
async fn test_far_player_claim_is_ignored_silently() {
    let (url, world) = start_test_server().await;
    let (mut ws1, id1) = connect(&url).await;
    let (mut ws2, id2) = connect(&url).await;
    guest_login(&mut ws1, "alice").await;
    let bob = guest_login(&mut ws2, "bob").await;
    recv_player(&mut ws1).await;
    recv_player(&mut ws2).await;

    // Big enough to eat bob, but nowhere near him
    world.players.update(id1, |alice| {
        alice.absorb(40.0);
        alice.x = bob.x + 1000.0;
        alice.y = bob.y;
    });
    send(&mut ws1, Msg::player_consumed(id2)).await;

    assert!(recv_msg_timeout(&mut ws1, Duration::from_millis(200)).await.is_none());
    assert!(recv_msg_timeout(&mut ws2, Duration::from_millis(200)).await.is_none());
    assert!(world.players.get(id2).is_some());
    assert!((world.players.get(id1).unwrap().radius() - 44.72).abs() < 0.01);
}

#[tokio::test]
async fn test_register_then_login() {
    let (url, _) = start_test_server().await;
    let (mut ws, _) = connect(&url).await;

    send(
        &mut ws,
        Msg::RegisterRequest(RegisterRequestMsg {
            username: "Carol".to_string(),
            password: "hunter2".to_string(),
        }),
    )
    .await;
    assert!(matches!(recv_msg(&mut ws).await.msg, Msg::OkResponse));

    send(
        &mut ws,
        Msg::LoginRequest(LoginRequestMsg {
            username: "carol".to_string(),
            password: "wrong".to_string(),
        }),
    )
    .await;
    match recv_msg(&mut ws).await.msg {
        Msg::DenyResponse(d) => assert_eq!(d.reason, "Invalid username or password"),
        other => panic!("Expected DenyResponse, got {:?}", other),
    }

    send(
        &mut ws,
        Msg::LoginRequest(LoginRequestMsg {
            username: "carol".to_string(),
            password: "hunter2".to_string(),
        }),
    )
    .await;
    assert!(matches!(recv_msg(&mut ws).await.msg, Msg::OkResponse));
    assert_eq!(recv_player(&mut ws).await.name, "carol");
}

#[tokio::test]
async fn test_peers_see_join_and_leave() {
    let (url, world) = start_test_server().await;
    let (mut ws1, _) = connect(&url).await;
    let (mut ws2, id2) = connect(&url).await;
    guest_login(&mut ws1, "alice").await;

    let bob = guest_login(&mut ws2, "bob").await;
    let seen = recv_player(&mut ws1).await;
    assert_eq!(seen.id, bob.id);
    assert_eq!(seen.name, "bob");

    ws2.close(None).await.unwrap();
    loop {
        let packet = recv_msg(&mut ws1).await;
        if let Msg::Disconnect(_) = packet.msg {
            assert_eq!(packet.sender_id, id2);
            break;
        }
    }

    // The player is removed as the connection finishes tearing down
    for _ in 0..50 {
        if world.players.get(id2).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(world.players.get(id2).is_none());
}
