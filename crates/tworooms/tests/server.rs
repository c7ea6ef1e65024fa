//! End-to-end tests: real WebSocket clients against a running server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tworooms::{GameConfig, HubConfig, TwoRoomsServer, TwoRoomsServerBuilder};
use tworooms_protocol::{Player, PlayerId, Room, RoomCode, ServerEvent};

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port and returns the address.
async fn start_server() -> String {
    start_with(TwoRoomsServer::builder()).await
}

async fn start_with(builder: TwoRoomsServerBuilder) -> String {
    let server = builder
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// Connects and consumes the `CONNECTED` greeting.
async fn connect(addr: &str) -> ClientWs {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    let hello = next_event(&mut ws).await;
    assert!(matches!(hello, ServerEvent::Connected { .. }), "got {hello:?}");
    ws
}

async fn send(ws: &mut ClientWs, action: serde_json::Value) {
    ws.send(Message::Text(action.to_string().into()))
        .await
        .expect("send");
}

async fn next_event(ws: &mut ClientWs) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("recv");
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                return serde_json::from_slice(&msg.into_data()).expect("decode");
            }
            _ => continue,
        }
    }
}

/// Reads frames until one matches, skipping room broadcasts in between.
async fn wait_for(ws: &mut ClientWs, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = next_event(ws).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn create_room(ws: &mut ClientWs, max_players: usize, is_public: bool) -> RoomCode {
    send(
        ws,
        json!({"type": "CREATE_ROOM", "payload": {"maxPlayers": max_players, "isPublic": is_public}}),
    )
    .await;
    match wait_for(ws, |e| matches!(e, ServerEvent::RoomCreated { .. })).await {
        ServerEvent::RoomCreated { room } => room.code,
        _ => unreachable!(),
    }
}

async fn join(ws: &mut ClientWs, code: &RoomCode) -> Player {
    send(ws, json!({"type": "JOIN_ROOM", "payload": {"roomCode": code}})).await;
    match wait_for(ws, |e| {
        matches!(e, ServerEvent::RoomJoined { .. } | ServerEvent::Error { .. })
    })
    .await
    {
        ServerEvent::RoomJoined { player, .. } => player,
        other => panic!("expected ROOM_JOINED, got {other:?}"),
    }
}

async fn get_room(ws: &mut ClientWs) -> Room {
    send(ws, json!({"type": "GET_ROOM"})).await;
    match wait_for(ws, |e| matches!(e, ServerEvent::RoomState { .. })).await {
        ServerEvent::RoomState { room } => room,
        _ => unreachable!(),
    }
}

/// Six bound clients in one room with the game started. Player ids are
/// in client order.
async fn six_player_game(addr: &str) -> (Vec<ClientWs>, Vec<PlayerId>) {
    let mut clients = Vec::new();
    for _ in 0..6 {
        clients.push(connect(addr).await);
    }
    let code = create_room(&mut clients[0], 10, false).await;
    let mut ids = Vec::new();
    for ws in &mut clients {
        ids.push(join(ws, &code).await.id);
    }
    send(&mut clients[0], json!({"type": "START_GAME"})).await;
    (clients, ids)
}

fn red_leader(room: &Room) -> Option<PlayerId> {
    room.round().and_then(|r| r.red_leader)
}

fn error_status(event: &ServerEvent) -> Option<u16> {
    match event {
        ServerEvent::Error { status, .. } => Some(*status),
        _ => None,
    }
}

// =========================================================================
// Connection lifecycle
// =========================================================================

#[tokio::test]
async fn test_connect_receives_greeting() {
    let addr = start_server().await;
    // `connect` asserts the CONNECTED frame.
    let _ws = connect(&addr).await;
}

#[tokio::test]
async fn test_malformed_frame_rejected_and_connection_survives() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Text("not json".into())).await.expect("send");
    match next_event(&mut ws).await {
        ServerEvent::Error { code, status, .. } => {
            assert_eq!(code, "INVALID_INPUT");
            assert_eq!(status, 400);
        }
        other => panic!("expected ERROR, got {other:?}"),
    }

    send(&mut ws, json!({"type": "LIST_PUBLIC_ROOMS", "payload": {}})).await;
    assert!(matches!(
        next_event(&mut ws).await,
        ServerEvent::RoomList { .. }
    ));
}

#[tokio::test]
async fn test_unbound_action_forbidden() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "START_GAME"})).await;
    let reply = next_event(&mut ws).await;
    assert_eq!(error_status(&reply), Some(403), "got {reply:?}");
}

// =========================================================================
// Lobby
// =========================================================================

#[tokio::test]
async fn test_create_then_join_makes_owner() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let code = create_room(&mut ws, 8, false).await;
    assert_eq!(code.as_str().len(), 6);

    let me = join(&mut ws, &code).await;
    assert!(me.is_owner);

    let room = get_room(&mut ws).await;
    assert_eq!(room.players.len(), 1);
    assert_eq!(room.players[0].id, me.id);
}

#[tokio::test]
async fn test_join_unknown_room_not_found() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "JOIN_ROOM", "payload": {"roomCode": "ZZZZZZ"}})).await;
    let reply = next_event(&mut ws).await;
    assert_eq!(error_status(&reply), Some(404), "got {reply:?}");
}

#[tokio::test]
async fn test_bound_clients_see_each_other_join() {
    let addr = start_server().await;
    let mut a = connect(&addr).await;
    let mut b = connect(&addr).await;

    let code = create_room(&mut a, 8, false).await;
    join(&mut a, &code).await;
    let bob = join(&mut b, &code).await;

    match wait_for(&mut a, |e| matches!(e, ServerEvent::PlayerJoined { .. })).await {
        ServerEvent::PlayerJoined { player } => assert_eq!(player.id, bob.id),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_list_public_rooms_includes_new_room() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let public = create_room(&mut ws, 8, true).await;
    let private = create_room(&mut ws, 8, false).await;

    send(
        &mut ws,
        json!({"type": "LIST_PUBLIC_ROOMS", "payload": {"status": "WAITING", "limit": 50}}),
    )
    .await;
    match next_event(&mut ws).await {
        ServerEvent::RoomList { rooms, total } => {
            assert_eq!(total, rooms.len());
            assert!(rooms.iter().any(|r| r.code == public));
            assert!(rooms.iter().all(|r| r.code != private));
        }
        other => panic!("expected ROOM_LIST, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attach_rebinds_player_on_new_socket() {
    let addr = start_server().await;
    let mut first = connect(&addr).await;

    let code = create_room(&mut first, 8, false).await;
    let me = join(&mut first, &code).await;
    drop(first);

    let mut second = connect(&addr).await;
    send(
        &mut second,
        json!({"type": "ATTACH", "payload": {"roomCode": code, "playerId": me.id}}),
    )
    .await;
    match next_event(&mut second).await {
        ServerEvent::RoomState { room } => assert!(room.player(me.id).is_some()),
        other => panic!("expected ROOM_STATE, got {other:?}"),
    }

    send(&mut second, json!({"type": "UPDATE_NICKNAME", "payload": {"nickname": "Back"}})).await;
    let ack = wait_for(&mut second, |e| matches!(e, ServerEvent::Ack { .. })).await;
    assert_eq!(
        ack,
        ServerEvent::Ack {
            action: "UPDATE_NICKNAME".into()
        }
    );
}

#[tokio::test]
async fn test_attach_unknown_player_not_found() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    let code = create_room(&mut ws, 8, false).await;

    send(
        &mut ws,
        json!({"type": "ATTACH", "payload": {"roomCode": code, "playerId": PlayerId::random()}}),
    )
    .await;
    let reply = next_event(&mut ws).await;
    assert_eq!(error_status(&reply), Some(404), "got {reply:?}");
}

// =========================================================================
// Game
// =========================================================================

#[tokio::test]
async fn test_six_players_start_game_and_see_only_own_role() {
    let addr = start_server().await;
    let (mut clients, ids) = six_player_game(&addr).await;

    for ws in &mut clients {
        match wait_for(ws, |e| matches!(e, ServerEvent::RoleAssigned { .. })).await {
            ServerEvent::RoleAssigned { role, team, .. } => assert_eq!(role.team, team),
            _ => unreachable!(),
        }
    }

    let room = get_room(&mut clients[2]).await;
    for player in &room.players {
        if player.id == ids[2] {
            assert!(player.role.is_some());
        } else {
            assert!(player.role.is_none());
            assert!(player.team.is_none());
        }
        assert!(player.current_room.is_some());
    }
    assert!(room.round().is_some());
}

#[tokio::test]
async fn test_start_game_with_too_few_players_rejected() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    let code = create_room(&mut ws, 8, false).await;
    join(&mut ws, &code).await;

    send(&mut ws, json!({"type": "START_GAME"})).await;
    let reply = wait_for(&mut ws, |e| matches!(e, ServerEvent::Error { .. } | ServerEvent::Ack { .. })).await;
    assert_eq!(error_status(&reply), Some(400), "got {reply:?}");
}

// =========================================================================
// Keepalive and reconnects
// =========================================================================

#[tokio::test]
async fn test_listening_client_outlives_idle_timeout() {
    let addr = start_with(
        TwoRoomsServer::builder()
            .idle_timeout(Duration::from_secs(1))
            .ping_interval(Duration::from_millis(200))
            .game_config(GameConfig {
                tick_period: Duration::from_millis(100),
                ..GameConfig::default()
            }),
    )
    .await;
    let (mut clients, _) = six_player_game(&addr).await;
    let owner = &mut clients[0];

    // Only read from here on; reading is what answers the server's pings.
    let until = Instant::now() + Duration::from_millis(2_500);
    let mut ticks = 0;
    loop {
        let msg = match tokio::time::timeout_at(until, owner.next()).await {
            Err(_) => break,
            Ok(msg) => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let event: ServerEvent = serde_json::from_str(text.as_str()).expect("decode");
                if matches!(event, ServerEvent::TimerTick { .. }) {
                    ticks += 1;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                panic!("server dropped a listening client after {ticks} ticks")
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("connection failed after {ticks} ticks: {e}"),
        }
    }
    assert!(ticks >= 15, "only {ticks} ticks arrived");
}

#[tokio::test]
async fn test_silent_client_dropped_after_idle_timeout() {
    let addr = start_with(
        TwoRoomsServer::builder()
            .idle_timeout(Duration::from_millis(300))
            .ping_interval(Duration::from_secs(60)),
    )
    .await;
    let mut ws = connect(&addr).await;

    let end = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "idle connection should have been closed");
}

#[tokio::test]
async fn test_leader_reattaching_within_grace_keeps_lead() {
    let addr = start_with(TwoRoomsServer::builder().hub_config(HubConfig {
        disconnect_grace: Duration::from_millis(500),
        ..HubConfig::default()
    }))
    .await;
    let (mut clients, ids) = six_player_game(&addr).await;
    let room = get_room(&mut clients[0]).await;
    let code = room.code.clone();
    let leader = red_leader(&room).expect("red leader assigned");
    let at = ids.iter().position(|id| *id == leader).expect("leader is a client");

    drop(clients.remove(at));
    let mut back = connect(&addr).await;
    send(
        &mut back,
        json!({"type": "ATTACH", "payload": {"roomCode": code, "playerId": leader}}),
    )
    .await;
    wait_for(&mut back, |e| matches!(e, ServerEvent::RoomState { .. })).await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let room = get_room(&mut back).await;
    assert_eq!(red_leader(&room), Some(leader));
}

#[tokio::test]
async fn test_leader_gone_past_grace_loses_lead() {
    let addr = start_with(TwoRoomsServer::builder().hub_config(HubConfig {
        disconnect_grace: Duration::from_millis(500),
        ..HubConfig::default()
    }))
    .await;
    let (mut clients, ids) = six_player_game(&addr).await;
    let room = get_room(&mut clients[0]).await;
    let leader = red_leader(&room).expect("red leader assigned");
    let at = ids.iter().position(|id| *id == leader).expect("leader is a client");
    drop(clients.remove(at));
    let watcher = &mut clients[0];

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(red_leader(&get_room(watcher).await), Some(leader));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let now = red_leader(&get_room(watcher).await);
    assert!(now.is_some());
    assert_ne!(now, Some(leader));
}
