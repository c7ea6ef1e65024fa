//! Per-connection handler: action decoding, dispatch and hub binding.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Send `CONNECTED`
//!   2. Loop: receive a frame → decode a `ClientAction` → dispatch to the
//!      coordinator → reply with `ACK`, a typed reply, or `ERROR`
//!   3. `JOIN_ROOM` / `ATTACH` bind the connection to a room and player and
//!      register it with the hub; room events then arrive through an
//!      outbound pump task
//!
//! Replies are written straight to the socket; broadcasts go through the
//! hub queue. The two may interleave.
//!
//! A keepalive task pings the peer for the life of the connection. The
//! connection is dropped once nothing at all has arrived for the idle
//! timeout, so a client that only listens stays connected as long as it
//! answers pings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tworooms_game::{Coordinator, CreateRoomRequest, GameError, LeaveOutcome};
use tworooms_hub::{ClientHandle, Frame};
use tworooms_protocol::{
    ClientAction, Codec, PlayerId, ProtocolError, Room, RoomCode, ServerEvent,
};
use tworooms_transport::{Connection, ConnectionId, TransportError, WebSocketConnection};

use crate::TwoRoomsError;
use crate::server::ServerState;

/// The room and player a connection acts for.
#[derive(Debug, Clone)]
struct Binding {
    code: RoomCode,
    player: PlayerId,
}

/// Drop guard that unregisters the connection when the handler exits.
///
/// If the player is still gone once the hub's disconnect grace has run out
/// and was leading a side, the lead passes to someone else. Since `Drop`
/// is synchronous, the follow-up runs in a fire-and-forget task.
struct ConnectionGuard {
    conn_id: ConnectionId,
    coordinator: Coordinator,
    binding: Option<Binding>,
    pump: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

impl ConnectionGuard {
    /// Stops delivering hub events to this connection.
    fn release(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.binding.take().is_some() {
            self.coordinator.hub().unregister(self.conn_id);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        let binding = self.binding.clone();
        self.release();

        let Some(Binding { code, player }) = binding else {
            return;
        };
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move { hand_over_after_grace(&coordinator, &code, player).await });
    }
}

/// Waits out the disconnect grace, then hands the lead over unless the
/// player came back.
async fn hand_over_after_grace(coordinator: &Coordinator, code: &RoomCode, player: PlayerId) {
    let hub = coordinator.hub();
    time::sleep(hub.disconnect_grace()).await;
    // Dropped again since: that drop's own task decides.
    if hub.is_player_disconnected(player) {
        return;
    }
    hand_over_if_gone(coordinator, code, player).await;
}

/// Passes the lead on if `player` has no socket left in the room.
async fn hand_over_if_gone(coordinator: &Coordinator, code: &RoomCode, player: PlayerId) {
    // Let the hub apply the pending unregister first.
    coordinator.hub().sync().await;
    if coordinator.hub().is_connected(code, player) {
        return;
    }
    match coordinator.leaders().handle_leader_disconnect(code, player) {
        Ok(Some(change)) => tracing::info!(
            room_code = %code,
            %player,
            new_leader = %change.new_leader.id,
            "leader gone, lead handed over"
        ),
        Ok(None) => {}
        Err(e) => tracing::debug!(
            room_code = %code,
            %player,
            error = %e,
            "no replacement for departed leader"
        ),
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), TwoRoomsError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let mut guard = ConnectionGuard {
        conn_id,
        coordinator: state.coordinator.clone(),
        binding: None,
        pump: None,
        keepalive: Some(tokio::spawn(keepalive(
            Arc::clone(&conn),
            state.config.ping_interval,
        ))),
    };

    send_event(
        &conn,
        &state,
        &ServerEvent::Connected {
            server_time: Utc::now(),
        },
    )
    .await?;

    loop {
        let data = match recv_live(&conn, state.config.idle_timeout).await {
            Some(Ok(Some(data))) => data,
            Some(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            None => {
                tracing::info!(%conn_id, "connection timed out");
                break;
            }
        };

        let action: ClientAction = match state.codec.decode(&data) {
            Ok(action) => action,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode action");
                send_event(&conn, &state, &error_event(&bad_frame(&e))).await?;
                continue;
            }
        };

        let kind = action.kind();
        tracing::trace!(%conn_id, action = kind, "action received");
        let reply = match dispatch(&conn, &state, &mut guard, action).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(%conn_id, action = kind, error = %e, "action rejected");
                error_event(&e)
            }
        };
        send_event(&conn, &state, &reply).await?;
    }

    // guard drops here → hub unregister now, leader hand-over after the grace.
    Ok(())
}

/// Receives the next data frame. Returns `None` once nothing, pongs
/// included, has arrived for `idle`.
async fn recv_live(
    conn: &WebSocketConnection,
    idle: Duration,
) -> Option<Result<Option<Vec<u8>>, TransportError>> {
    loop {
        let deadline = conn.last_seen() + idle;
        match time::timeout_at(deadline, conn.recv()).await {
            Ok(result) => return Some(result),
            // A pong moved the deadline while we waited.
            Err(_) if conn.last_seen() + idle > Instant::now() => continue,
            Err(_) => return None,
        }
    }
}

/// Pings the peer every `every` until the connection fails.
async fn keepalive(conn: Arc<WebSocketConnection>, every: Duration) {
    let every = every.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = conn.ping().await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "ping failed");
            return;
        }
    }
}

/// Runs one action and builds the reply for the sender.
async fn dispatch(
    conn: &Arc<WebSocketConnection>,
    state: &ServerState,
    guard: &mut ConnectionGuard,
    action: ClientAction,
) -> Result<ServerEvent, GameError> {
    let c = &state.coordinator;
    let ack = ServerEvent::Ack {
        action: action.kind().to_owned(),
    };

    let bound = match (&guard.binding, action.requires_binding()) {
        (Some(b), true) => Some(b.clone()),
        (None, true) => {
            return Err(GameError::forbidden("join or attach to a room first"));
        }
        (_, false) => None,
    };
    let Some(Binding { code, player }) = bound else {
        return lobby_action(conn, c, guard, action).await;
    };

    match action {
        ClientAction::GetRoom => Ok(ServerEvent::RoomState {
            room: view_for(&c.lobby().room(&code)?, player),
        }),
        ClientAction::UpdateNickname { nickname } => {
            c.lobby().update_nickname(&code, player, &nickname)?;
            Ok(ack)
        }
        ClientAction::LeaveRoom => {
            let outcome = c.lobby().leave_room(&code, player)?;
            guard.release();
            if outcome == LeaveOutcome::Seated {
                hand_over_if_gone(c, &code, player).await;
            }
            Ok(ack)
        }
        ClientAction::UpdateVisibility { is_public } => {
            c.lobby().update_visibility(&code, player, is_public)?;
            Ok(ack)
        }
        ClientAction::TransferOwnership => {
            c.lobby().transfer_ownership(&code, player)?;
            Ok(ack)
        }
        ClientAction::StartGame => {
            c.game().start_game(&code)?;
            Ok(ack)
        }
        ClientAction::ResetGame => {
            c.game().reset_game(&code)?;
            Ok(ack)
        }
        ClientAction::StartRound { round_number } => {
            c.rounds().start_round(&code, round_number)?;
            c.leaders().preserve_leaders(&code)?;
            Ok(ack)
        }
        ClientAction::EndRound => {
            c.rounds().end_round(&code)?;
            Ok(ack)
        }
        ClientAction::LeaderReady => {
            c.rounds().leader_ready(&code, player)?;
            Ok(ack)
        }
        ClientAction::TransferLeadership { new_leader_id } => {
            c.leaders().transfer_leadership(&code, player, new_leader_id)?;
            Ok(ack)
        }
        ClientAction::StartVote {
            room_color,
            target_leader_id,
        } => {
            let session = c
                .voting()
                .start_removal_vote(&code, player, room_color, target_leader_id)?;
            Ok(ServerEvent::VoteState {
                session: Some(session),
            })
        }
        ClientAction::CastVote { vote_id, choice } => {
            let session = c.voting().cast_vote(&code, vote_id, player, choice)?;
            Ok(ServerEvent::VoteState {
                session: Some(session),
            })
        }
        ClientAction::GetVote { room_color } => Ok(ServerEvent::VoteState {
            session: c.voting().active_vote(&code, room_color),
        }),
        ClientAction::SelectHostages { hostage_ids } => {
            c.exchange().select_hostages(&code, player, hostage_ids)?;
            Ok(ack)
        }
        ClientAction::CreateRoom { .. }
        | ClientAction::JoinRoom { .. }
        | ClientAction::Attach { .. }
        | ClientAction::ListPublicRooms { .. } => lobby_action(conn, c, guard, action).await,
    }
}

/// Actions that work before the connection is bound.
async fn lobby_action(
    conn: &Arc<WebSocketConnection>,
    c: &Coordinator,
    guard: &mut ConnectionGuard,
    action: ClientAction,
) -> Result<ServerEvent, GameError> {
    match action {
        ClientAction::CreateRoom {
            max_players,
            is_public,
            role_config_id,
            selected_roles,
        } => {
            let room = c.lobby().create_room(CreateRoomRequest {
                max_players,
                is_public,
                role_config_id,
                selected_roles,
            })?;
            Ok(ServerEvent::RoomCreated { room })
        }
        ClientAction::JoinRoom { room_code } => {
            let player = c.lobby().join_room(&room_code)?;
            bind(conn, c, guard, room_code.clone(), player.id).await;
            Ok(ServerEvent::RoomJoined { room_code, player })
        }
        ClientAction::Attach {
            room_code,
            player_id,
        } => {
            let room = c.lobby().room(&room_code)?;
            if room.player(player_id).is_none() {
                return Err(GameError::not_found(format!(
                    "player {player_id} is not in room {room_code}"
                )));
            }
            bind(conn, c, guard, room_code, player_id).await;
            Ok(ServerEvent::RoomState {
                room: view_for(&room, player_id),
            })
        }
        ClientAction::ListPublicRooms {
            status,
            limit,
            offset,
        } => {
            let (rooms, total) = c
                .lobby()
                .list_public_rooms(status.as_deref(), limit, offset)?;
            Ok(ServerEvent::RoomList { rooms, total })
        }
        other => Err(GameError::internal(format!(
            "{} is not a lobby action",
            other.kind()
        ))),
    }
}

/// Registers the connection with the hub for `(code, player)` and starts
/// the outbound pump. A previous binding is replaced.
async fn bind(
    conn: &Arc<WebSocketConnection>,
    c: &Coordinator,
    guard: &mut ConnectionGuard,
    code: RoomCode,
    player: PlayerId,
) {
    if let Some(pump) = guard.pump.take() {
        pump.abort();
    }
    let (tx, rx) = c.hub().client_channel();
    c.hub()
        .register(ClientHandle::new(guard.conn_id, code.clone(), Some(player), tx))
        .await;
    guard.pump = Some(tokio::spawn(pump(Arc::clone(conn), rx)));

    tracing::info!(conn_id = %guard.conn_id, room_code = %code, %player, "connection bound");
    guard.binding = Some(Binding { code, player });
}

/// Drains the hub queue into the socket. When the hub drops the queue
/// (slow consumer or shutdown) the socket is closed too.
async fn pump(conn: Arc<WebSocketConnection>, mut rx: tokio::sync::mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = conn.send(&frame).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "outbound send failed");
            return;
        }
    }
    tracing::debug!(conn_id = %conn.id(), "hub queue closed, closing connection");
    let _ = conn.close().await;
}

/// The room as `viewer` may see it: everyone's secrets hidden except
/// the viewer's own.
fn view_for(room: &Room, viewer: PlayerId) -> Room {
    let mut view = room.public_view();
    if let (Some(slot), Some(own)) = (
        view.players.iter_mut().find(|p| p.id == viewer),
        room.player(viewer),
    ) {
        *slot = own.clone();
    }
    view
}

fn bad_frame(e: &ProtocolError) -> GameError {
    GameError::invalid(format!("invalid message: {e}"))
}

fn error_event(e: &GameError) -> ServerEvent {
    ServerEvent::Error {
        code: e.code().to_owned(),
        status: e.status(),
        message: e.to_string(),
    }
}

async fn send_event(
    conn: &WebSocketConnection,
    state: &ServerState,
    event: &ServerEvent,
) -> Result<(), TwoRoomsError> {
    let bytes = state.codec.encode(event)?;
    conn.send(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tworooms_protocol::{Player, RoomColor, Role, Team};

    use super::*;

    #[test]
    fn test_view_for_keeps_only_own_secrets() {
        let mut room = Room::new(RoomCode::from("VIEWER"), 6, false);
        let me = PlayerId::random();
        let other = PlayerId::random();
        for (id, role) in [(me, Role::bomber()), (other, Role::president())] {
            let mut p = Player::new(id, "p");
            p.team = Some(role.team);
            p.role = Some(role);
            p.current_room = Some(RoomColor::RedRoom);
            room.players.push(p);
        }

        let view = view_for(&room, me);

        assert_eq!(view.player(me).unwrap().team, Some(Team::Red));
        assert!(view.player(other).unwrap().role.is_none());
        assert_eq!(view.player(other).unwrap().current_room, Some(RoomColor::RedRoom));
    }

    #[test]
    fn test_error_event_carries_code_and_status() {
        let event = error_event(&GameError::forbidden("nope"));
        assert_eq!(
            event,
            ServerEvent::Error {
                code: "FORBIDDEN".into(),
                status: 403,
                message: "nope".into(),
            }
        );
    }
}
